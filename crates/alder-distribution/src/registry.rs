//! Subscription registry: a local mirror of the subscription collection and
//! the (owner, event type) → subscribers index derived from it.
//!
//! The registry is fed by a list-and-watch session over the control-plane
//! store. After the initial LIST phase it signals a one-shot latch so the
//! distributor can start cursor tracking against a consistent snapshot;
//! thereafter ADD/UPDATE/DELETE events keep it incremental.
//!
//! Locking: `subscriptions` takes an exclusive mutex, `subscribers` a
//! read-write lock. At most one lock is held at a time, never across I/O,
//! and mutations acquire them in subscriptions → subscribers order.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;

use alder_core::Subscription;
use alder_core::SubscriptionId;
use alder_core::constants::DEFAULT_LIST_WATCH_PAGE_SIZE;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::DistributionError;
use crate::latch::Latch;
use crate::reflector::SubscriptionEvent;
use crate::reflector::SubscriptionWatcher;

/// Index key: one owner's interest in one event type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberKey {
    pub owner_id: String,
    pub event_type: String,
}

/// Local mirror of subscriptions plus the subscriber index.
pub struct SubscriptionRegistry {
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
    subscribers: RwLock<HashMap<SubscriberKey, Vec<SubscriptionId>>>,
    list_done: Latch,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        SubscriptionRegistry {
            subscriptions: Mutex::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            list_done: Latch::new(),
        }
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Consume a list-and-watch session until cancellation or stream end.
    ///
    /// Signals [`SubscriptionRegistry::wait_list_done`] once the initial
    /// snapshot is complete.
    pub async fn run(
        &self,
        watcher: Arc<dyn SubscriptionWatcher>,
        cancel: CancellationToken,
    ) -> Result<(), DistributionError> {
        let mut events = watcher.list_and_watch(DEFAULT_LIST_WATCH_PAGE_SIZE).await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = events.recv() => match event {
                    Some(event) => self.apply(event),
                    None => {
                        return Err(DistributionError::SubscriptionStream {
                            message: "list-and-watch stream ended".to_string(),
                        });
                    }
                },
            }
        }
    }

    /// Apply one list-and-watch event to the mirror and index.
    pub fn apply(&self, event: SubscriptionEvent) {
        match event {
            SubscriptionEvent::Listed(sub) | SubscriptionEvent::Added(sub) | SubscriptionEvent::Updated(sub) => {
                self.upsert(sub);
            }
            SubscriptionEvent::Deleted(sub) => self.remove(&sub),
            SubscriptionEvent::ListDone => {
                info!(count = self.subscription_count(), "subscription list phase done");
                self.list_done.signal();
            }
        }
    }

    /// Block until the initial LIST phase has completed.
    pub async fn wait_list_done(&self) {
        self.list_done.wait().await;
    }

    fn upsert(&self, subscription: Subscription) {
        if !subscription.is_valid() {
            warn!(
                subscription_id = subscription.subscription_id,
                "ignoring invalid subscription document"
            );
            return;
        }

        let subid = subscription.subscription_id;
        let owner = subscription.owner_id.clone();
        let new_tokens = subscription.form_tokens();

        // Decide the index delta under the subscriptions lock, apply it to
        // the subscribers lock afterwards.
        let (added, removed) = {
            let mut subscriptions = self.lock_subscriptions();
            match subscriptions.get(&subid) {
                None => {
                    subscriptions.insert(subid, subscription);
                    (new_tokens, Vec::new())
                }
                Some(old) => {
                    let old_tokens = old.form_tokens();
                    if old.content_key() != subscription.content_key() {
                        subscriptions.insert(subid, subscription);
                    }

                    let old_set: HashSet<&String> = old_tokens.iter().collect();
                    let new_set: HashSet<&String> = new_tokens.iter().collect();
                    let added = new_tokens.iter().filter(|t| !old_set.contains(t)).cloned().collect();
                    let removed = old_tokens.iter().filter(|t| !new_set.contains(t)).cloned().collect();
                    (added, removed)
                }
            }
        };

        for token in removed {
            self.rem_subscriber(&owner, &token, subid);
        }
        for token in added {
            self.add_subscriber(&owner, &token, subid);
        }
    }

    fn remove(&self, subscription: &Subscription) {
        let subid = subscription.subscription_id;
        let tokens = {
            let mut subscriptions = self.lock_subscriptions();
            // Prefer the mirrored document's form; fall back to the deletion
            // event's copy when the document was never mirrored.
            let tokens = subscriptions.get(&subid).map(|s| s.form_tokens()).unwrap_or_else(|| subscription.form_tokens());
            subscriptions.remove(&subid);
            tokens
        };

        for token in tokens {
            self.rem_subscriber(&subscription.owner_id, &token, subid);
        }
        debug!(subscription_id = subid, "subscription removed");
    }

    /// Add `subid` to the (owner, event type) bucket. Idempotent.
    fn add_subscriber(&self, owner_id: &str, event_type: &str, subid: SubscriptionId) {
        let key = SubscriberKey {
            owner_id: owner_id.to_string(),
            event_type: event_type.to_string(),
        };
        let mut subscribers = self.lock_subscribers_write();
        let bucket = subscribers.entry(key).or_default();
        if !bucket.contains(&subid) {
            bucket.push(subid);
        }
    }

    /// Remove `subid` from the (owner, event type) bucket. Idempotent.
    fn rem_subscriber(&self, owner_id: &str, event_type: &str, subid: SubscriptionId) {
        let key = SubscriberKey {
            owner_id: owner_id.to_string(),
            event_type: event_type.to_string(),
        };
        let mut subscribers = self.lock_subscribers_write();
        if let Some(bucket) = subscribers.get_mut(&key) {
            bucket.retain(|id| *id != subid);
            if bucket.is_empty() {
                subscribers.remove(&key);
            }
        }
    }

    /// All subscriber ids registered for `event_type`, across owners.
    pub fn find_subscribers(&self, event_type: &str) -> Vec<SubscriptionId> {
        let subscribers = self.lock_subscribers_read();
        let mut ids: Vec<SubscriptionId> = subscribers
            .iter()
            .filter(|(key, _)| key.event_type == event_type)
            .flat_map(|(_, bucket)| bucket.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// The mirrored document for `subid`, if present.
    pub fn find_subscription(&self, subid: SubscriptionId) -> Option<Subscription> {
        self.lock_subscriptions().get(&subid).cloned()
    }

    /// Number of mirrored subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.lock_subscriptions().len()
    }

    /// Immutable snapshot of the subscriber index, for iteration without
    /// holding the lock.
    pub fn subscriber_snapshot(&self) -> Vec<(SubscriberKey, Vec<SubscriptionId>)> {
        self.lock_subscribers_read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, Subscription>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_subscribers_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SubscriberKey, Vec<SubscriptionId>>> {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_subscribers_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SubscriberKey, Vec<SubscriptionId>>> {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner())
    }
}
