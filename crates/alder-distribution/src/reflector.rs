//! List-and-watch over the subscription collection.
//!
//! The control-plane store streams a full snapshot of subscription
//! documents (LIST pages), marks the boundary with LIST-DONE, then streams
//! incremental mutations. The registry consumes this stream to keep its
//! local mirror and subscriber index current.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use alder_core::Subscription;
use alder_core::SubscriptionId;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::DistributionError;

/// One element of a list-and-watch session.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// A document delivered during the initial LIST phase.
    Listed(Subscription),
    /// The LIST phase is complete; the snapshot is consistent.
    ListDone,
    /// A document was created after the snapshot.
    Added(Subscription),
    /// A document was updated after the snapshot.
    Updated(Subscription),
    /// A document was deleted after the snapshot.
    Deleted(Subscription),
}

/// A control-plane store able to stream the subscription collection.
#[async_trait]
pub trait SubscriptionWatcher: Send + Sync {
    /// Open a list-and-watch session. The snapshot is delivered in pages of
    /// `page_size` documents, then `ListDone`, then live mutations until the
    /// receiver is dropped.
    async fn list_and_watch(&self, page_size: u32) -> Result<mpsc::Receiver<SubscriptionEvent>, DistributionError>;
}

/// Capacity of the live-mutation fan-out channel.
const CHANGE_BUFFER: usize = 256;

/// In-memory subscription store for tests and embedded deployments.
///
/// Mutations are visible to every open list-and-watch session.
pub struct MemorySubscriptionStore {
    inner: Mutex<BTreeMap<SubscriptionId, Subscription>>,
    changes: broadcast::Sender<SubscriptionEvent>,
}

impl Default for MemorySubscriptionStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        MemorySubscriptionStore {
            inner: Mutex::new(BTreeMap::new()),
            changes,
        }
    }
}

impl MemorySubscriptionStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<SubscriptionId, Subscription>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a subscription document, notifying watchers.
    pub fn upsert(&self, subscription: Subscription) {
        let event = {
            let mut inner = self.lock();
            let existed = inner.insert(subscription.subscription_id, subscription.clone()).is_some();
            if existed {
                SubscriptionEvent::Updated(subscription)
            } else {
                SubscriptionEvent::Added(subscription)
            }
        };
        // Send fails only when no session is open; that is fine.
        let _ = self.changes.send(event);
    }

    /// Delete a subscription document, notifying watchers.
    pub fn remove(&self, id: SubscriptionId) -> Option<Subscription> {
        let removed = self.lock().remove(&id);
        if let Some(subscription) = &removed {
            let _ = self.changes.send(SubscriptionEvent::Deleted(subscription.clone()));
        }
        removed
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl SubscriptionWatcher for MemorySubscriptionStore {
    async fn list_and_watch(&self, page_size: u32) -> Result<mpsc::Receiver<SubscriptionEvent>, DistributionError> {
        let (tx, rx) = mpsc::channel(page_size.max(1) as usize);

        // Subscribe before snapshotting so mutations racing the LIST phase
        // are not lost; they are replayed after ListDone.
        let mut live = self.changes.subscribe();
        let snapshot: Vec<Subscription> = self.lock().values().cloned().collect();

        tokio::spawn(async move {
            for page in snapshot.chunks(page_size.max(1) as usize) {
                for subscription in page {
                    if tx.send(SubscriptionEvent::Listed(subscription.clone())).await.is_err() {
                        return;
                    }
                }
            }
            if tx.send(SubscriptionEvent::ListDone).await.is_err() {
                return;
            }

            loop {
                match live.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "subscription watch lagged, mutations were skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(rx)
    }
}
