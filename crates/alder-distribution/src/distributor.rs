//! Distributor: orchestration of the distribution engine.
//!
//! Start sequence:
//!
//! 1. Open the subscription list-and-watch session feeding the registry.
//! 2. Block on the LIST-DONE latch so cursor tracking sees a consistent
//!    subscriber snapshot.
//! 3. Start the event handler's pump loop.
//! 4. Spawn one watch-and-distribute loop per cursor type.
//!
//! Each watch-and-distribute loop resumes from the tracker's replay floor
//! (falling back to the resource head), pages nodes forward, hydrates them,
//! and hands them to the handler; the start cursor only advances after the
//! handler accepts a batch.

use std::sync::Arc;

use alder_core::CursorType;
use alder_core::EventCache;
use alder_core::constants::DEFAULT_WATCH_EVENT_STEP_SIZE;
use alder_core::constants::DEFAULT_WATCH_LOOP_INTERVAL;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::DistributionError;
use crate::error::Result;
use crate::handler::EventHandler;
use crate::log::EventLog;
use crate::reflector::SubscriptionWatcher;
use crate::registry::SubscriptionRegistry;
use crate::ring::HashRing;
use crate::sender::idle;
use crate::tracker::CursorTracker;
use crate::watcher::ResourceWatcher;

/// Diagnostic tag stamped on events hydrated by the internal watch loops.
const INNER_WATCHER_TAG: &str = "inner-watcher";

/// The event subscription distributor.
pub struct Distributor {
    log: Arc<dyn EventLog>,
    sub_watcher: Arc<dyn SubscriptionWatcher>,
    registry: Arc<SubscriptionRegistry>,
    tracker: Arc<CursorTracker>,
    handler: Arc<EventHandler>,
    ring: Arc<HashRing>,
}

impl Distributor {
    /// Wire a distributor from its collaborators.
    pub fn new(
        cache: Arc<dyn EventCache>,
        log: Arc<dyn EventLog>,
        sub_watcher: Arc<dyn SubscriptionWatcher>,
        registry: Arc<SubscriptionRegistry>,
        handler: Arc<EventHandler>,
        ring: Arc<HashRing>,
    ) -> Self {
        let tracker = Arc::new(CursorTracker::new(registry.clone(), cache));
        Distributor {
            log,
            sub_watcher,
            registry,
            tracker,
            handler,
            ring,
        }
    }

    /// Load subscriptions, then watch every resource stream and distribute.
    ///
    /// Returns once all background loops are running; they stop when
    /// `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        if self.ring.is_empty() {
            return Err(DistributionError::RingEmpty);
        }

        info!(instance = self.ring.local(), "distributor starting");

        // Keep the subscription mirror current for the life of the service.
        {
            let registry = self.registry.clone();
            let sub_watcher = self.sub_watcher.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                if let Err(e) = registry.run(sub_watcher, cancel).await {
                    error!(error = %e, "subscription list-and-watch terminated");
                }
            });
        }

        // Cursor tracking needs the consistent post-LIST snapshot.
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = self.registry.wait_list_done() => {}
        }
        info!(subscriptions = self.registry.subscription_count(), "subscription snapshot loaded");

        self.handler.clone().start(cancel.child_token());

        for cursor_type in CursorType::all() {
            let loop_ = WatchLoop {
                watcher: ResourceWatcher::new(self.log.clone()),
                tracker: self.tracker.clone(),
                handler: self.handler.clone(),
                cursor_type,
            };
            let cancel = cancel.child_token();
            tokio::spawn(async move { loop_.run(cancel).await });
        }

        info!("distributor started");
        Ok(())
    }
}

/// One resource stream's watch-and-distribute loop.
struct WatchLoop {
    watcher: ResourceWatcher,
    tracker: Arc<CursorTracker>,
    handler: Arc<EventHandler>,
    cursor_type: CursorType,
}

impl WatchLoop {
    async fn run(&self, cancel: CancellationToken) {
        info!(resource = %self.cursor_type, "watch-and-distribute loop started");

        'outer: while !cancel.is_cancelled() {
            let mut start = self.start_cursor().await;

            loop {
                if cancel.is_cancelled() {
                    break 'outer;
                }

                let nodes = match self.watcher.nodes_from_cursor(DEFAULT_WATCH_EVENT_STEP_SIZE, &start, self.cursor_type).await
                {
                    Ok(nodes) => nodes,
                    Err(e) if e.is_head_node_missing() => {
                        // The cursor fell off the retention window; resume
                        // from the earliest node the log still has.
                        warn!(resource = %self.cursor_type, "start cursor truncated, resuming from head");
                        if idle(&cancel, DEFAULT_WATCH_LOOP_INTERVAL).await {
                            break 'outer;
                        }
                        start = self.cursor_type.head_key();
                        continue;
                    }
                    Err(e) => {
                        warn!(resource = %self.cursor_type, error = %e, "watch step failed, restarting loop");
                        if idle(&cancel, DEFAULT_WATCH_LOOP_INTERVAL).await {
                            break 'outer;
                        }
                        continue 'outer;
                    }
                };

                if nodes.is_empty() {
                    if idle(&cancel, DEFAULT_WATCH_LOOP_INTERVAL).await {
                        break 'outer;
                    }
                    continue;
                }

                let last_cursor = nodes[nodes.len() - 1].cursor.clone();

                let hits = ResourceWatcher::hit_nodes_with_kinds(nodes, &[]);
                if hits.is_empty() {
                    start = last_cursor;
                    if idle(&cancel, DEFAULT_WATCH_LOOP_INTERVAL).await {
                        break 'outer;
                    }
                    continue;
                }

                let events = self.watcher.events_from_nodes(hits, self.cursor_type, INNER_WATCHER_TAG);
                if let Err(e) = self.handler.handle(&events).await {
                    warn!(resource = %self.cursor_type, error = %e, "distributing events failed, not advancing");
                    if idle(&cancel, DEFAULT_WATCH_LOOP_INTERVAL).await {
                        break 'outer;
                    }
                    continue;
                }

                start = last_cursor;
            }
        }

        info!(resource = %self.cursor_type, "watch-and-distribute loop stopped");
    }

    /// The subscriber replay floor, or the resource head when no floor is
    /// known or the tracker fails.
    async fn start_cursor(&self) -> String {
        match self.tracker.resource_cursor(self.cursor_type).await {
            Ok(Some(cursor)) => cursor.encode(),
            Ok(None) => self.cursor_type.head_key(),
            Err(e) => {
                warn!(resource = %self.cursor_type, error = %e, "subscriber cursor floor unavailable, using head");
                self.cursor_type.head_key()
            }
        }
    }
}
