//! Per-subscriber event sender.
//!
//! One sender is created lazily for each subscription this instance owns
//! and stays resident until shutdown. It drains the subscriber's
//! cache-resident queue, drops events older than the fusing window, POSTs
//! each dist inst to the subscription's callback URL, applies the
//! confirmation predicate, and maintains the per-subscription attempt
//! counters.
//!
//! A confirmation failure does not retry: the subscriber's replay window via
//! its persisted cursor re-presents the event on the next distribution pass.

use std::sync::Arc;
use std::time::Duration;

use alder_core::ConfirmMode;
use alder_core::DistInst;
use alder_core::EventCache;
use alder_core::Subscription;
use alder_core::SubscriptionId;
use alder_core::constants::CALLBACK_FAILURE_FIELD;
use alder_core::constants::CALLBACK_TOTAL_FIELD;
use alder_core::constants::DEFAULT_HANDLE_RETRY_INTERVAL;
use alder_core::constants::DEFAULT_TRANS_TIMEOUT;
use alder_core::constants::FUSING_EVENT_EXPIRE_SECS;
use alder_core::constants::NIL_STR;
use alder_core::keys;
use alder_core::unix_now;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::DistributionError;
use crate::error::SendError;
use crate::registry::SubscriptionRegistry;
use crate::ring::HashRing;

/// Judge a callback response against the subscription's confirm mode.
pub fn confirm(subscription: &Subscription, status: u16, body: &str) -> Result<(), SendError> {
    match subscription.confirm_mode {
        ConfirmMode::HttpStatus => {
            if status.to_string() != subscription.confirm_pattern {
                return Err(SendError::ConfirmFailed {
                    received: format!("status {status}, body {body:.128}"),
                });
            }
        }
        ConfirmMode::Regular => {
            let pattern = Regex::new(&subscription.confirm_pattern).map_err(|e| SendError::BadPattern {
                pattern: subscription.confirm_pattern.clone(),
                message: e.to_string(),
            })?;
            if !pattern.is_match(body) {
                return Err(SendError::ConfirmFailed {
                    received: format!("body {body:.128}"),
                });
            }
        }
    }
    Ok(())
}

/// Drains one subscriber's queue and delivers to its callback.
pub struct EventSender {
    subscription_id: SubscriptionId,
    cache: Arc<dyn EventCache>,
    registry: Arc<SubscriptionRegistry>,
    ring: Arc<HashRing>,
    http: reqwest::Client,
}

impl EventSender {
    /// Create a sender for `subscription_id`.
    pub fn new(
        subscription_id: SubscriptionId,
        cache: Arc<dyn EventCache>,
        registry: Arc<SubscriptionRegistry>,
        ring: Arc<HashRing>,
        http: reqwest::Client,
    ) -> Self {
        EventSender {
            subscription_id,
            cache,
            registry,
            ring,
            http,
        }
    }

    /// Enqueue a dist inst onto this subscriber's queue.
    pub async fn enqueue(&self, dist: &DistInst) -> Result<(), DistributionError> {
        let payload = serde_json::to_string(dist).map_err(|e| DistributionError::Serialization {
            message: e.to_string(),
        })?;
        self.cache.lpush(&keys::subscriber_queue(self.subscription_id), payload).await?;
        Ok(())
    }

    /// Drain the queue until cancellation.
    ///
    /// While the ring assigns this subscription elsewhere the loop idles
    /// without draining, preserving the queue for the owning instance.
    pub async fn run(&self, cancel: CancellationToken) {
        let queue = keys::subscriber_queue(self.subscription_id);
        info!(subscription_id = self.subscription_id, "event sender started");

        while !cancel.is_cancelled() {
            if !self.ring.is_match(&self.subscription_id.to_string()) {
                if idle(&cancel, DEFAULT_HANDLE_RETRY_INTERVAL).await {
                    break;
                }
                continue;
            }

            let popped = tokio::select! {
                _ = cancel.cancelled() => break,
                popped = self.cache.blpop(&queue, DEFAULT_TRANS_TIMEOUT) => popped,
            };

            let raw = match popped {
                Ok(Some(raw)) if !raw.is_empty() && raw != NIL_STR => raw,
                Ok(_) => continue,
                Err(e) => {
                    warn!(subscription_id = self.subscription_id, error = %e, "popping subscriber queue failed");
                    if idle(&cancel, DEFAULT_HANDLE_RETRY_INTERVAL).await {
                        break;
                    }
                    continue;
                }
            };

            let dist: DistInst = match serde_json::from_str(&raw) {
                Ok(dist) => dist,
                Err(e) => {
                    warn!(subscription_id = self.subscription_id, error = %e, "dropping undecodable dist inst");
                    continue;
                }
            };

            // Fusing window: stale events must not storm callbacks after an
            // outage. No counters, no callback.
            if unix_now().saturating_sub(dist.event.action_time) > FUSING_EVENT_EXPIRE_SECS {
                continue;
            }

            if let Err(e) = self.send(&dist).await {
                warn!(
                    subscription_id = self.subscription_id,
                    dstb_id = dist.dstb_id,
                    error = %e,
                    "callback delivery failed"
                );
            }
        }

        info!(subscription_id = self.subscription_id, "event sender stopped");
    }

    /// Attempt one delivery: resolve the subscription, count the attempt,
    /// POST, confirm, and count any failure.
    pub async fn send(&self, dist: &DistInst) -> Result<(), SendError> {
        let Some(subscription) = self.registry.find_subscription(self.subscription_id) else {
            return Err(SendError::SubscriptionNotFound {
                subscription_id: self.subscription_id,
            });
        };

        self.bump(CALLBACK_TOTAL_FIELD).await;

        let result = self.deliver(&subscription, dist).await;
        match &result {
            // A confirmed delivery advances this subscriber's replay floor.
            Ok(()) => self.mark_cursor(&subscription, dist).await,
            Err(_) => self.bump(CALLBACK_FAILURE_FIELD).await,
        }
        result
    }

    /// Persist the subscriber's cursor after a confirmed delivery. The
    /// cursor tracker reads it back as the replay floor.
    async fn mark_cursor(&self, subscription: &Subscription, dist: &DistInst) {
        let key = keys::subscriber_cursor(
            &subscription.owner_id,
            &dist.event.subscription_type(),
            self.subscription_id,
        );
        if let Err(e) = self.cache.set(&key, dist.event.cursor.clone()).await {
            warn!(subscription_id = self.subscription_id, error = %e, "persisting subscriber cursor failed");
        }
    }

    async fn deliver(&self, subscription: &Subscription, dist: &DistInst) -> Result<(), SendError> {
        let payload = serde_json::to_vec(dist).map_err(|e| SendError::Marshal {
            message: e.to_string(),
        })?;

        let response = self
            .http
            .post(&subscription.callback_url)
            .timeout(subscription.timeout())
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| SendError::Request {
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| SendError::Request {
            message: e.to_string(),
        })?;

        confirm(subscription, status, &body)?;

        debug!(
            subscription_id = subscription.subscription_id,
            dstb_id = dist.dstb_id,
            status,
            "callback confirmed"
        );
        Ok(())
    }

    async fn bump(&self, field: &str) {
        let key = keys::callback_count(self.subscription_id);
        if let Err(e) = self.cache.hincr_by(&key, field, 1).await {
            warn!(subscription_id = self.subscription_id, field, error = %e, "callback counter update failed");
        }
    }
}

/// Sleep for `duration` unless cancelled first. Returns true when cancelled.
pub(crate) async fn idle(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
