//! The shared event cache abstraction.
//!
//! Every queue, counter, and persisted cursor in the distribution engine
//! lives in a shared cache reachable from all distributor instances. This
//! trait names the primitives the engine needs; production deployments back
//! it with a shared cache service, tests and the embedded topology use
//! [`crate::memory::MemoryCache`].
//!
//! List semantics are FIFO: `lpush` enqueues, `blpop` and `brpoplpush`
//! dequeue the oldest element. Delivery order to a subscriber matches
//! enqueue order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

/// Redis-shaped primitives required by the distribution engine.
///
/// All operations are atomic with respect to each other. Blocking variants
/// return `None` on timeout rather than erroring.
#[async_trait]
pub trait EventCache: Send + Sync {
    /// Enqueue a value onto the list at `key`. Returns the new length.
    async fn lpush(&self, key: &str, value: String) -> CacheResult<u64>;

    /// Dequeue the oldest element of the list at `key`, waiting up to
    /// `timeout` for one to arrive.
    async fn blpop(&self, key: &str, timeout: Duration) -> CacheResult<Option<String>>;

    /// Atomically dequeue the oldest element of `source` and enqueue it onto
    /// `destination`, waiting up to `timeout`. Returns the moved element.
    async fn brpoplpush(&self, source: &str, destination: &str, timeout: Duration) -> CacheResult<Option<String>>;

    /// Length of the list at `key`; 0 when absent.
    async fn llen(&self, key: &str) -> CacheResult<u64>;

    /// Atomically increment the integer at `key`, creating it at 0 first.
    /// Returns the new value.
    async fn incr(&self, key: &str) -> CacheResult<i64>;

    /// Atomically add `delta` to `field` of the hash at `key`. Returns the
    /// new field value.
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64>;

    /// All fields of the hash at `key`; empty when absent.
    async fn hget_all(&self, key: &str) -> CacheResult<HashMap<String, i64>>;

    /// The string value at `key`.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set the string value at `key`.
    async fn set(&self, key: &str, value: String) -> CacheResult<()>;
}

#[async_trait]
impl<T: EventCache + ?Sized> EventCache for Arc<T> {
    async fn lpush(&self, key: &str, value: String) -> CacheResult<u64> {
        (**self).lpush(key, value).await
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> CacheResult<Option<String>> {
        (**self).blpop(key, timeout).await
    }

    async fn brpoplpush(&self, source: &str, destination: &str, timeout: Duration) -> CacheResult<Option<String>> {
        (**self).brpoplpush(source, destination, timeout).await
    }

    async fn llen(&self, key: &str) -> CacheResult<u64> {
        (**self).llen(key).await
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        (**self).incr(key).await
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64> {
        (**self).hincr_by(key, field, delta).await
    }

    async fn hget_all(&self, key: &str) -> CacheResult<HashMap<String, i64>> {
        (**self).hget_all(key).await
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: String) -> CacheResult<()> {
        (**self).set(key, value).await
    }
}

/// Builders for the engine's cache keys.
pub mod keys {
    use crate::constants::CALLBACK_COUNT_KEY_PREFIX;
    use crate::constants::DIST_ID_KEY_PREFIX;
    use crate::constants::SUBSCRIBER_CURSOR_KEY_PREFIX;
    use crate::constants::SUBSCRIBER_QUEUE_KEY_PREFIX;
    use crate::subscription::SubscriptionId;

    /// Per-subscriber event queue.
    pub fn subscriber_queue(subid: SubscriptionId) -> String {
        format!("{SUBSCRIBER_QUEUE_KEY_PREFIX}{subid}")
    }

    /// Per-subscription monotonic dist id counter.
    pub fn dist_id(subid: SubscriptionId) -> String {
        format!("{DIST_ID_KEY_PREFIX}{subid}")
    }

    /// Per-subscription callback counter hash.
    pub fn callback_count(subid: SubscriptionId) -> String {
        format!("{CALLBACK_COUNT_KEY_PREFIX}{subid}")
    }

    /// Persisted cursor of one subscriber on one event type.
    pub fn subscriber_cursor(owner_id: &str, event_type: &str, subid: SubscriptionId) -> String {
        format!("{SUBSCRIBER_CURSOR_KEY_PREFIX}{owner_id}:{event_type}:{subid}")
    }
}
