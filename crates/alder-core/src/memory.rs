//! In-memory [`EventCache`] implementation.
//!
//! Backs tests and the embedded single-process topology. All state lives in
//! one mutex-guarded map; blocking pops park on a [`Notify`] that every
//! enqueue wakes, so they return promptly instead of polling.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::pin::pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::cache::EventCache;
use crate::error::CacheError;
use crate::error::CacheResult;

#[derive(Debug)]
enum Slot {
    List(VecDeque<String>),
    Text(String),
    Hash(HashMap<String, i64>),
}

/// In-memory cache with redis-shaped semantics.
pub struct MemoryCache {
    inner: Mutex<HashMap<String, Slot>>,
    /// Woken on every enqueue so blocked pops re-check their list.
    signal: Notify,
}

impl Default for MemoryCache {
    fn default() -> Self {
        MemoryCache {
            inner: Mutex::new(HashMap::new()),
            signal: Notify::new(),
        }
    }
}

impl MemoryCache {
    /// Create an empty shared cache.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        // Lock poisoning only happens if a holder panicked; the map is still
        // structurally sound, so keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wrong_kind(key: &str, op: &'static str) -> CacheError {
        CacheError::WrongKind {
            key: key.to_string(),
            op,
        }
    }

    /// Pop the oldest element of the list at `key`, if any.
    fn try_pop(&self, key: &str, op: &'static str) -> CacheResult<Option<String>> {
        let mut inner = self.lock();
        let value = match inner.get_mut(key) {
            None => return Ok(None),
            Some(Slot::List(list)) => list.pop_front(),
            Some(_) => return Err(Self::wrong_kind(key, op)),
        };
        if matches!(inner.get(key), Some(Slot::List(list)) if list.is_empty()) {
            inner.remove(key);
        }
        Ok(value)
    }

    fn push(inner: &mut HashMap<String, Slot>, key: &str, value: String, op: &'static str) -> CacheResult<u64> {
        match inner.entry(key.to_string()).or_insert_with(|| Slot::List(VecDeque::new())) {
            Slot::List(list) => {
                list.push_back(value);
                Ok(list.len() as u64)
            }
            _ => Err(Self::wrong_kind(key, op)),
        }
    }

    /// Wait until the deadline for the list at `key` to yield an element.
    async fn pop_with_deadline(&self, key: &str, deadline: Instant, op: &'static str) -> CacheResult<Option<String>> {
        loop {
            let mut notified = pin!(self.signal.notified());
            // Arm the waiter before checking so an enqueue between the check
            // and the await still wakes us.
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(key, op)? {
                return Ok(Some(value));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

#[async_trait]
impl EventCache for MemoryCache {
    async fn lpush(&self, key: &str, value: String) -> CacheResult<u64> {
        let len = {
            let mut inner = self.lock();
            Self::push(&mut inner, key, value, "lpush")?
        };
        self.signal.notify_waiters();
        Ok(len)
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> CacheResult<Option<String>> {
        self.pop_with_deadline(key, Instant::now() + timeout, "blpop").await
    }

    async fn brpoplpush(&self, source: &str, destination: &str, timeout: Duration) -> CacheResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut notified = pin!(self.signal.notified());
            notified.as_mut().enable();

            // Move under one lock acquisition so the pop and push are atomic.
            let moved = {
                let mut inner = self.lock();
                let value = match inner.get_mut(source) {
                    None => None,
                    Some(Slot::List(list)) => list.pop_front(),
                    Some(_) => return Err(Self::wrong_kind(source, "brpoplpush")),
                };
                if let Some(value) = value {
                    Self::push(&mut inner, destination, value.clone(), "brpoplpush")?;
                    Some(value)
                } else {
                    None
                }
            };

            if let Some(value) = moved {
                self.signal.notify_waiters();
                return Ok(Some(value));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn llen(&self, key: &str) -> CacheResult<u64> {
        let inner = self.lock();
        match inner.get(key) {
            None => Ok(0),
            Some(Slot::List(list)) => Ok(list.len() as u64),
            Some(_) => Err(Self::wrong_kind(key, "llen")),
        }
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        let mut inner = self.lock();
        match inner.entry(key.to_string()).or_insert_with(|| Slot::Text("0".to_string())) {
            Slot::Text(text) => {
                let current: i64 = text.parse().map_err(|_| CacheError::BadValue {
                    key: key.to_string(),
                    op: "incr",
                    reason: "value is not an integer".to_string(),
                })?;
                let next = current + 1;
                *text = next.to_string();
                Ok(next)
            }
            _ => Err(Self::wrong_kind(key, "incr")),
        }
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64> {
        let mut inner = self.lock();
        match inner.entry(key.to_string()).or_insert_with(|| Slot::Hash(HashMap::new())) {
            Slot::Hash(hash) => {
                let value = hash.entry(field.to_string()).or_insert(0);
                *value += delta;
                Ok(*value)
            }
            _ => Err(Self::wrong_kind(key, "hincrby")),
        }
    }

    async fn hget_all(&self, key: &str) -> CacheResult<HashMap<String, i64>> {
        let inner = self.lock();
        match inner.get(key) {
            None => Ok(HashMap::new()),
            Some(Slot::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(Self::wrong_kind(key, "hgetall")),
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let inner = self.lock();
        match inner.get(key) {
            None => Ok(None),
            Some(Slot::Text(text)) => Ok(Some(text.clone())),
            Some(_) => Err(Self::wrong_kind(key, "get")),
        }
    }

    async fn set(&self, key: &str, value: String) -> CacheResult<()> {
        let mut inner = self.lock();
        inner.insert(key.to_string(), Slot::Text(value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn lists_are_fifo() {
        let cache = MemoryCache::new();
        cache.lpush("q", "a".to_string()).await.unwrap();
        cache.lpush("q", "b".to_string()).await.unwrap();
        cache.lpush("q", "c".to_string()).await.unwrap();

        assert_eq!(cache.llen("q").await.unwrap(), 3);
        assert_eq!(cache.blpop("q", Duration::from_millis(10)).await.unwrap(), Some("a".to_string()));
        assert_eq!(cache.blpop("q", Duration::from_millis(10)).await.unwrap(), Some("b".to_string()));
        assert_eq!(cache.blpop("q", Duration::from_millis(10)).await.unwrap(), Some("c".to_string()));
        assert_eq!(cache.blpop("q", Duration::from_millis(10)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn blpop_wakes_on_push() {
        let cache = MemoryCache::new();

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.blpop("q", Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.lpush("q", "x".to_string()).await.unwrap();

        let popped = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap().unwrap();
        assert_eq!(popped, Some("x".to_string()));
    }

    #[tokio::test]
    async fn brpoplpush_moves_atomically() {
        let cache = MemoryCache::new();
        cache.lpush("src", "a".to_string()).await.unwrap();
        cache.lpush("src", "b".to_string()).await.unwrap();

        let moved = cache.brpoplpush("src", "dst", Duration::from_millis(10)).await.unwrap();
        assert_eq!(moved, Some("a".to_string()));
        assert_eq!(cache.llen("src").await.unwrap(), 1);
        assert_eq!(cache.llen("dst").await.unwrap(), 1);

        // Timeout path when the source stays empty.
        let moved = cache.brpoplpush("empty", "dst", Duration::from_millis(10)).await.unwrap();
        assert_eq!(moved, None);
    }

    #[tokio::test]
    async fn incr_is_monotonic_from_zero() {
        let cache = MemoryCache::new();
        assert_eq!(cache.incr("n").await.unwrap(), 1);
        assert_eq!(cache.incr("n").await.unwrap(), 2);
        assert_eq!(cache.incr("n").await.unwrap(), 3);
        assert_eq!(cache.get("n").await.unwrap(), Some("3".to_string()));
    }

    #[tokio::test]
    async fn hash_counters() {
        let cache = MemoryCache::new();
        assert_eq!(cache.hincr_by("h", "total", 1).await.unwrap(), 1);
        assert_eq!(cache.hincr_by("h", "total", 1).await.unwrap(), 2);
        assert_eq!(cache.hincr_by("h", "failue", 1).await.unwrap(), 1);

        let all = cache.hget_all("h").await.unwrap();
        assert_eq!(all.get("total"), Some(&2));
        assert_eq!(all.get("failue"), Some(&1));
        assert!(cache.hget_all("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn kind_mismatch_is_an_error() {
        let cache = MemoryCache::new();
        cache.set("k", "text".to_string()).await.unwrap();
        assert!(cache.lpush("k", "x".to_string()).await.is_err());
        assert!(cache.hincr_by("k", "f", 1).await.is_err());
        assert!(cache.incr("k").await.is_err());

        cache.lpush("list", "x".to_string()).await.unwrap();
        assert!(cache.get("list").await.is_err());
    }
}
