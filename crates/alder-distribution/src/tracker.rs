//! Resource cursor tracker: the replay floor per cursor type.
//!
//! Senders persist a subscriber's cursor only after a confirmed callback, so
//! the oldest persisted cursor across the live subscribers of a cursor type
//! is a lower bound on what every subscriber has acknowledged. The
//! watch-and-distribute loops never advance their start past this floor.
//!
//! The floor per cursor type is a cached artifact refreshed by scanning
//! persisted cursors out of the shared cache. Refreshes coalesce through a
//! [`RefreshLock`]: the first caller scans, concurrent callers serve the
//! last known floor and return immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use alder_core::Cursor;
use alder_core::CursorType;
use alder_core::EventCache;
use alder_core::keys;

use crate::error::Result;
use crate::refresh::RefreshLock;
use crate::registry::SubscriptionRegistry;

/// Computes and remembers the oldest live subscriber cursor per cursor type.
pub struct CursorTracker {
    registry: Arc<SubscriptionRegistry>,
    cache: Arc<dyn EventCache>,
    /// Last known floor per cursor type; sticky across scans that find no
    /// persisted cursor so a briefly-empty index does not reset replay to
    /// the log head.
    floors: RwLock<HashMap<CursorType, Cursor>>,
    /// Single-flight guard keyed by cursor type; losers read the stale
    /// floor.
    refresh_lock: RefreshLock,
}

impl CursorTracker {
    /// Create a tracker over the registry's subscriber index.
    pub fn new(registry: Arc<SubscriptionRegistry>, cache: Arc<dyn EventCache>) -> Self {
        CursorTracker {
            registry,
            cache,
            floors: RwLock::new(HashMap::new()),
            refresh_lock: RefreshLock::new(),
        }
    }

    /// The oldest persisted subscriber cursor for `cursor_type`, or `None`
    /// when no subscriber of that type has ever persisted one.
    ///
    /// Concurrent calls for the same cursor type do not stack cache scans:
    /// whoever loses the refresh race gets the last known floor back
    /// without touching the cache.
    pub async fn resource_cursor(&self, cursor_type: CursorType) -> Result<Option<Cursor>> {
        let refresh_key = cursor_type.as_str();
        if !self.refresh_lock.can_refresh(refresh_key) {
            return Ok(self.floor(cursor_type));
        }

        self.refresh_lock.set_refreshing(refresh_key);
        let scanned = self.scan_oldest(cursor_type).await;
        self.refresh_lock.set_unrefreshing(refresh_key);
        let oldest = scanned?;

        let mut floors = self.floors.write().unwrap_or_else(|e| e.into_inner());
        if let Some(cursor) = oldest {
            floors.insert(cursor_type, cursor);
        }
        Ok(floors.get(&cursor_type).cloned())
    }

    /// The last known floor for `cursor_type`, if any.
    fn floor(&self, cursor_type: CursorType) -> Option<Cursor> {
        self.floors.read().unwrap_or_else(|e| e.into_inner()).get(&cursor_type).cloned()
    }

    /// Scan every subscriber of `cursor_type` for its persisted cursor and
    /// return the oldest by cluster time.
    async fn scan_oldest(&self, cursor_type: CursorType) -> Result<Option<Cursor>> {
        // Snapshot the index first; cache reads happen without any lock.
        let snapshot = self.registry.subscriber_snapshot();

        let mut oldest: Option<Cursor> = None;
        for (key, subids) in snapshot {
            if CursorType::from_subscription_token(&key.event_type) != Some(cursor_type) {
                continue;
            }

            for subid in subids {
                let cursor_key = keys::subscriber_cursor(&key.owner_id, &key.event_type, subid);
                let Some(raw) = self.cache.get(&cursor_key).await? else {
                    continue;
                };
                if raw.is_empty() {
                    continue;
                }

                let cursor = Cursor::decode(&raw)?;
                let is_older = oldest.as_ref().is_none_or(|o| cursor.cluster_time.sec < o.cluster_time.sec);
                if is_older {
                    oldest = Some(cursor);
                }
            }
        }

        Ok(oldest)
    }
}
