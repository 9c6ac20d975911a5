//! Per-key single-flight guard for cache refreshes.
//!
//! Concurrent refreshes of the same cached artifact coalesce into a single
//! background worker: the first caller through [`RefreshLock::can_refresh`]
//! marks the key and does the work, later callers see `false`, serve the
//! stale value, and return immediately. Nothing here blocks beyond the map
//! mutex.

use std::collections::HashMap;
use std::sync::Mutex;

/// Tracks which cache keys have a refresh in progress.
#[derive(Debug, Default)]
pub struct RefreshLock {
    /// true: refreshing, false: not refreshing. Absence counts as not
    /// refreshing.
    refreshing: Mutex<HashMap<String, bool>>,
}

impl RefreshLock {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, bool>> {
        self.refreshing.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True iff no refresh of `key` is in progress. A previously unseen key
    /// is recorded as not-refreshing.
    pub fn can_refresh(&self, key: &str) -> bool {
        let mut refreshing = self.lock();
        match refreshing.get(key) {
            Some(in_progress) => !in_progress,
            None => {
                refreshing.insert(key.to_string(), false);
                true
            }
        }
    }

    /// Mark `key` as having a refresh in progress.
    pub fn set_refreshing(&self, key: &str) {
        self.lock().insert(key.to_string(), true);
    }

    /// Mark `key`'s refresh as finished.
    pub fn set_unrefreshing(&self, key: &str) {
        self.lock().insert(key.to_string(), false);
    }
}
