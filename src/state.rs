//! Shared application state for the watch API.

use std::sync::Arc;

use alder_distribution::ResourceWatcher;

/// State handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Cursor-ordered reader over the shared event log.
    pub watcher: Arc<ResourceWatcher>,
}

impl AppState {
    /// Create state around a resource watcher.
    pub fn new(watcher: Arc<ResourceWatcher>) -> Self {
        AppState { watcher }
    }
}
