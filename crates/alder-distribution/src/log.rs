//! The shared event log interface and an in-memory implementation.
//!
//! The log is append-only, keyed by resource, and retains a bounded window
//! of nodes per resource. Consumers read forward from a cursor and must
//! tolerate [`EventLogError::HeadNodeNotExist`] when their cursor has fallen
//! off the retention window.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use alder_core::ClusterTime;
use alder_core::Cursor;
use alder_core::CursorType;
use alder_core::EventKind;
use alder_core::WatchNode;
use alder_core::unix_now;
use async_trait::async_trait;
use serde_json::Value;

use crate::error::EventLogError;

/// Read-only access to the shared resource-change log.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Up to `limit` nodes after `start_cursor` in resource order.
    ///
    /// `start_cursor` is either an encoded cursor or the resource's head key
    /// (start from the earliest retained node). An empty result is not an
    /// error; a cursor preceding the retained window fails with
    /// [`EventLogError::HeadNodeNotExist`].
    async fn nodes_from_cursor(
        &self,
        resource: CursorType,
        start_cursor: &str,
        limit: usize,
    ) -> Result<Vec<WatchNode>, EventLogError>;

    /// The earliest retained node of `resource`, if any.
    async fn head_node(&self, resource: CursorType) -> Result<Option<WatchNode>, EventLogError>;

    /// The most recent node of `resource`, if any.
    async fn latest_node(&self, resource: CursorType) -> Result<Option<WatchNode>, EventLogError>;
}

#[async_trait]
impl<T: EventLog + ?Sized> EventLog for Arc<T> {
    async fn nodes_from_cursor(
        &self,
        resource: CursorType,
        start_cursor: &str,
        limit: usize,
    ) -> Result<Vec<WatchNode>, EventLogError> {
        (**self).nodes_from_cursor(resource, start_cursor, limit).await
    }

    async fn head_node(&self, resource: CursorType) -> Result<Option<WatchNode>, EventLogError> {
        (**self).head_node(resource).await
    }

    async fn latest_node(&self, resource: CursorType) -> Result<Option<WatchNode>, EventLogError> {
        (**self).latest_node(resource).await
    }
}

#[derive(Debug, Default)]
struct ResourceLog {
    nodes: VecDeque<WatchNode>,
    /// Sequence id the next appended node receives; ids start at 1.
    next_id: u64,
}

impl ResourceLog {
    /// Sequence id of the earliest retained node, or `next_id` when empty.
    fn first_retained_id(&self) -> u64 {
        self.nodes.front().map(|n| decoded_id(n)).unwrap_or(self.next_id)
    }
}

/// Sequence id baked into a node's cursor. Nodes in the in-memory log always
/// carry cursors this log minted, so the decode cannot fail.
fn decoded_id(node: &WatchNode) -> u64 {
    Cursor::decode(&node.cursor).map(|c| c.id).unwrap_or_default()
}

/// In-memory append-only event log for tests and embedded deployments.
pub struct MemoryEventLog {
    inner: Mutex<HashMap<CursorType, ResourceLog>>,
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        MemoryEventLog {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl MemoryEventLog {
    /// Create an empty shared log.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CursorType, ResourceLog>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a node observed now. Returns its cursor.
    pub fn append(&self, resource: CursorType, kind: EventKind, detail: Value) -> String {
        self.append_at(resource, kind, detail, ClusterTime::from_sec(unix_now()))
    }

    /// Append a node with an explicit cluster time. Returns its cursor.
    pub fn append_at(&self, resource: CursorType, kind: EventKind, detail: Value, cluster_time: ClusterTime) -> String {
        let mut inner = self.lock();
        let log = inner.entry(resource).or_insert_with(|| ResourceLog {
            nodes: VecDeque::new(),
            next_id: 1,
        });

        let id = log.next_id;
        log.next_id += 1;

        let cursor = Cursor {
            resource,
            cluster_time,
            id,
        }
        .encode();

        log.nodes.push_back(WatchNode {
            cursor: cursor.clone(),
            resource,
            kind,
            cluster_time,
            detail,
        });

        cursor
    }

    /// Drop retained nodes with sequence id below `keep_from_id`, simulating
    /// the retention window advancing.
    pub fn truncate_before(&self, resource: CursorType, keep_from_id: u64) {
        let mut inner = self.lock();
        if let Some(log) = inner.get_mut(&resource) {
            while log.nodes.front().is_some_and(|n| decoded_id(n) < keep_from_id) {
                log.nodes.pop_front();
            }
        }
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn nodes_from_cursor(
        &self,
        resource: CursorType,
        start_cursor: &str,
        limit: usize,
    ) -> Result<Vec<WatchNode>, EventLogError> {
        let inner = self.lock();
        let Some(log) = inner.get(&resource) else {
            if start_cursor == resource.head_key() {
                return Ok(Vec::new());
            }
            // Validate the cursor even when the resource has no log yet.
            Cursor::decode(start_cursor).map_err(|source| EventLogError::BadCursor { source })?;
            return Ok(Vec::new());
        };

        let after_id = if start_cursor == resource.head_key() {
            0
        } else {
            let cursor = Cursor::decode(start_cursor).map_err(|source| EventLogError::BadCursor { source })?;
            // The successor of the cursor must still be retained, otherwise
            // events were lost to truncation.
            if cursor.id.saturating_add(1) < log.first_retained_id() {
                return Err(EventLogError::HeadNodeNotExist {
                    resource: resource.as_str().to_string(),
                });
            }
            cursor.id
        };

        Ok(log.nodes.iter().filter(|n| decoded_id(n) > after_id).take(limit).cloned().collect())
    }

    async fn head_node(&self, resource: CursorType) -> Result<Option<WatchNode>, EventLogError> {
        Ok(self.lock().get(&resource).and_then(|l| l.nodes.front().cloned()))
    }

    async fn latest_node(&self, resource: CursorType) -> Result<Option<WatchNode>, EventLogError> {
        Ok(self.lock().get(&resource).and_then(|l| l.nodes.back().cloned()))
    }
}
