//! Resource watcher: cursor-ordered reads over the shared event log.
//!
//! Serves both the external watch API (cursor / start-from / from-now
//! entry points) and the distributor's internal watch-and-distribute loops
//! (`nodes_from_cursor` plus filtering and hydration).

use std::sync::Arc;

use alder_core::CursorType;
use alder_core::EventKind;
use alder_core::NO_EVENT_CURSOR;
use alder_core::WatchEventDetail;
use alder_core::WatchEventOptions;
use alder_core::WatchNode;
use alder_core::constants::DEFAULT_WATCH_EVENT_STEP_SIZE;
use tracing::debug;

use crate::error::EventLogError;
use crate::log::EventLog;

/// Cursor-ordered reader over one shared event log.
pub struct ResourceWatcher {
    log: Arc<dyn EventLog>,
}

impl ResourceWatcher {
    /// Create a watcher over `log`.
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        ResourceWatcher { log }
    }

    /// Up to `limit` successor nodes after `start_cursor` in resource order.
    ///
    /// An empty result is not an error. Fails with
    /// [`EventLogError::HeadNodeNotExist`] when the cursor precedes the
    /// retained window; callers back off and resume from the head.
    pub async fn nodes_from_cursor(
        &self,
        limit: usize,
        start_cursor: &str,
        resource: CursorType,
    ) -> Result<Vec<WatchNode>, EventLogError> {
        self.log.nodes_from_cursor(resource, start_cursor, limit).await
    }

    /// Keep the nodes whose kind is in `kinds`, preserving order. An empty
    /// set means all kinds hit.
    pub fn hit_nodes_with_kinds(nodes: Vec<WatchNode>, kinds: &[EventKind]) -> Vec<WatchNode> {
        if kinds.is_empty() {
            return nodes;
        }
        nodes.into_iter().filter(|n| kinds.contains(&n.kind)).collect()
    }

    /// Hydrate nodes into full event details, preserving order. `rid` is
    /// opaque provenance for diagnostics.
    pub fn events_from_nodes(&self, nodes: Vec<WatchNode>, resource: CursorType, rid: &str) -> Vec<WatchEventDetail> {
        debug!(resource = %resource, count = nodes.len(), rid, "hydrating watch nodes");
        nodes
            .into_iter()
            .map(|node| WatchEventDetail {
                cursor: node.cursor,
                resource: node.resource,
                kind: Some(node.kind),
                detail: Some(node.detail),
            })
            .collect()
    }

    /// Resume from a client-provided cursor.
    ///
    /// Idempotent with respect to read position: nothing new after the
    /// cursor yields an empty result, and the service layer echoes the
    /// client's cursor so it can retry with the same one. A window of nodes
    /// that all fail the kind filter yields the last node's cursor so the
    /// client skips past them.
    pub async fn watch_with_cursor(
        &self,
        resource: CursorType,
        options: &WatchEventOptions,
        rid: &str,
    ) -> Result<Vec<WatchEventDetail>, EventLogError> {
        let start = options.cursor.as_deref().unwrap_or(NO_EVENT_CURSOR);
        if start == NO_EVENT_CURSOR {
            // The client's last call saw an empty stream; hand back the
            // newest position again instead of failing the sentinel decode.
            let detail = self.watch_from_now(resource, options, rid).await?;
            return Ok(vec![detail]);
        }

        let nodes = self.nodes_from_cursor(DEFAULT_WATCH_EVENT_STEP_SIZE, start, resource).await?;
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let last_cursor = nodes[nodes.len() - 1].cursor.clone();
        let hits = Self::hit_nodes_with_kinds(nodes, &options.event_types);
        if hits.is_empty() {
            return Ok(vec![WatchEventDetail::synthetic(last_cursor, resource)]);
        }

        Ok(self.events_from_nodes(hits, resource, rid))
    }

    /// Resume from the first node observed at or after `options.start_from`
    /// (Unix seconds).
    pub async fn watch_with_start_from(
        &self,
        resource: CursorType,
        options: &WatchEventOptions,
        rid: &str,
    ) -> Result<Vec<WatchEventDetail>, EventLogError> {
        let mut start = resource.head_key();

        loop {
            let nodes = self.nodes_from_cursor(DEFAULT_WATCH_EVENT_STEP_SIZE, &start, resource).await?;
            if nodes.is_empty() {
                return Ok(Vec::new());
            }

            let last_cursor = nodes[nodes.len() - 1].cursor.clone();
            let reached: Vec<WatchNode> =
                nodes.into_iter().filter(|n| n.cluster_time.sec >= options.start_from).collect();

            if reached.is_empty() {
                // The whole page predates start_from; keep scanning forward.
                start = last_cursor;
                continue;
            }

            let hits = Self::hit_nodes_with_kinds(reached, &options.event_types);
            return Ok(self.events_from_nodes(hits, resource, rid));
        }
    }

    /// Watch from now: hand back the newest position so the client can
    /// follow with `watch_with_cursor`, skipping all history.
    pub async fn watch_from_now(
        &self,
        resource: CursorType,
        _options: &WatchEventOptions,
        rid: &str,
    ) -> Result<WatchEventDetail, EventLogError> {
        match self.log.latest_node(resource).await? {
            Some(node) => {
                debug!(resource = %resource, cursor = %node.cursor, rid, "watching from current position");
                Ok(WatchEventDetail::synthetic(node.cursor, resource))
            }
            None => Ok(WatchEventDetail::synthetic(NO_EVENT_CURSOR, resource)),
        }
    }
}
