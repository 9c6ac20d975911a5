//! Cursor types for resumable watches over the shared event log.
//!
//! A cursor is an opaque ordered token identifying a position in one
//! resource's event stream. It decodes to the resource, the cluster
//! timestamp of the node it points at, and the node's per-resource sequence
//! id. Ordering is total within a resource; there is no cross-resource
//! order.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde::Serialize;

use crate::error::CursorError;

/// Sentinel cursor meaning "no events at or after the current position".
///
/// Clients receiving it re-present their prior cursor (or start over) on the
/// next call; it is never a valid read position.
pub const NO_EVENT_CURSOR: &str = "no-event-cursor";

/// The watchable resource streams, one cursor sequence each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorType {
    /// Host instances.
    Host,
    /// Host-to-module membership relations.
    ModuleHostRelation,
    /// Business instances.
    Biz,
    /// Set instances.
    Set,
    /// Module instances.
    Module,
    /// Generic object instances (refined per-object via the event payload).
    ObjectBase,
}

impl CursorType {
    /// All cursor types, in the order the distributor spawns watch loops.
    pub const fn all() -> [CursorType; 6] {
        [
            CursorType::Host,
            CursorType::ModuleHostRelation,
            CursorType::Biz,
            CursorType::Set,
            CursorType::Module,
            CursorType::ObjectBase,
        ]
    }

    /// Stable token used in cursors, URLs, and head keys.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CursorType::Host => "host",
            CursorType::ModuleHostRelation => "module_host_relation",
            CursorType::Biz => "biz",
            CursorType::Set => "set",
            CursorType::Module => "module",
            CursorType::ObjectBase => "object_base",
        }
    }

    /// Parse a resource token as it appears in request paths and cursors.
    pub fn parse(token: &str) -> Option<CursorType> {
        match token {
            "host" => Some(CursorType::Host),
            "module_host_relation" => Some(CursorType::ModuleHostRelation),
            "biz" => Some(CursorType::Biz),
            "set" => Some(CursorType::Set),
            "module" => Some(CursorType::Module),
            "object_base" => Some(CursorType::ObjectBase),
            _ => None,
        }
    }

    /// Map a subscription-form event-type token (`hostcreate`,
    /// `moduletransfer`, `appupdate`, ...) to the cursor type whose stream
    /// carries those events.
    ///
    /// `moduletransfer` must be checked before the `module` prefix.
    pub fn from_subscription_token(token: &str) -> Option<CursorType> {
        if token == "moduletransfer" {
            return Some(CursorType::ModuleHostRelation);
        }
        if token.starts_with("host") {
            return Some(CursorType::Host);
        }
        if token.starts_with("app") {
            return Some(CursorType::Biz);
        }
        if token.starts_with("set") {
            return Some(CursorType::Set);
        }
        if token.starts_with("module") {
            return Some(CursorType::Module);
        }
        if token.starts_with("object") {
            return Some(CursorType::ObjectBase);
        }
        None
    }

    /// The start token naming this resource's earliest retained log node.
    pub fn head_key(&self) -> String {
        format!("head:{}", self.as_str())
    }
}

impl std::fmt::Display for CursorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cluster timestamp attached to every log node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ClusterTime {
    /// Seconds since the Unix epoch.
    pub sec: u64,
    /// Sub-second nanoseconds.
    pub nsec: u32,
}

impl ClusterTime {
    /// Cluster time from whole seconds.
    pub const fn from_sec(sec: u64) -> Self {
        ClusterTime { sec, nsec: 0 }
    }
}

/// A decoded cursor: position of one node in one resource's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// The resource stream this cursor belongs to.
    pub resource: CursorType,
    /// Cluster time of the node the cursor points at.
    pub cluster_time: ClusterTime,
    /// Per-resource monotonic sequence id of the node.
    pub id: u64,
}

impl Cursor {
    /// Encode into the opaque token handed to clients and persisted per
    /// subscriber.
    pub fn encode(&self) -> String {
        let raw = format!(
            "{}:{}:{}:{}",
            self.resource.as_str(),
            self.cluster_time.sec,
            self.cluster_time.nsec,
            self.id
        );
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Decode an opaque cursor token.
    pub fn decode(token: &str) -> Result<Cursor, CursorError> {
        let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|e| CursorError::Malformed {
            cursor: token.to_string(),
            reason: e.to_string(),
        })?;
        let raw = String::from_utf8(bytes).map_err(|e| CursorError::Malformed {
            cursor: token.to_string(),
            reason: e.to_string(),
        })?;

        let mut parts = raw.split(':');
        let resource = parts.next().unwrap_or_default();
        let resource = CursorType::parse(resource).ok_or_else(|| CursorError::UnknownResource {
            resource: resource.to_string(),
        })?;

        let mut next_u64 = |what: &str| -> Result<u64, CursorError> {
            parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| CursorError::Malformed {
                    cursor: token.to_string(),
                    reason: format!("missing or non-numeric {what}"),
                })
        };

        let sec = next_u64("cluster time seconds")?;
        let nsec = next_u64("cluster time nanoseconds")? as u32;
        let id = next_u64("sequence id")?;

        Ok(Cursor {
            resource,
            cluster_time: ClusterTime { sec, nsec },
            id,
        })
    }
}
