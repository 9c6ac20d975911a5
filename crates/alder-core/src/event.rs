//! Event data model: log nodes, watch details, event instances, and the
//! per-subscriber fan-out record.
//!
//! Wire format is JSON end to end: watch responses, queued events, and
//! subscriber callbacks all carry these types serialized with serde_json.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::cursor::ClusterTime;
use crate::cursor::CursorType;

/// Inner object type tokens carried in events and subscription forms.
pub mod obj_type {
    /// Host instances.
    pub const HOST: &str = "host";
    /// Business instances.
    pub const APP: &str = "app";
    /// Set instances.
    pub const SET: &str = "set";
    /// Module instances.
    pub const MODULE: &str = "module";
    /// Generic object instances before per-object refinement.
    pub const OBJECT: &str = "object";
    /// Host-module transfer relations.
    pub const MODULE_TRANSFER: &str = "moduletransfer";
}

/// Payload field naming the concrete object type of a generic object event.
pub const OBJ_ID_FIELD: &str = "bk_obj_id";

/// Change kind recorded on a log node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

/// Event category of a fan-out record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// An instance document changed.
    InstanceData,
    /// A relation between instances changed.
    Relation,
}

/// Action of a fan-out record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Create,
    Update,
    Delete,
}

impl EventAction {
    /// Token used when composing subscription-form event types.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventAction::Create => "create",
            EventAction::Update => "update",
            EventAction::Delete => "delete",
        }
    }
}

impl From<EventKind> for EventAction {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Create => EventAction::Create,
            EventKind::Update => EventAction::Update,
            EventKind::Delete => EventAction::Delete,
        }
    }
}

/// One element of the shared append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchNode {
    /// Opaque cursor identifying this node.
    pub cursor: String,
    /// Resource stream the node belongs to.
    pub resource: CursorType,
    /// Change kind.
    pub kind: EventKind,
    /// Cluster time the change was observed.
    pub cluster_time: ClusterTime,
    /// Full change detail document.
    pub detail: Value,
}

/// A hydrated watch event handed to clients and to the distributor.
///
/// Synthetic details (cursor echoes, the no-event sentinel) carry a cursor
/// and resource only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEventDetail {
    pub cursor: String,
    pub resource: CursorType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<EventKind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<Value>,
}

impl WatchEventDetail {
    /// A synthetic detail carrying only a cursor for the client to replay.
    pub fn synthetic(cursor: impl Into<String>, resource: CursorType) -> Self {
        WatchEventDetail {
            cursor: cursor.into(),
            resource,
            kind: None,
            detail: None,
        }
    }
}

/// Options accepted by the watch API.
///
/// Precedence: `cursor`, then `start_from`, then from-now.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchEventOptions {
    /// Resume after this cursor.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cursor: Option<String>,
    /// Resume from the first node observed at or after this Unix second.
    #[serde(default)]
    pub start_from: u64,
    /// Event kinds to deliver; empty means all.
    #[serde(default)]
    pub event_types: Vec<EventKind>,
}

/// Watch API response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchResp {
    /// Whether any real events were hit.
    pub watched: bool,
    /// Hit events, or a single synthetic detail when `watched` is false.
    pub events: Vec<WatchEventDetail>,
}

/// Before/after images of one changed document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    /// Document image before the change. Delete events carry only this.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pre_data: Option<Value>,
    /// Document image after the change.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cur_data: Option<Value>,
}

/// A raw event popped from the main queue, before fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInst {
    /// Cursor of the log node this event came from.
    pub cursor: String,
    /// Event category.
    pub event_type: EventType,
    /// Inner or refined object type token.
    pub obj_type: String,
    /// What happened.
    pub action: EventAction,
    /// Unix second the action was observed; drives the fusing window.
    pub action_time: u64,
    /// Changed documents.
    pub data: Vec<EventData>,
}

impl EventInst {
    /// The subscription-form event type this event matches: relation events
    /// use the object type alone, instance events compose type and action
    /// (`hostcreate`, `appupdate`, ...).
    pub fn subscription_type(&self) -> String {
        match self.event_type {
            EventType::Relation => self.obj_type.clone(),
            EventType::InstanceData => format!("{}{}", self.obj_type, self.action.as_str()),
        }
    }
}

/// A fan-out record: one event addressed to one subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistInst {
    #[serde(flatten)]
    pub event: EventInst,
    /// The subscriber this record is addressed to.
    pub subscription_id: i64,
    /// Per-subscription monotonic delivery id.
    pub dstb_id: i64,
}

/// Static routing of a watched resource to the event shape it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRoute {
    pub event_type: EventType,
    pub obj_type: &'static str,
}

/// The closed resource routing table. Generic object events are refined
/// further from the payload's `bk_obj_id` field at fan-out time.
pub const fn route_for(resource: CursorType) -> ResourceRoute {
    match resource {
        CursorType::Host => ResourceRoute {
            event_type: EventType::InstanceData,
            obj_type: obj_type::HOST,
        },
        CursorType::ModuleHostRelation => ResourceRoute {
            event_type: EventType::Relation,
            obj_type: obj_type::MODULE_TRANSFER,
        },
        CursorType::Biz => ResourceRoute {
            event_type: EventType::InstanceData,
            obj_type: obj_type::APP,
        },
        CursorType::Set => ResourceRoute {
            event_type: EventType::InstanceData,
            obj_type: obj_type::SET,
        },
        CursorType::Module => ResourceRoute {
            event_type: EventType::InstanceData,
            obj_type: obj_type::MODULE,
        },
        CursorType::ObjectBase => ResourceRoute {
            event_type: EventType::InstanceData,
            obj_type: obj_type::OBJECT,
        },
    }
}
