//! Core types and cache abstraction for the alder event distribution
//! service.
//!
//! This crate holds everything the distribution engine and the watch API
//! share: cursor and event data models, subscription documents, the
//! [`EventCache`] trait naming the shared-cache primitives the engine
//! requires, an in-memory cache for tests and embedded deployments, and the
//! cache keyspace.

pub mod cache;
pub mod constants;
pub mod cursor;
pub mod error;
pub mod event;
pub mod memory;
pub mod subscription;

pub use cache::EventCache;
pub use cache::keys;
pub use cursor::ClusterTime;
pub use cursor::Cursor;
pub use cursor::CursorType;
pub use cursor::NO_EVENT_CURSOR;
pub use error::CacheError;
pub use error::CursorError;
pub use event::DistInst;
pub use event::EventAction;
pub use event::EventData;
pub use event::EventInst;
pub use event::EventKind;
pub use event::EventType;
pub use event::ResourceRoute;
pub use event::WatchEventDetail;
pub use event::WatchEventOptions;
pub use event::WatchNode;
pub use event::WatchResp;
pub use event::route_for;
pub use memory::MemoryCache;
pub use subscription::ConfirmMode;
pub use subscription::Subscription;
pub use subscription::SubscriptionId;

/// Current Unix time in whole seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
