//! The event distribution engine.
//!
//! Consumes an ordered, resumable stream of resource-change events from the
//! shared event log, mirrors subscription documents from the control-plane
//! store, partitions subscriber work across distributor instances with a
//! consistent hash ring, and delivers each event to each owned subscriber's
//! HTTP callback with at-least-once semantics.
//!
//! # Architecture
//!
//! ```text
//! event log ──▶ WatchLoop (per cursor type) ──▶ EventHandler.handle
//!                    ▲  floor                        │ main queue
//!               CursorTracker                        ▼
//!                    ▲                          pump (BRPOPLPUSH)
//!      SubscriptionRegistry ◀── list-and-watch       │ fan-out × ring
//!                    ▲                               ▼
//!            control-plane store           EventSender (per subid)
//!                                                    │ POST + confirm
//!                                                    ▼
//!                                          subscriber callback URL
//! ```

pub mod distributor;
pub mod error;
pub mod handler;
pub mod latch;
pub mod log;
pub mod reflector;
pub mod refresh;
pub mod registry;
pub mod ring;
pub mod sender;
pub mod tracker;
pub mod watcher;

pub use distributor::Distributor;
pub use error::DistributionError;
pub use error::EventLogError;
pub use error::SendError;
pub use handler::EventHandler;
pub use latch::Latch;
pub use log::EventLog;
pub use log::MemoryEventLog;
pub use reflector::MemorySubscriptionStore;
pub use reflector::SubscriptionEvent;
pub use reflector::SubscriptionWatcher;
pub use refresh::RefreshLock;
pub use registry::SubscriberKey;
pub use registry::SubscriptionRegistry;
pub use ring::HashRing;
pub use sender::EventSender;
pub use tracker::CursorTracker;
pub use watcher::ResourceWatcher;
