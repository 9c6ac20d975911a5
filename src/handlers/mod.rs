//! HTTP request handlers.

pub mod watch;

pub use watch::healthz;
pub use watch::watch_event;
