//! Error types for the distribution engine.

use alder_core::CacheError;
use alder_core::CursorError;
use snafu::Snafu;

/// Errors from reading the shared event log.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EventLogError {
    /// The start cursor precedes the earliest node the log still retains.
    /// The caller backs off and resumes from the resource head.
    #[snafu(display("start cursor precedes the earliest retained node of '{resource}'"))]
    HeadNodeNotExist {
        /// The resource whose window the cursor fell out of.
        resource: String,
    },

    /// The start cursor could not be decoded.
    #[snafu(display("bad start cursor: {source}"))]
    BadCursor {
        /// The underlying decode failure.
        source: CursorError,
    },

    /// The log backend failed.
    #[snafu(display("event log backend failed: {message}"))]
    Backend {
        /// Backend error message.
        message: String,
    },
}

impl EventLogError {
    /// Whether this is the retention-window miss the watch loops recover
    /// from by resetting to the resource head.
    pub fn is_head_node_missing(&self) -> bool {
        matches!(self, EventLogError::HeadNodeNotExist { .. })
    }
}

/// Errors from the distribution engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DistributionError {
    /// A cache operation failed.
    #[snafu(display("cache operation failed: {source}"))]
    Cache {
        /// The underlying cache error.
        source: CacheError,
    },

    /// An event log operation failed.
    #[snafu(display("event log operation failed: {source}"))]
    Log {
        /// The underlying log error.
        source: EventLogError,
    },

    /// A persisted cursor could not be decoded.
    #[snafu(display("cursor handling failed: {source}"))]
    Cursor {
        /// The underlying cursor error.
        source: CursorError,
    },

    /// The subscription list-and-watch session failed.
    #[snafu(display("subscription watch failed: {message}"))]
    SubscriptionStream {
        /// What went wrong.
        message: String,
    },

    /// The hash ring has no member instances; no work can be owned.
    #[snafu(display("hash ring has no member instances"))]
    RingEmpty,

    /// An event payload could not be serialized or deserialized.
    #[snafu(display("event payload handling failed: {message}"))]
    Serialization {
        /// What went wrong.
        message: String,
    },

    /// An event carried data that cannot be fanned out.
    #[snafu(display("malformed event: {message}"))]
    MalformedEvent {
        /// What was wrong with the event.
        message: String,
    },
}

impl From<CacheError> for DistributionError {
    fn from(source: CacheError) -> Self {
        DistributionError::Cache { source }
    }
}

impl From<EventLogError> for DistributionError {
    fn from(source: EventLogError) -> Self {
        DistributionError::Log { source }
    }
}

impl From<CursorError> for DistributionError {
    fn from(source: CursorError) -> Self {
        DistributionError::Cursor { source }
    }
}

/// Result type for distribution operations.
pub type Result<T> = std::result::Result<T, DistributionError>;

/// Errors from one callback delivery attempt.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SendError {
    /// The subscription vanished from the registry before delivery.
    #[snafu(display("subscription {subscription_id} not found"))]
    SubscriptionNotFound {
        /// The missing subscription.
        subscription_id: i64,
    },

    /// The dist inst could not be serialized for the callback body.
    #[snafu(display("marshaling dist inst failed: {message}"))]
    Marshal {
        /// Serializer error message.
        message: String,
    },

    /// The HTTP request failed before a response was read.
    #[snafu(display("callback request failed: {message}"))]
    Request {
        /// Transport error message.
        message: String,
    },

    /// The subscriber's confirm pattern does not compile.
    #[snafu(display("confirm pattern '{pattern}' is invalid: {message}"))]
    BadPattern {
        /// The configured pattern.
        pattern: String,
        /// Why it failed to compile.
        message: String,
    },

    /// The callback responded but the confirmation predicate failed.
    #[snafu(display("callback not confirmed, received: {received}"))]
    ConfirmFailed {
        /// Status or body snippet the subscriber returned.
        received: String,
    },
}
