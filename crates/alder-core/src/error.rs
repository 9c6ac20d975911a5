//! Error types for core cache and cursor operations.

use snafu::Snafu;

/// Errors from the shared event cache.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CacheError {
    /// The key exists but holds a value of a different kind.
    #[snafu(display("key '{key}' holds the wrong value kind for {op}"))]
    WrongKind {
        /// The offending cache key.
        key: String,
        /// The operation that was attempted.
        op: &'static str,
    },

    /// The stored value could not be interpreted for the operation.
    #[snafu(display("value at key '{key}' is not usable for {op}: {reason}"))]
    BadValue {
        /// The offending cache key.
        key: String,
        /// The operation that was attempted.
        op: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The cache backend failed.
    #[snafu(display("cache backend failed: {message}"))]
    Backend {
        /// Backend error message.
        message: String,
    },
}

/// Errors from cursor encoding and decoding.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CursorError {
    /// The cursor token could not be decoded.
    #[snafu(display("malformed cursor '{cursor}': {reason}"))]
    Malformed {
        /// The raw cursor token.
        cursor: String,
        /// Why decoding failed.
        reason: String,
    },

    /// The cursor names a resource this service does not know.
    #[snafu(display("cursor names unknown resource '{resource}'"))]
    UnknownResource {
        /// The unrecognized resource token.
        resource: String,
    },
}

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
