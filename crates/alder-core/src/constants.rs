//! Cache keyspace and timing constants shared across the distribution engine.

use std::time::Duration;

/// Main event queue (list). The distributor's watch loops push raw events
/// here; the pump drains it.
pub const EVENT_QUEUE_KEY: &str = "alder:event:queue";

/// Duplicate event queue (list). The pump atomically moves every popped event
/// here for the identifier enrichment pipeline, which runs outside this
/// service.
pub const EVENT_QUEUE_DUPLICATE_KEY: &str = "alder:event:queue:duplicate";

/// Per-subscriber event queue key prefix; the subscription id is appended.
pub const SUBSCRIBER_QUEUE_KEY_PREFIX: &str = "alder:event:subscriber:queue:";

/// Per-subscription monotonic dist id counter prefix.
pub const DIST_ID_KEY_PREFIX: &str = "alder:event:dist:id:";

/// Per-subscription callback counter hash prefix (fields `total`, `failue`).
pub const CALLBACK_COUNT_KEY_PREFIX: &str = "alder:event:dist:callback:count:";

/// Persisted subscriber cursor key prefix; `owner:event_type:subid` follows.
pub const SUBSCRIBER_CURSOR_KEY_PREFIX: &str = "alder:event:subscriber:cursor:";

/// Sentinel placeholder some cache backends hand back for an absent value.
pub const NIL_STR: &str = "nil";

/// Attempt counter field in the callback counter hash.
pub const CALLBACK_TOTAL_FIELD: &str = "total";

/// Failure counter field in the callback counter hash.
///
/// The misspelling is persisted wire state shared with existing deployments;
/// keep as-is.
pub const CALLBACK_FAILURE_FIELD: &str = "failue";

/// Page size for the subscription list-and-watch session.
pub const DEFAULT_LIST_WATCH_PAGE_SIZE: u32 = 500;

/// Maximum nodes fetched per watch step.
pub const DEFAULT_WATCH_EVENT_STEP_SIZE: usize = 200;

/// Idle/backoff interval for the watch-and-distribute loops.
pub const DEFAULT_WATCH_LOOP_INTERVAL: Duration = Duration::from_millis(250);

/// Timeout for blocking cache pops.
pub const DEFAULT_TRANS_TIMEOUT: Duration = Duration::from_secs(60);

/// Backoff after a failed or empty handle iteration.
pub const DEFAULT_HANDLE_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Default subscriber callback timeout when the subscription sets none.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Fusing window: dist insts older than this at send time are dropped
/// without a callback attempt.
pub const FUSING_EVENT_EXPIRE_SECS: u64 = 5 * 60;
