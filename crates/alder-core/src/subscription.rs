//! Subscription documents mirrored from the control-plane store.

use std::hash::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_SEND_TIMEOUT;

/// Stable numeric identity of a subscription.
pub type SubscriptionId = i64;

/// How a callback response is judged successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmMode {
    /// The response status code (as a decimal string) must equal the pattern.
    HttpStatus,
    /// The response body must match the pattern compiled as a regex.
    Regular,
}

/// One subscriber's registration: which event types it wants and where to
/// deliver them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: SubscriptionId,
    pub owner_id: String,
    /// Comma-delimited event-type tokens (`hostcreate,moduletransfer,...`).
    pub subscription_form: String,
    pub callback_url: String,
    pub confirm_mode: ConfirmMode,
    pub confirm_pattern: String,
    /// Callback timeout in seconds; 0 means the service default.
    #[serde(default)]
    pub timeout_seconds: u64,
}

impl Subscription {
    /// The trimmed, non-empty event-type tokens of the subscription form.
    pub fn form_tokens(&self) -> Vec<String> {
        self.subscription_form
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Callback timeout, falling back to the service default when unset.
    pub fn timeout(&self) -> Duration {
        if self.timeout_seconds == 0 {
            DEFAULT_SEND_TIMEOUT
        } else {
            Duration::from_secs(self.timeout_seconds)
        }
    }

    /// Content hash used to detect whether an update actually changed the
    /// document.
    pub fn content_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.subscription_id.hash(&mut hasher);
        self.owner_id.hash(&mut hasher);
        self.subscription_form.hash(&mut hasher);
        self.callback_url.hash(&mut hasher);
        self.confirm_pattern.hash(&mut hasher);
        self.timeout_seconds.hash(&mut hasher);
        (self.confirm_mode == ConfirmMode::Regular).hash(&mut hasher);
        hasher.finish()
    }

    /// Syntactic sanity of a mirrored document: non-empty form and a
    /// plausible callback URL.
    pub fn is_valid(&self) -> bool {
        !self.form_tokens().is_empty() && self.callback_url.contains("://")
    }
}
