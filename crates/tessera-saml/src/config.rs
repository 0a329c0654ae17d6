//! Engine settings.
//!
//! Built once at startup, validated as a whole and then passed by value to
//! the components that need them.

use crate::assertion_builder::{
    DEFAULT_ASSERTION_LIFETIME_SECS, DEFAULT_CLOCK_SKEW_SECS, MAX_ASSERTION_LIFETIME_SECS,
};
use crate::replay::DEFAULT_REPLAY_CAPACITY;
use crate::session::DEFAULT_SESSION_LIFETIME_SECS;
use crate::request_parser::{DEFAULT_MAX_CLOCK_SKEW_SECS, DEFAULT_MAX_REQUEST_AGE_SECS};
use serde::{Deserialize, Serialize};
use tessera_auth::LockoutPolicy;

/// Default bound on assertion signing (milliseconds)
pub const DEFAULT_SIGNING_TIMEOUT_MS: u64 = 5_000;

/// Default bound on a directory lookup (milliseconds)
pub const DEFAULT_DIRECTORY_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// The IdP's own entity identifier, used as `Issuer`.
    pub idp_entity_id: String,
    /// Subtracted from the issue instant to form `NotBefore`.
    pub assertion_clock_skew_secs: i64,
    pub assertion_lifetime_secs: i64,
    /// Tolerated clock difference for inbound `IssueInstant`.
    pub request_clock_skew_secs: i64,
    /// Oldest inbound `IssueInstant` accepted.
    pub max_request_age_secs: i64,
    pub replay_capacity: usize,
    /// How long an issued session stays available to single logout.
    pub session_lifetime_secs: i64,
    pub signing_timeout_ms: u64,
    pub directory_timeout_ms: u64,
    pub lockout: LockoutPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            idp_entity_id: String::new(),
            assertion_clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
            assertion_lifetime_secs: DEFAULT_ASSERTION_LIFETIME_SECS,
            request_clock_skew_secs: DEFAULT_MAX_CLOCK_SKEW_SECS,
            max_request_age_secs: DEFAULT_MAX_REQUEST_AGE_SECS,
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            session_lifetime_secs: DEFAULT_SESSION_LIFETIME_SECS,
            signing_timeout_ms: DEFAULT_SIGNING_TIMEOUT_MS,
            directory_timeout_ms: DEFAULT_DIRECTORY_TIMEOUT_MS,
            lockout: LockoutPolicy::default(),
        }
    }
}

impl EngineSettings {
    #[must_use]
    pub fn new(idp_entity_id: impl Into<String>) -> Self {
        Self {
            idp_entity_id: idp_entity_id.into(),
            ..Self::default()
        }
    }

    /// List every problem with these settings. Empty means usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.idp_entity_id.trim().is_empty() {
            problems.push("idp_entity_id must not be empty".to_string());
        }
        if self.assertion_clock_skew_secs < 0 {
            problems.push("assertion_clock_skew_secs must not be negative".to_string());
        }
        if self.assertion_lifetime_secs <= 0
            || self.assertion_lifetime_secs > MAX_ASSERTION_LIFETIME_SECS
        {
            problems.push(format!(
                "assertion_lifetime_secs must be between 1 and {MAX_ASSERTION_LIFETIME_SECS}"
            ));
        }
        if self.request_clock_skew_secs < 0 {
            problems.push("request_clock_skew_secs must not be negative".to_string());
        }
        if self.max_request_age_secs <= 0 {
            problems.push("max_request_age_secs must be positive".to_string());
        }
        if self.replay_capacity == 0 {
            problems.push("replay_capacity must be at least 1".to_string());
        }
        if self.session_lifetime_secs < self.assertion_lifetime_secs {
            problems.push(
                "session_lifetime_secs must not be shorter than assertion_lifetime_secs".to_string(),
            );
        }
        if self.signing_timeout_ms == 0 {
            problems.push("signing_timeout_ms must be positive".to_string());
        }
        if self.directory_timeout_ms == 0 {
            problems.push("directory_timeout_ms must be positive".to_string());
        }
        problems.extend(self.lockout.validate());
        problems
    }

    /// How long a request identifier stays in the replay cache.
    #[must_use]
    pub fn replay_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_request_age_secs + self.request_clock_skew_secs)
    }

    #[must_use]
    pub fn session_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_lifetime_secs)
    }

    #[must_use]
    pub fn signing_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.signing_timeout_ms)
    }

    #[must_use]
    pub fn directory_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.directory_timeout_ms)
    }
}
