//! Authentication error types.

use std::time::Duration;
use thiserror::Error;

/// Outcome of a failed authentication attempt.
///
/// `InvalidCredential` deliberately covers both an unknown username and a
/// wrong secret so callers cannot tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// Unknown username or wrong secret.
    #[error("Invalid username or credential")]
    InvalidCredential,

    /// Too many recent failures for this username.
    #[error("Account temporarily locked, retry in {}s", retry_after.as_secs())]
    AccountLocked {
        /// Time until the next attempt is accepted.
        retry_after: Duration,
    },

    /// The directory could not be consulted (timeout or backend error).
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),
}

impl AuthFailure {
    /// Returns true if the caller may retry the same request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DirectoryUnavailable(_))
    }

    /// Returns true if this failure is an account lockout.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::AccountLocked { .. })
    }
}

/// Errors raised by a `Directory` backend during a lookup.
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    #[error("Directory backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while loading credentials or hashing secrets.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Argon2 hashing failed or the parameters were rejected.
    #[error("Password hashing failed: {0}")]
    HashingFailed(String),

    /// A stored hash is not a valid PHC string.
    #[error("Invalid password hash format")]
    InvalidHashFormat,

    /// The directory document could not be parsed.
    #[error("Invalid directory document: {0}")]
    InvalidDocument(String),

    /// The directory document parsed but its content is inconsistent.
    /// Every problem found is listed.
    #[error("Invalid directory: {}", problems.join("; "))]
    InvalidDirectory { problems: Vec<String> },
}

impl AuthError {
    /// Flatten into a list of human-readable problems.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        match self {
            Self::InvalidDirectory { problems } => problems.clone(),
            other => vec![other.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_directory_unavailable_is_retryable() {
        assert!(AuthFailure::DirectoryUnavailable("timeout".into()).is_retryable());
        assert!(!AuthFailure::InvalidCredential.is_retryable());
        assert!(!AuthFailure::AccountLocked {
            retry_after: Duration::from_secs(10)
        }
        .is_retryable());
    }

    #[test]
    fn test_invalid_credential_message_is_generic() {
        let msg = AuthFailure::InvalidCredential.to_string();
        assert!(!msg.to_lowercase().contains("unknown user"));
        assert!(!msg.to_lowercase().contains("password"));
    }

    #[test]
    fn test_invalid_directory_lists_every_problem() {
        let err = AuthError::InvalidDirectory {
            problems: vec!["first".into(), "second".into()],
        };
        assert_eq!(err.to_string(), "Invalid directory: first; second");
        assert_eq!(err.problems().len(), 2);
    }
}
