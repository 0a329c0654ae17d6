//! Credential verification against a `Directory`.

use crate::directory::Directory;
use crate::error::{AuthError, AuthFailure};
use crate::lockout::{FailureTracker, LockoutPolicy};
use crate::password::PasswordHasher;
use crate::principal::Principal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default bound on a single directory lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Authenticates a username and credential, returning the principal.
pub struct CredentialVerifier {
    directory: Arc<dyn Directory>,
    hasher: PasswordHasher,
    dummy_hash: String,
    failures: FailureTracker,
    lookup_timeout: Duration,
}

impl std::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("lockout", self.failures.policy())
            .field("lookup_timeout", &self.lookup_timeout)
            .finish_non_exhaustive()
    }
}

impl CredentialVerifier {
    /// Create a verifier.
    ///
    /// `hasher` must use the same parameters the directory was hashed with.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::HashingFailed` if the decoy hash cannot be built.
    pub fn new(
        directory: Arc<dyn Directory>,
        hasher: PasswordHasher,
        policy: LockoutPolicy,
        lookup_timeout: Duration,
    ) -> Result<Self, AuthError> {
        let dummy_hash = hasher.dummy_hash()?;
        Ok(Self {
            directory,
            hasher,
            dummy_hash,
            failures: FailureTracker::new(policy),
            lookup_timeout,
        })
    }

    /// Failure counters, exposed for status reporting.
    #[must_use]
    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    /// Authenticate a username and credential.
    ///
    /// Unknown usernames cost one Argon2 verification against a decoy hash
    /// and fail exactly like a wrong credential.
    ///
    /// # Errors
    ///
    /// - `AuthFailure::AccountLocked` while the username is locked, backing
    ///   off, or has enough attempts in flight to reach the threshold
    /// - `AuthFailure::DirectoryUnavailable` if the lookup fails or times out
    /// - `AuthFailure::InvalidCredential` for an unknown user or wrong credential
    pub async fn authenticate(
        &self,
        username: &str,
        credential: &str,
    ) -> Result<Principal, AuthFailure> {
        let attempt = self.failures.reserve(username, Instant::now())?;

        let record = match tokio::time::timeout(self.lookup_timeout, self.directory.find(username))
            .await
        {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                warn!(error = %e, "Directory lookup failed");
                return Err(AuthFailure::DirectoryUnavailable(e.to_string()));
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "Directory lookup timed out"
                );
                return Err(AuthFailure::DirectoryUnavailable(
                    "directory lookup timed out".to_string(),
                ));
            }
        };

        let hash = record
            .as_ref()
            .map_or(self.dummy_hash.as_str(), |r| r.credential_hash.as_str());

        let matches = match self.hasher.verify(credential, hash) {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "Stored credential hash is unreadable");
                false
            }
        };

        match record {
            Some(record) if matches => {
                attempt.succeed();
                info!(principal_id = %record.principal.unique_id, "Credential verified");
                Ok(record.principal)
            }
            _ => {
                let status = attempt.fail(Instant::now());
                debug!(
                    failed_attempts = status.failed_attempts,
                    max_attempts = status.max_attempts,
                    locked = status.is_locked,
                    "Credential rejected"
                );
                Err(AuthFailure::InvalidCredential)
            }
        }
    }
}
