//! Credential hashing with Argon2id.
//!
//! Directory secrets are hashed once at load and verified with the argon2
//! verifier, which compares digests in constant time.

use crate::error::AuthError;
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};

/// Input hashed to produce the decoy hash used for unknown usernames.
const DUMMY_SECRET: &str = "tessera-unknown-principal";

/// Credential hasher configuration.
///
/// Defaults to the OWASP 2024 parameters for Argon2id:
/// - Memory: 19456 KiB (19 MiB)
/// - Iterations: 2
/// - Parallelism: 1
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher {
    /// Create a hasher with the OWASP-recommended parameters.
    #[must_use]
    pub fn new() -> Self {
        // Params::DEFAULT is m=19456, t=2, p=1
        Self {
            params: Params::DEFAULT,
        }
    }

    /// Create a hasher with custom parameters.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::HashingFailed` if argon2 rejects the parameters.
    pub fn with_params(
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
    ) -> Result<Self, AuthError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| AuthError::HashingFailed(format!("Invalid parameters: {e}")))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a secret, returning a PHC-formatted string.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::HashingFailed` if hashing fails.
    pub fn hash(&self, secret: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);

        let hash = self
            .argon2()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| AuthError::HashingFailed(format!("Hashing failed: {e}")))?;

        Ok(hash.to_string())
    }

    /// Verify a secret against a PHC hash.
    ///
    /// Returns `Ok(true)` on match and `Ok(false)` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidHashFormat` if the stored hash is not PHC.
    pub fn verify(&self, secret: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidHashFormat)?;

        match self.argon2().verify_password(secret.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    /// Produce a hash to verify against when the username is unknown, so
    /// that both paths cost one Argon2 evaluation.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::HashingFailed` if hashing fails.
    pub fn dummy_hash(&self) -> Result<String, AuthError> {
        self.hash(DUMMY_SECRET)
    }
}
