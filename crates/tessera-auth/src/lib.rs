//! # tessera-auth
//!
//! Credential verification for the Tessera identity provider.
//!
//! - [`directory`]: the user directory document, its loader and the
//!   [`Directory`] lookup trait
//! - [`password`]: Argon2id hashing of stored credentials
//! - [`lockout`]: per-username failure counting, lockout and backoff
//! - [`verifier`]: [`CredentialVerifier::authenticate`], which ties them together
//! - [`principal`]: the authenticated [`Principal`] and its attribute values

pub mod directory;
pub mod error;
pub mod lockout;
pub mod password;
pub mod principal;
pub mod verifier;

pub use directory::{Directory, DirectoryDocument, InMemoryDirectory, UserRecord};
pub use error::{AuthError, AuthFailure, DirectoryError};
pub use lockout::{Attempt, BackoffPolicy, FailureTracker, LockoutPolicy, LockoutStatus};
pub use password::PasswordHasher;
pub use principal::{AttributeValue, Principal, TimeSpan};
pub use verifier::{CredentialVerifier, DEFAULT_LOOKUP_TIMEOUT};
