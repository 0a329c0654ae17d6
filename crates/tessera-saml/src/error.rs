//! SAML-specific error types

use std::fmt;
use tessera_auth::AuthFailure;
use thiserror::Error;

/// SAML status codes carried in error responses.
pub mod status {
    pub const SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
    pub const REQUESTER: &str = "urn:oasis:names:tc:SAML:2.0:status:Requester";
    pub const RESPONDER: &str = "urn:oasis:names:tc:SAML:2.0:status:Responder";
    pub const AUTHN_FAILED: &str = "urn:oasis:names:tc:SAML:2.0:status:AuthnFailed";
    pub const REQUEST_DENIED: &str = "urn:oasis:names:tc:SAML:2.0:status:RequestDenied";
    pub const INVALID_NAMEID_POLICY: &str =
        "urn:oasis:names:tc:SAML:2.0:status:InvalidNameIDPolicy";
}

/// Result type for SAML operations
pub type SamlResult<T> = Result<T, SamlError>;

/// Reasons assertion construction can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildFailure {
    /// No IdP signing key is installed.
    #[error("No IdP signing key available")]
    NoSigningKey,

    /// The relying party's encryption certificate cannot be used.
    #[error("Relying party encryption key is invalid: {0}")]
    EncryptionKeyInvalid(String),

    /// Canonicalization, digest or RSA signing failed.
    #[error("Assertion signing failed: {0}")]
    SigningFailed(String),

    /// Signing did not finish within the configured bound.
    #[error("Assertion signing timed out")]
    Timeout,
}

/// Per-request failures. Every variant ends the exchange in `Failed`.
#[derive(Debug, Error)]
pub enum SamlError {
    /// The message could not be decoded or parsed, or failed freshness checks.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The issuer is not in the trust store.
    #[error("Unknown relying party: {0}")]
    UnknownRelyingParty(String),

    /// A required signature is absent or does not verify.
    #[error("Invalid request signature: {0}")]
    InvalidRequestSignature(String),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthFailure),

    #[error("Assertion build failed: {0}")]
    Build(#[from] BuildFailure),

    /// The request identifier has already been seen within its window.
    #[error("Replayed request {request_id} from {issuer}")]
    ReplayDetected { issuer: String, request_id: String },

    /// The replay cache is full of live entries; requests are refused.
    #[error("Replay cache is full")]
    ReplayCacheFull,

    /// The requested endpoint is not registered for the relying party.
    #[error("Endpoint mismatch: {0}")]
    EndpointMismatch(String),

    #[error("Unsupported NameID format: {0}")]
    UnsupportedNameIdFormat(String),

    /// The transport could not deliver the response. Not retried.
    #[error("Response delivery failed: {0}")]
    DeliveryFailure(String),
}

/// Payload-free discriminant of `SamlError`, used as the `Failed` reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    MalformedRequest,
    UnknownRelyingParty,
    InvalidRequestSignature,
    InvalidCredential,
    AccountLocked,
    DirectoryUnavailable,
    NoSigningKey,
    EncryptionKeyInvalid,
    SigningFailed,
    SigningTimeout,
    ReplayDetected,
    ReplayCacheFull,
    EndpointMismatch,
    UnsupportedNameIdFormat,
    DeliveryFailure,
}

impl FailureKind {
    /// Stable machine-readable reason code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedRequest => "malformed_request",
            Self::UnknownRelyingParty => "unknown_relying_party",
            Self::InvalidRequestSignature => "invalid_request_signature",
            Self::InvalidCredential => "invalid_credential",
            Self::AccountLocked => "account_locked",
            Self::DirectoryUnavailable => "directory_unavailable",
            Self::NoSigningKey => "no_signing_key",
            Self::EncryptionKeyInvalid => "encryption_key_invalid",
            Self::SigningFailed => "signing_failed",
            Self::SigningTimeout => "signing_timeout",
            Self::ReplayDetected => "replay_detected",
            Self::ReplayCacheFull => "replay_cache_full",
            Self::EndpointMismatch => "endpoint_mismatch",
            Self::UnsupportedNameIdFormat => "unsupported_nameid_format",
            Self::DeliveryFailure => "delivery_failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SamlError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MalformedRequest(_) => FailureKind::MalformedRequest,
            Self::UnknownRelyingParty(_) => FailureKind::UnknownRelyingParty,
            Self::InvalidRequestSignature(_) => FailureKind::InvalidRequestSignature,
            Self::Auth(AuthFailure::InvalidCredential) => FailureKind::InvalidCredential,
            Self::Auth(AuthFailure::AccountLocked { .. }) => FailureKind::AccountLocked,
            Self::Auth(AuthFailure::DirectoryUnavailable(_)) => FailureKind::DirectoryUnavailable,
            Self::Build(BuildFailure::NoSigningKey) => FailureKind::NoSigningKey,
            Self::Build(BuildFailure::EncryptionKeyInvalid(_)) => FailureKind::EncryptionKeyInvalid,
            Self::Build(BuildFailure::SigningFailed(_)) => FailureKind::SigningFailed,
            Self::Build(BuildFailure::Timeout) => FailureKind::SigningTimeout,
            Self::ReplayDetected { .. } => FailureKind::ReplayDetected,
            Self::ReplayCacheFull => FailureKind::ReplayCacheFull,
            Self::EndpointMismatch(_) => FailureKind::EndpointMismatch,
            Self::UnsupportedNameIdFormat(_) => FailureKind::UnsupportedNameIdFormat,
            Self::DeliveryFailure(_) => FailureKind::DeliveryFailure,
        }
    }

    /// Stable machine-readable reason code.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        self.kind().as_str()
    }

    /// SAML status URI to report for this failure.
    #[must_use]
    pub fn saml_status(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_)
            | Self::UnknownRelyingParty(_)
            | Self::InvalidRequestSignature(_)
            | Self::ReplayDetected { .. }
            | Self::EndpointMismatch(_) => status::REQUESTER,
            Self::UnsupportedNameIdFormat(_) => status::INVALID_NAMEID_POLICY,
            Self::Auth(AuthFailure::DirectoryUnavailable(_)) => status::RESPONDER,
            Self::Auth(_) => status::AUTHN_FAILED,
            Self::ReplayCacheFull => status::REQUEST_DENIED,
            Self::Build(_) | Self::DeliveryFailure(_) => status::RESPONDER,
        }
    }

    /// Only a transient directory outage is worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Auth(failure) if failure.is_retryable())
    }

    /// Message safe to show to an end user. Internal detail is omitted.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "The authentication request could not be read.",
            Self::UnknownRelyingParty(_) => "The requesting application is not registered.",
            Self::InvalidRequestSignature(_) => "The authentication request is not trusted.",
            Self::Auth(AuthFailure::InvalidCredential) => "Invalid username or password.",
            Self::Auth(AuthFailure::AccountLocked { .. }) => {
                "Too many failed attempts. Please try again later."
            }
            Self::Auth(AuthFailure::DirectoryUnavailable(_)) => {
                "Sign-in is temporarily unavailable. Please try again."
            }
            Self::ReplayDetected { .. } => "This authentication request has already been used.",
            Self::EndpointMismatch(_) => "The requested return address is not registered.",
            Self::UnsupportedNameIdFormat(_) => "The requested identifier format is not supported.",
            Self::Build(_) | Self::ReplayCacheFull | Self::DeliveryFailure(_) => {
                "An internal error occurred."
            }
        }
    }
}

/// Fatal load-time problems, collected rather than reported one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationError {
    problems: Vec<String>,
}

impl ConfigurationError {
    #[must_use]
    pub fn new(problems: Vec<String>) -> Self {
        Self { problems }
    }

    #[must_use]
    pub fn single(problem: impl Into<String>) -> Self {
        Self {
            problems: vec![problem.into()],
        }
    }

    #[must_use]
    pub fn problems(&self) -> &[String] {
        &self.problems
    }

    /// Prefix every problem with a source label (e.g. a file name).
    #[must_use]
    pub fn in_context(self, context: &str) -> Self {
        Self {
            problems: self
                .problems
                .into_iter()
                .map(|p| format!("{context}: {p}"))
                .collect(),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration problem(s)", self.problems.len())?;
        for problem in &self.problems {
            write!(f, "\n  - {problem}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigurationError {}
