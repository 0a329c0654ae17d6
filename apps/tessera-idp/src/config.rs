//! Launcher configuration loaded from environment variables.
//!
//! Loading is fail-fast: a required variable that is missing or a value that
//! does not parse stops the launcher with a message naming the variable.
//! Development mode tolerates a missing IdP signing key and generates a
//! throwaway one; production refuses to start without it.

use std::env;
use std::path::PathBuf;
use tessera_saml::EngineSettings;
use thiserror::Error;

/// Launcher environment mode.
///
/// - `Development`: insecure fallbacks are allowed with WARN-level logging.
/// - `Production`: insecure fallbacks make the launcher refuse to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Production,
}

impl AppEnvironment {
    /// Parse an `IDP_ENV` value. Unset or unrecognized means `Development`.
    pub fn from_env_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" | "" => Self::Development,
            other => {
                tracing::warn!(
                    value = other,
                    "Unrecognized IDP_ENV value, defaulting to Development"
                );
                Self::Development
            }
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        *self == Self::Production
    }
}

impl std::fmt::Display for AppEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Configuration errors that can occur during environment loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("Cannot read {var} file {path}: {source}")]
    Unreadable {
        var: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Insecure(String),
}

/// Where the IdP signing key and certificate come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningSource {
    /// PEM files given by `IDP_SIGNING_KEY_FILE` / `IDP_SIGNING_CERT_FILE`.
    Files { key: PathBuf, certificate: PathBuf },
    /// Throwaway self-signed credentials, development only.
    Generated,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: AppEnvironment,
    pub rust_log: String,
    pub metadata_file: PathBuf,
    pub directory_file: PathBuf,
    pub signing: SigningSource,
    pub settings: EngineSettings,
    /// Interval between replay-cache and session purges.
    pub maintenance_interval_secs: u64,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for the first missing or invalid variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for the first missing or invalid variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &str| var(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()));

        let app_env = AppEnvironment::from_env_str(&var("IDP_ENV").unwrap_or_default());
        let rust_log = var("RUST_LOG").unwrap_or_else(|| "info".to_string());

        let mut settings = EngineSettings::new(required("IDP_ENTITY_ID")?);
        if let Some(v) = var("IDP_ASSERTION_LIFETIME_SECS") {
            settings.assertion_lifetime_secs = parse("IDP_ASSERTION_LIFETIME_SECS", &v)?;
        }
        if let Some(v) = var("IDP_ASSERTION_CLOCK_SKEW_SECS") {
            settings.assertion_clock_skew_secs = parse("IDP_ASSERTION_CLOCK_SKEW_SECS", &v)?;
        }
        if let Some(v) = var("IDP_REQUEST_CLOCK_SKEW_SECS") {
            settings.request_clock_skew_secs = parse("IDP_REQUEST_CLOCK_SKEW_SECS", &v)?;
        }
        if let Some(v) = var("IDP_MAX_REQUEST_AGE_SECS") {
            settings.max_request_age_secs = parse("IDP_MAX_REQUEST_AGE_SECS", &v)?;
        }
        if let Some(v) = var("IDP_REPLAY_CAPACITY") {
            settings.replay_capacity = parse("IDP_REPLAY_CAPACITY", &v)?;
        }
        if let Some(v) = var("IDP_SESSION_LIFETIME_SECS") {
            settings.session_lifetime_secs = parse("IDP_SESSION_LIFETIME_SECS", &v)?;
        }
        if let Some(v) = var("IDP_SIGNING_TIMEOUT_MS") {
            settings.signing_timeout_ms = parse("IDP_SIGNING_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("IDP_DIRECTORY_TIMEOUT_MS") {
            settings.directory_timeout_ms = parse("IDP_DIRECTORY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("IDP_LOCKOUT_MAX_FAILURES") {
            settings.lockout.max_failures = parse("IDP_LOCKOUT_MAX_FAILURES", &v)?;
        }
        if let Some(v) = var("IDP_LOCKOUT_DURATION_SECS") {
            settings.lockout.lockout_duration =
                std::time::Duration::from_secs(parse("IDP_LOCKOUT_DURATION_SECS", &v)?);
        }

        let signing = match (var("IDP_SIGNING_KEY_FILE"), var("IDP_SIGNING_CERT_FILE")) {
            (Some(key), Some(certificate)) => SigningSource::Files {
                key: key.into(),
                certificate: certificate.into(),
            },
            (Some(_), None) => return Err(ConfigError::MissingVar("IDP_SIGNING_CERT_FILE".into())),
            (None, Some(_)) => return Err(ConfigError::MissingVar("IDP_SIGNING_KEY_FILE".into())),
            (None, None) => SigningSource::Generated,
        };

        let maintenance_interval_secs = match var("IDP_MAINTENANCE_INTERVAL_SECS") {
            Some(v) => parse("IDP_MAINTENANCE_INTERVAL_SECS", &v)?,
            None => 60,
        };
        if maintenance_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                var: "IDP_MAINTENANCE_INTERVAL_SECS".to_string(),
                message: "must be positive".to_string(),
            });
        }

        Ok(Self {
            app_env,
            rust_log,
            metadata_file: required("IDP_METADATA_FILE")?.into(),
            directory_file: required("IDP_DIRECTORY_FILE")?.into(),
            signing,
            settings,
            maintenance_interval_secs,
        })
    }

    /// Check for insecure fallbacks.
    ///
    /// Returns the warnings to log in development mode.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Insecure` in production mode if any insecure
    /// fallback is in use.
    pub fn validate_security_config(&self) -> Result<Vec<String>, ConfigError> {
        let mut findings = Vec::new();
        if self.signing == SigningSource::Generated {
            findings.push(
                "IDP_SIGNING_KEY_FILE/IDP_SIGNING_CERT_FILE not set, using a generated \
                 self-signed signing key that relying parties cannot have registered"
                    .to_string(),
            );
        }

        if self.app_env.is_production() && !findings.is_empty() {
            return Err(ConfigError::Insecure(findings.join("; ")));
        }
        Ok(findings)
    }
}

fn parse<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var: var.to_string(),
        message: e.to_string(),
    })
}

/// Read a file named by an environment variable.
///
/// # Errors
///
/// Returns `ConfigError::Unreadable` naming the variable and path.
pub fn read_file(var: &str, path: &PathBuf) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        var: var.to_string(),
        path: path.clone(),
        source,
    })
}
