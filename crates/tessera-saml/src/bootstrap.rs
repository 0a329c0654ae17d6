//! Startup validation.
//!
//! Every configuration source is checked before anything is started, and all
//! problems are reported together in one `ConfigurationError`.

use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::dispatch::ResponseDispatcher;
use crate::engine::ProtocolEngine;
use crate::error::ConfigurationError;
use crate::signing::{SigningCredentials, SigningKeySlot};
use crate::trust_store::{SharedTrustStore, TrustStore};
use chrono::{DateTime, Utc};
use openssl::asn1::Asn1Time;
use std::sync::Arc;
use tessera_auth::{CredentialVerifier, InMemoryDirectory, PasswordHasher};

/// Collects configuration sources and turns them into a [`ProtocolEngine`].
#[derive(Debug)]
pub struct EngineBootstrap {
    settings: EngineSettings,
    metadata_json: Option<String>,
    directory_json: Option<String>,
    signing_key_pem: Option<String>,
    signing_cert_pem: Option<String>,
    signing_slot: SigningKeySlot,
    hasher: PasswordHasher,
}

impl EngineBootstrap {
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            metadata_json: None,
            directory_json: None,
            signing_key_pem: None,
            signing_cert_pem: None,
            signing_slot: SigningKeySlot::default(),
            hasher: PasswordHasher::new(),
        }
    }

    #[must_use]
    pub fn metadata_json(mut self, json: impl Into<String>) -> Self {
        self.metadata_json = Some(json.into());
        self
    }

    #[must_use]
    pub fn directory_json(mut self, json: impl Into<String>) -> Self {
        self.directory_json = Some(json.into());
        self
    }

    #[must_use]
    pub fn signing_pem(mut self, private_key: impl Into<String>, certificate: impl Into<String>) -> Self {
        self.signing_key_pem = Some(private_key.into());
        self.signing_cert_pem = Some(certificate.into());
        self
    }

    /// Slot the validated signing credentials are installed into. Pass a
    /// clone of the slot a redirect-signing dispatcher reads from.
    #[must_use]
    pub fn signing_key_slot(mut self, slot: SigningKeySlot) -> Self {
        self.signing_slot = slot;
        self
    }

    /// Hasher used for the directory's stored credentials.
    #[must_use]
    pub fn password_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Validate everything and assemble the engine.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` listing every problem in settings,
    /// metadata, directory and signing key.
    pub fn build(
        self,
        dispatcher: Arc<dyn ResponseDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<ProtocolEngine, ConfigurationError> {
        let mut problems: Vec<String> = self
            .settings
            .validate()
            .into_iter()
            .map(|p| format!("settings: {p}"))
            .collect();

        let trust_store = match self.metadata_json.as_deref() {
            None => {
                problems.push("metadata: no relying-party metadata supplied".to_string());
                None
            }
            Some(json) => match TrustStore::from_json(json) {
                Ok(store) => Some(store),
                Err(e) => {
                    problems.extend(e.in_context("metadata").problems().iter().cloned());
                    None
                }
            },
        };

        let directory = match self.directory_json.as_deref() {
            None => {
                problems.push("directory: no user directory supplied".to_string());
                None
            }
            Some(json) => match InMemoryDirectory::from_json(json, &self.hasher) {
                Ok(directory) => Some(directory),
                Err(e) => {
                    problems.extend(e.problems().into_iter().map(|p| format!("directory: {p}")));
                    None
                }
            },
        };

        let credentials = match (self.signing_key_pem.as_deref(), self.signing_cert_pem.as_deref()) {
            (Some(key), Some(cert)) => match SigningCredentials::from_pem(key, cert) {
                Ok(credentials) => {
                    if let Err(problem) = check_not_expired(&credentials, clock.now()) {
                        problems.push(format!("signing: {problem}"));
                    }
                    Some(credentials)
                }
                Err(e) => {
                    problems.push(format!("signing: {e}"));
                    None
                }
            },
            _ => {
                problems.push("signing: an IdP private key and certificate are required".to_string());
                None
            }
        };

        let (Some(trust_store), Some(directory), true) =
            (trust_store, directory, problems.is_empty())
        else {
            return Err(ConfigurationError::new(problems));
        };

        tracing::info!(
            relying_parties = trust_store.len(),
            users = directory.len(),
            idp_entity_id = %self.settings.idp_entity_id,
            "Engine configuration loaded"
        );

        let verifier = CredentialVerifier::new(
            Arc::new(directory),
            self.hasher,
            self.settings.lockout,
            self.settings.directory_timeout(),
        )
        .map_err(|e| ConfigurationError::single(format!("directory: {e}")))?;

        self.signing_slot.store(credentials);
        ProtocolEngine::new(
            self.settings,
            SharedTrustStore::new(trust_store),
            verifier,
            self.signing_slot,
            dispatcher,
            clock,
        )
    }
}

fn check_not_expired(credentials: &SigningCredentials, now: DateTime<Utc>) -> Result<(), String> {
    let now = Asn1Time::from_unix(now.timestamp())
        .map_err(|e| format!("cannot represent current time: {e}"))?;
    let not_after = credentials.certificate().not_after();
    let expired = not_after
        .compare(&now)
        .map_err(|e| format!("cannot compare validity: {e}"))?
        .is_lt();
    if expired {
        return Err(format!("IdP certificate expired at {not_after}"));
    }
    Ok(())
}
