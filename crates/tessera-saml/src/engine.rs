//! Protocol engine: drives authentication and logout exchanges from the
//! inbound request to the dispatched response.
//!
//! Each exchange takes one trust-store snapshot at its start and finishes
//! against it, whatever reloads happen meanwhile.

use crate::assertion_builder::{Assertion, AssertionBuilder};
use crate::attributes::NAMEID_FORMAT_UNSPECIFIED;
use crate::binding::InboundMessage;
use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::dispatch::{MessageKind, OutboundResponse, ResponseDispatcher};
use crate::error::{status, BuildFailure, ConfigurationError, SamlError, SamlResult};
use crate::logout::build_logout_response;
use crate::replay::ReplayCache;
use crate::request_parser::{ParsedAuthnRequest, ParsedLogoutRequest, RequestParser};
use crate::session::{SessionRegistry, SpSession};
use crate::signing::{SigningCredentials, SigningKeySlot};
use crate::state::{Exchange, ExchangeKind, ExchangeReport, ExchangeState};
use crate::trust_store::{Binding, Endpoint, EndpointKind, RelyingParty, SharedTrustStore};
use crate::xmldsig::{has_enveloped_signature, verify_detached, verify_enveloped};
use std::fmt;
use std::sync::Arc;
use tessera_auth::{AuthFailure, CredentialVerifier, Principal};

/// What the user typed at the login prompt.
#[derive(Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub credential: String,
}

impl LoginCredentials {
    #[must_use]
    pub fn new(username: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            credential: credential.into(),
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("credential", &"[REDACTED]")
            .finish()
    }
}

/// A request that passed every trust check.
struct Validated<R> {
    request: R,
    relying_party: Arc<RelyingParty>,
    endpoint: Endpoint,
    relay_state: Option<String>,
}

pub struct ProtocolEngine {
    settings: EngineSettings,
    trust_store: SharedTrustStore,
    verifier: Arc<CredentialVerifier>,
    builder: Arc<AssertionBuilder>,
    parser: RequestParser,
    replay: ReplayCache,
    sessions: SessionRegistry,
    dispatcher: Arc<dyn ResponseDispatcher>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("idp_entity_id", &self.settings.idp_entity_id)
            .field("trust_store", &self.trust_store)
            .field("builder", &self.builder)
            .field("replay_entries", &self.replay.len())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl ProtocolEngine {
    /// Assemble an engine from already-loaded components.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` listing every problem with `settings`.
    pub fn new(
        settings: EngineSettings,
        trust_store: SharedTrustStore,
        verifier: CredentialVerifier,
        signing: SigningKeySlot,
        dispatcher: Arc<dyn ResponseDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigurationError> {
        let problems = settings.validate();
        if !problems.is_empty() {
            return Err(ConfigurationError::new(problems));
        }

        let builder = AssertionBuilder::with_signing_slot(settings.idp_entity_id.clone(), signing)
            .with_validity(
                chrono::Duration::seconds(settings.assertion_clock_skew_secs),
                chrono::Duration::seconds(settings.assertion_lifetime_secs),
            )?;
        let parser = RequestParser::new(
            chrono::Duration::seconds(settings.request_clock_skew_secs),
            chrono::Duration::seconds(settings.max_request_age_secs),
        );
        let replay = ReplayCache::new(settings.replay_capacity, settings.replay_window());

        Ok(Self {
            settings,
            trust_store,
            verifier: Arc::new(verifier),
            builder: Arc::new(builder),
            parser,
            replay,
            sessions: SessionRegistry::new(),
            dispatcher,
            clock,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// The trust store handle, for reloads.
    #[must_use]
    pub fn trust_store(&self) -> &SharedTrustStore {
        &self.trust_store
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    #[must_use]
    pub fn replay_cache(&self) -> &ReplayCache {
        &self.replay
    }

    #[must_use]
    pub fn verifier(&self) -> &CredentialVerifier {
        &self.verifier
    }

    /// The slot the engine signs from. Share it with a dispatcher that signs
    /// HTTP-Redirect queries so rotation reaches both.
    #[must_use]
    pub fn signing_key_slot(&self) -> SigningKeySlot {
        self.builder.signing_slot().clone()
    }

    /// Replace the IdP signing credentials. Exchanges already signing keep
    /// the credentials they loaded.
    pub fn rotate_signing_credentials(&self, credentials: Option<SigningCredentials>) {
        tracing::info!(
            has_credentials = credentials.is_some(),
            "IdP signing credentials rotated"
        );
        self.builder.rotate_credentials(credentials);
    }

    /// Run an authentication exchange to completion.
    ///
    /// Failures before the endpoint is resolved dispatch nothing. Later
    /// failures dispatch an error status response to the resolved endpoint,
    /// except `DirectoryUnavailable`, which releases the request identifier
    /// so that the caller may retry.
    pub async fn handle_authn_request(
        &self,
        inbound: &InboundMessage,
        login: &LoginCredentials,
    ) -> ExchangeReport {
        let mut exchange = Exchange::start(ExchangeKind::Authn, self.clock.now());

        let validated = match self.validate_authn(inbound) {
            Ok(validated) => validated,
            Err(error) => return self.failed(exchange, error, None),
        };
        exchange.advance(ExchangeState::Validated, self.clock.now());

        let Validated {
            request,
            relying_party,
            endpoint,
            relay_state,
        } = validated;

        let principal = match self
            .verifier
            .authenticate(&login.username, &login.credential)
            .await
        {
            Ok(principal) => principal,
            Err(failure) => {
                if matches!(failure, AuthFailure::DirectoryUnavailable(_)) {
                    self.replay.release(&request.issuer, &request.id);
                    return self.failed(exchange, failure.into(), None);
                }
                let error = SamlError::from(failure);
                let response = self
                    .dispatch_error(&error, &endpoint, &request.id, relay_state)
                    .await;
                return self.failed(exchange, error, response);
            }
        };
        exchange.advance(ExchangeState::Authenticated, self.clock.now());

        let assertion = match self
            .sign_assertion(&principal, &relying_party, &endpoint, &request.id)
            .await
        {
            Ok(assertion) => assertion,
            Err(failure) => {
                let error = SamlError::Build(failure);
                let response = self
                    .dispatch_error(&error, &endpoint, &request.id, relay_state)
                    .await;
                return self.failed(exchange, error, response);
            }
        };
        self.sessions
            .record(SpSession::from_assertion(
                &assertion,
                &principal.unique_id,
                self.settings.session_lifetime(),
            ));
        exchange.advance(ExchangeState::AssertionIssued, self.clock.now());

        tracing::info!(
            exchange_id = %exchange.id,
            user_id = %principal.unique_id,
            sp_entity_id = %relying_party.entity_id(),
            acs_url = %endpoint.location,
            assertion_id = %assertion.id,
            encrypted = assertion.is_encrypted(),
            "SAML Response generated"
        );

        let response = OutboundResponse {
            kind: MessageKind::AuthnResponse,
            xml: self.builder.build_response(&assertion),
            destination: endpoint,
            relay_state,
            in_response_to: Some(request.id),
            status: status::SUCCESS.to_string(),
        };
        self.deliver(exchange, response).await
    }

    /// Run a logout exchange to completion.
    pub async fn handle_logout_request(&self, inbound: &InboundMessage) -> ExchangeReport {
        let mut exchange = Exchange::start(ExchangeKind::Logout, self.clock.now());

        let Validated {
            request,
            relying_party,
            endpoint,
            relay_state,
        } = match self.validate_logout(inbound) {
            Ok(validated) => validated,
            Err(error) => return self.failed(exchange, error, None),
        };
        exchange.advance(ExchangeState::Validated, self.clock.now());

        let removed = self.sessions.invalidate(
            relying_party.entity_id(),
            &request.name_id,
            request.session_index.as_deref(),
        );
        exchange.advance(ExchangeState::SessionInvalidated, self.clock.now());

        tracing::info!(
            exchange_id = %exchange.id,
            sp_entity_id = %relying_party.entity_id(),
            request_id = %request.id,
            sessions_invalidated = removed.len(),
            "SP sessions invalidated"
        );

        let Some(credentials) = self.builder.credentials() else {
            return self.failed(exchange, BuildFailure::NoSigningKey.into(), None);
        };
        let logout_response = match build_logout_response(
            &self.settings.idp_entity_id,
            &request.id,
            &endpoint.location,
            status::SUCCESS,
            Some(&credentials),
            self.clock.now(),
        ) {
            Ok(response) => response,
            Err(e) => {
                let error = SamlError::Build(BuildFailure::SigningFailed(e.to_string()));
                return self.failed(exchange, error, None);
            }
        };

        let response = OutboundResponse {
            kind: MessageKind::LogoutResponse,
            destination: endpoint,
            xml: logout_response.xml,
            relay_state,
            in_response_to: Some(request.id),
            status: logout_response.status,
        };
        self.deliver(exchange, response).await
    }

    fn validate_authn(
        &self,
        inbound: &InboundMessage,
    ) -> SamlResult<Validated<ParsedAuthnRequest>> {
        let now = self.clock.now();
        let relay_state = inbound.relay_state()?;
        let xml = inbound.decode_xml()?;
        let request = self.parser.parse_authn_request(&xml, now)?;

        tracing::info!(
            sp_entity_id = %request.issuer,
            request_id = %request.id,
            binding = %inbound.binding(),
            "SAML AuthnRequest received"
        );

        let snapshot = self.trust_store.snapshot();
        let relying_party = snapshot.lookup(&request.issuer)?;

        verify_request_signature(&relying_party, inbound, &xml, &request.id)?;
        self.replay
            .check_and_record(&request.issuer, &request.id, request.issue_instant, now)?;

        if let Some(binding) = request.protocol_binding.as_deref() {
            if Binding::from_uri(binding) != Some(Binding::HttpPost) {
                return Err(SamlError::EndpointMismatch(format!(
                    "Unsupported ProtocolBinding {binding}"
                )));
            }
        }
        let endpoint = relying_party
            .resolve_acs(
                request.assertion_consumer_service_index,
                request.assertion_consumer_service_url.as_deref(),
            )?
            .clone();

        if let Some(format) = request.name_id_policy_format.as_deref() {
            if format != NAMEID_FORMAT_UNSPECIFIED && format != relying_party.name_id_format() {
                return Err(SamlError::UnsupportedNameIdFormat(format.to_string()));
            }
        }

        Ok(Validated {
            request,
            relying_party,
            endpoint,
            relay_state,
        })
    }

    fn validate_logout(
        &self,
        inbound: &InboundMessage,
    ) -> SamlResult<Validated<ParsedLogoutRequest>> {
        let now = self.clock.now();
        let relay_state = inbound.relay_state()?;
        let xml = inbound.decode_xml()?;
        let request = self.parser.parse_logout_request(&xml, now)?;

        tracing::info!(
            sp_entity_id = %request.issuer,
            request_id = %request.id,
            binding = %inbound.binding(),
            "SAML LogoutRequest received"
        );

        let snapshot = self.trust_store.snapshot();
        let relying_party = snapshot.lookup(&request.issuer)?;

        verify_request_signature(&relying_party, inbound, &xml, &request.id)?;
        self.replay
            .check_and_record(&request.issuer, &request.id, request.issue_instant, now)?;

        let endpoint = relying_party
            .default_endpoint(EndpointKind::SingleLogout)
            .cloned()
            .ok_or_else(|| {
                SamlError::EndpointMismatch(format!(
                    "No SingleLogoutService registered for {}",
                    relying_party.entity_id()
                ))
            })?;

        Ok(Validated {
            request,
            relying_party,
            endpoint,
            relay_state,
        })
    }

    /// Build and sign on the blocking pool, bounded by the signing timeout.
    async fn sign_assertion(
        &self,
        principal: &Principal,
        relying_party: &Arc<RelyingParty>,
        endpoint: &Endpoint,
        in_response_to: &str,
    ) -> Result<Assertion, BuildFailure> {
        let builder = Arc::clone(&self.builder);
        let clock = Arc::clone(&self.clock);
        let principal = principal.clone();
        let relying_party = Arc::clone(relying_party);
        let endpoint = endpoint.clone();
        let in_response_to = in_response_to.to_string();

        let task = tokio::task::spawn_blocking(move || {
            builder.build(
                &principal,
                &relying_party,
                &endpoint,
                Some(&in_response_to),
                clock.as_ref(),
            )
        });

        match tokio::time::timeout(self.settings.signing_timeout(), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(BuildFailure::SigningFailed(format!("signing task failed: {e}"))),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.settings.signing_timeout_ms,
                    "Assertion signing timed out"
                );
                Err(BuildFailure::Timeout)
            }
        }
    }

    /// Dispatch an error status response. Delivery problems are logged only;
    /// the exchange already failed for another reason.
    async fn dispatch_error(
        &self,
        error: &SamlError,
        endpoint: &Endpoint,
        in_response_to: &str,
        relay_state: Option<String>,
    ) -> Option<OutboundResponse> {
        let xml = self.builder.build_status_response(
            &endpoint.location,
            Some(in_response_to),
            error.saml_status(),
            Some(error.public_message()),
            self.clock.now(),
        );
        let response = OutboundResponse {
            kind: MessageKind::AuthnResponse,
            destination: endpoint.clone(),
            xml,
            relay_state,
            in_response_to: Some(in_response_to.to_string()),
            status: error.saml_status().to_string(),
        };
        if let Err(e) = self.dispatcher.dispatch(&response).await {
            tracing::warn!(error = %e, "Error response could not be delivered");
        }
        Some(response)
    }

    async fn deliver(&self, mut exchange: Exchange, response: OutboundResponse) -> ExchangeReport {
        match self.dispatcher.dispatch(&response).await {
            Ok(()) => {
                exchange.advance(ExchangeState::Dispatched, self.clock.now());
                tracing::debug!(
                    exchange_id = %exchange.id,
                    kind = response.kind.as_str(),
                    destination = %response.destination.location,
                    "Response dispatched"
                );
                ExchangeReport {
                    exchange,
                    response: Some(response),
                    error: None,
                }
            }
            Err(e) => self.failed(
                exchange,
                SamlError::DeliveryFailure(e.to_string()),
                Some(response),
            ),
        }
    }

    fn failed(
        &self,
        mut exchange: Exchange,
        error: SamlError,
        response: Option<OutboundResponse>,
    ) -> ExchangeReport {
        exchange.fail(&error, self.clock.now());
        tracing::warn!(
            exchange_id = %exchange.id,
            reason = error.reason_code(),
            error = %error,
            "SAML exchange failed"
        );
        ExchangeReport {
            exchange,
            response,
            error: Some(error),
        }
    }
}

/// Check the request signature when the relying party requires one.
///
/// Any registered signing key may have produced it. An HTTP-POST
/// signature must cover the request's root element.
fn verify_request_signature(
    relying_party: &RelyingParty,
    inbound: &InboundMessage,
    xml: &str,
    request_id: &str,
) -> SamlResult<()> {
    if !relying_party.requires_signed_requests() {
        return Ok(());
    }

    let verified = match inbound {
        InboundMessage::Redirect(query) => {
            let sig_alg = query.sig_alg()?.ok_or_else(|| {
                SamlError::InvalidRequestSignature(
                    "Signature validation required but no SigAlg provided".to_string(),
                )
            })?;
            let signature = query.signature()?.ok_or_else(|| {
                SamlError::InvalidRequestSignature(
                    "Signature validation required but no Signature provided".to_string(),
                )
            })?;
            let signed = query.signed_content();
            relying_party.signing_keys().any(|key| {
                verify_detached(signed.as_bytes(), &sig_alg, &signature, key.certificate()).is_ok()
            })
        }
        InboundMessage::Post { .. } => {
            if !has_enveloped_signature(xml) {
                return Err(SamlError::InvalidRequestSignature(
                    "Signature validation required but request is unsigned".to_string(),
                ));
            }
            relying_party.signing_keys().any(|key| {
                verify_enveloped(xml, key.certificate())
                    .is_ok_and(|reference| reference.is_empty() || reference == request_id)
            })
        }
    };

    if !verified {
        return Err(SamlError::InvalidRequestSignature(format!(
            "No signing key of {} verifies the request",
            relying_party.entity_id()
        )));
    }

    tracing::debug!(
        sp_entity_id = %relying_party.entity_id(),
        binding = %inbound.binding(),
        "Request signature validated"
    );
    Ok(())
}
