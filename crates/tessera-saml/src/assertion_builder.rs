//! SAML Assertion and Response builder

use crate::attributes::{release_attributes, resolve_name_id, ResolvedAttribute};
use crate::clock::Clock;
use crate::encryption::{encrypt_assertion, EncryptionError};
use crate::error::{status, BuildFailure, ConfigurationError};
use crate::signing::{SigningCredentials, SigningKeySlot};
use crate::trust_store::{Endpoint, RelyingParty};
use crate::xmldsig::{sign_enveloped, xml_escape};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tessera_auth::Principal;
use uuid::Uuid;

pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 120;
pub const DEFAULT_ASSERTION_LIFETIME_SECS: i64 = 300;
pub const MAX_ASSERTION_LIFETIME_SECS: i64 = 3600;

const AUTHN_CONTEXT_PASSWORD_PROTECTED: &str =
    "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport";

pub(crate) const SAML_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conditions {
    pub not_before: DateTime<Utc>,
    pub not_on_or_after: DateTime<Utc>,
    /// The one and only audience: the relying party's entity identifier.
    pub audience: String,
}

/// A signed, and possibly encrypted, assertion.
#[derive(Debug, Clone)]
pub struct Assertion {
    pub id: String,
    pub issuer: String,
    pub issue_instant: DateTime<Utc>,
    pub name_id: String,
    pub name_id_format: String,
    pub session_index: String,
    pub conditions: Conditions,
    pub attributes: Vec<ResolvedAttribute>,
    pub recipient: String,
    pub in_response_to: Option<String>,
    signed_xml: String,
    encrypted_xml: Option<String>,
}

impl Assertion {
    /// The signed `saml:Assertion` element.
    #[must_use]
    pub fn signed_xml(&self) -> &str {
        &self.signed_xml
    }

    #[must_use]
    pub fn encrypted_xml(&self) -> Option<&str> {
        self.encrypted_xml.as_deref()
    }

    /// What goes into the response: the `EncryptedAssertion` when the relying
    /// party has an encryption key, otherwise the signed assertion.
    #[must_use]
    pub fn serialized(&self) -> &str {
        self.encrypted_xml.as_deref().unwrap_or(&self.signed_xml)
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.encrypted_xml.is_some()
    }
}

/// Builder for SAML assertions and responses
pub struct AssertionBuilder {
    idp_entity_id: String,
    credentials: SigningKeySlot,
    clock_skew: Duration,
    lifetime: Duration,
}

impl std::fmt::Debug for AssertionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionBuilder")
            .field("idp_entity_id", &self.idp_entity_id)
            .field("has_credentials", &self.credentials.load().is_some())
            .field("clock_skew", &self.clock_skew)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl AssertionBuilder {
    /// Create a new assertion builder with default skew and lifetime.
    #[must_use]
    pub fn new(idp_entity_id: impl Into<String>, credentials: Option<SigningCredentials>) -> Self {
        Self::with_signing_slot(idp_entity_id, SigningKeySlot::new(credentials))
    }

    /// Create a builder that signs with whatever `slot` holds at build time.
    #[must_use]
    pub fn with_signing_slot(idp_entity_id: impl Into<String>, slot: SigningKeySlot) -> Self {
        Self {
            idp_entity_id: idp_entity_id.into(),
            credentials: slot,
            clock_skew: Duration::seconds(DEFAULT_CLOCK_SKEW_SECS),
            lifetime: Duration::seconds(DEFAULT_ASSERTION_LIFETIME_SECS),
        }
    }

    /// Set the clock-skew tolerance and assertion lifetime.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the skew is negative or the lifetime
    /// is not in `(0, 1h]`.
    pub fn with_validity(
        mut self,
        clock_skew: Duration,
        lifetime: Duration,
    ) -> Result<Self, ConfigurationError> {
        let mut problems = Vec::new();
        if clock_skew < Duration::zero() {
            problems.push("assertion clock skew must not be negative".to_string());
        }
        if lifetime <= Duration::zero() || lifetime > Duration::seconds(MAX_ASSERTION_LIFETIME_SECS)
        {
            problems.push(format!(
                "assertion lifetime must be between 1 and {MAX_ASSERTION_LIFETIME_SECS} seconds"
            ));
        }
        if !problems.is_empty() {
            return Err(ConfigurationError::new(problems));
        }
        self.clock_skew = clock_skew;
        self.lifetime = lifetime;
        Ok(self)
    }

    #[must_use]
    pub fn idp_entity_id(&self) -> &str {
        &self.idp_entity_id
    }

    /// The current signing credentials.
    #[must_use]
    pub fn credentials(&self) -> Option<Arc<SigningCredentials>> {
        self.credentials.load()
    }

    /// The slot the builder signs from.
    #[must_use]
    pub fn signing_slot(&self) -> &SigningKeySlot {
        &self.credentials
    }

    /// Replace the signing credentials. In-flight builds keep the ones they
    /// already loaded.
    pub fn rotate_credentials(&self, credentials: Option<SigningCredentials>) {
        self.credentials.store(credentials);
    }

    /// Build a signed (and, if the relying party has an encryption key,
    /// encrypted) assertion for `principal`, addressed to `endpoint`.
    ///
    /// # Errors
    ///
    /// - `BuildFailure::NoSigningKey` if no credentials are installed
    /// - `BuildFailure::EncryptionKeyInvalid` if the relying party's
    ///   encryption certificate is unusable at the current instant
    /// - `BuildFailure::SigningFailed` if signing fails
    pub fn build(
        &self,
        principal: &Principal,
        relying_party: &RelyingParty,
        endpoint: &Endpoint,
        in_response_to: Option<&str>,
        clock: &dyn Clock,
    ) -> Result<Assertion, BuildFailure> {
        let credentials = self.credentials().ok_or(BuildFailure::NoSigningKey)?;
        let now = clock.now();

        let encryption_key = relying_party.encryption_key();
        if let Some(key) = encryption_key {
            key.check_usable(now)
                .map_err(BuildFailure::EncryptionKeyInvalid)?;
        }

        let policy = relying_party.release_policy();
        let name_id_format = relying_party.name_id_format().to_string();
        let name_id = resolve_name_id(principal, &name_id_format, policy).ok_or_else(|| {
            BuildFailure::SigningFailed(format!("no NameID for format {name_id_format}"))
        })?;

        let mut assertion = Assertion {
            id: format!("_assert_{}", Uuid::new_v4()),
            issuer: self.idp_entity_id.clone(),
            issue_instant: now,
            name_id,
            name_id_format,
            session_index: format!("_session_{}", Uuid::new_v4()),
            conditions: Conditions {
                not_before: now - self.clock_skew,
                not_on_or_after: now + self.lifetime,
                audience: relying_party.entity_id().to_string(),
            },
            attributes: release_attributes(principal, policy),
            recipient: endpoint.location.clone(),
            in_response_to: in_response_to.map(String::from),
            signed_xml: String::new(),
            encrypted_xml: None,
        };

        let xml = assertion_xml(&assertion);
        assertion.signed_xml = sign_enveloped(&xml, &assertion.id, &credentials)
            .map_err(|e| BuildFailure::SigningFailed(e.to_string()))?;

        if let Some(key) = encryption_key {
            let encrypted = encrypt_assertion(&assertion.signed_xml, key.certificate())
                .map_err(|e| match e {
                    EncryptionError::InvalidKey(reason) => BuildFailure::EncryptionKeyInvalid(reason),
                    other => BuildFailure::SigningFailed(format!("assertion encryption failed: {other}")),
                })?;
            assertion.encrypted_xml = Some(encrypted);
        }

        tracing::debug!(
            sp_entity_id = %assertion.conditions.audience,
            assertion_id = %assertion.id,
            encrypted = assertion.is_encrypted(),
            attributes = assertion.attributes.len(),
            "Assertion built"
        );

        Ok(assertion)
    }

    /// Wrap an assertion in a successful `samlp:Response`.
    #[must_use]
    pub fn build_response(&self, assertion: &Assertion) -> String {
        let mut xml = response_open(
            &self.idp_entity_id,
            &format!("_resp_{}", Uuid::new_v4()),
            assertion.issue_instant,
            &assertion.recipient,
            assertion.in_response_to.as_deref(),
        );
        xml.push_str("\n    <samlp:Status>\n        <samlp:StatusCode Value=\"");
        xml.push_str(status::SUCCESS);
        xml.push_str("\"/>\n    </samlp:Status>\n    ");
        xml.push_str(assertion.serialized());
        xml.push_str("\n</samlp:Response>");
        xml
    }

    /// A `samlp:Response` carrying only an error status.
    #[must_use]
    pub fn build_status_response(
        &self,
        destination: &str,
        in_response_to: Option<&str>,
        status_code: &str,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> String {
        let mut xml = response_open(
            &self.idp_entity_id,
            &format!("_resp_{}", Uuid::new_v4()),
            now,
            destination,
            in_response_to,
        );
        xml.push_str("\n    ");
        xml.push_str(&status_xml(status_code, message));
        xml.push_str("\n</samlp:Response>");
        xml
    }
}

fn response_open(
    issuer: &str,
    response_id: &str,
    issue_instant: DateTime<Utc>,
    destination: &str,
    in_response_to: Option<&str>,
) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<samlp:Response xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\"\n");
    xml.push_str("    xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\"\n");
    xml.push_str("    ID=\"");
    xml.push_str(&xml_escape(response_id));
    xml.push_str("\"\n    Version=\"2.0\"\n    IssueInstant=\"");
    xml.push_str(&issue_instant.format(SAML_TIME_FORMAT).to_string());
    xml.push_str("\"\n    Destination=\"");
    xml.push_str(&xml_escape(destination));
    xml.push('"');
    if let Some(id) = in_response_to {
        xml.push_str("\n    InResponseTo=\"");
        xml.push_str(&xml_escape(id));
        xml.push('"');
    }
    xml.push_str(">\n    <saml:Issuer>");
    xml.push_str(&xml_escape(issuer));
    xml.push_str("</saml:Issuer>");
    xml
}

/// `samlp:Status` element. Second-level codes are nested under the
/// top-level code the protocol requires.
pub(crate) fn status_xml(status_code: &str, message: Option<&str>) -> String {
    let top_level = match status_code {
        status::SUCCESS | status::REQUESTER | status::RESPONDER => None,
        status::INVALID_NAMEID_POLICY => Some(status::REQUESTER),
        _ => Some(status::RESPONDER),
    };

    let mut xml = String::from("<samlp:Status><samlp:StatusCode Value=\"");
    match top_level {
        Some(top) => {
            xml.push_str(top);
            xml.push_str("\"><samlp:StatusCode Value=\"");
            xml.push_str(&xml_escape(status_code));
            xml.push_str("\"/></samlp:StatusCode>");
        }
        None => {
            xml.push_str(status_code);
            xml.push_str("\"/>");
        }
    }
    if let Some(message) = message {
        xml.push_str("<samlp:StatusMessage>");
        xml.push_str(&xml_escape(message));
        xml.push_str("</samlp:StatusMessage>");
    }
    xml.push_str("</samlp:Status>");
    xml
}

fn assertion_xml(assertion: &Assertion) -> String {
    let issue_instant = assertion.issue_instant.format(SAML_TIME_FORMAT).to_string();
    let not_before = assertion
        .conditions
        .not_before
        .format(SAML_TIME_FORMAT)
        .to_string();
    let not_on_or_after = assertion
        .conditions
        .not_on_or_after
        .format(SAML_TIME_FORMAT)
        .to_string();

    let in_response_to_attr = assertion
        .in_response_to
        .as_deref()
        .map(|id| {
            let mut s = String::from(" InResponseTo=\"");
            s.push_str(&xml_escape(id));
            s.push('"');
            s
        })
        .unwrap_or_default();

    let mut xml = String::new();
    xml.push_str("<saml:Assertion xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\"\n");
    xml.push_str("        xmlns:xs=\"http://www.w3.org/2001/XMLSchema\"\n");
    xml.push_str("        xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\"\n        ID=\"");
    xml.push_str(&xml_escape(&assertion.id));
    xml.push_str("\"\n        Version=\"2.0\"\n        IssueInstant=\"");
    xml.push_str(&issue_instant);
    xml.push_str("\">\n        <saml:Issuer>");
    xml.push_str(&xml_escape(&assertion.issuer));
    xml.push_str("</saml:Issuer>\n        <saml:Subject>\n            <saml:NameID Format=\"");
    xml.push_str(&xml_escape(&assertion.name_id_format));
    xml.push_str("\">");
    xml.push_str(&xml_escape(&assertion.name_id));
    xml.push_str("</saml:NameID>\n            <saml:SubjectConfirmation Method=\"urn:oasis:names:tc:SAML:2.0:cm:bearer\">\n                <saml:SubjectConfirmationData\n                    NotOnOrAfter=\"");
    xml.push_str(&not_on_or_after);
    xml.push_str("\"\n                    Recipient=\"");
    xml.push_str(&xml_escape(&assertion.recipient));
    xml.push('"');
    xml.push_str(&in_response_to_attr);
    xml.push_str("/>\n            </saml:SubjectConfirmation>\n        </saml:Subject>\n");
    xml.push_str("        <saml:Conditions NotBefore=\"");
    xml.push_str(&not_before);
    xml.push_str("\" NotOnOrAfter=\"");
    xml.push_str(&not_on_or_after);
    xml.push_str("\">\n            <saml:AudienceRestriction>\n                <saml:Audience>");
    xml.push_str(&xml_escape(&assertion.conditions.audience));
    xml.push_str("</saml:Audience>\n            </saml:AudienceRestriction>\n        </saml:Conditions>\n");
    xml.push_str("        <saml:AuthnStatement AuthnInstant=\"");
    xml.push_str(&issue_instant);
    xml.push_str("\" SessionIndex=\"");
    xml.push_str(&xml_escape(&assertion.session_index));
    xml.push_str("\">\n            <saml:AuthnContext>\n                <saml:AuthnContextClassRef>");
    xml.push_str(AUTHN_CONTEXT_PASSWORD_PROTECTED);
    xml.push_str("</saml:AuthnContextClassRef>\n            </saml:AuthnContext>\n        </saml:AuthnStatement>\n");
    xml.push_str(&attributes_xml(&assertion.attributes));
    xml.push_str("    </saml:Assertion>");
    xml
}

fn attributes_xml(attributes: &[ResolvedAttribute]) -> String {
    if attributes.is_empty() {
        return String::new();
    }

    let mut attrs = String::from("        <saml:AttributeStatement>\n");

    for attr in attributes {
        attrs.push_str("            <saml:Attribute Name=\"");
        attrs.push_str(&xml_escape(&attr.name));
        attrs.push_str("\" NameFormat=\"");
        attrs.push_str(&xml_escape(&attr.name_format));
        attrs.push_str("\">\n");

        for value in &attr.values {
            attrs.push_str("                <saml:AttributeValue xsi:type=\"xs:string\">");
            attrs.push_str(&xml_escape(value));
            attrs.push_str("</saml:AttributeValue>\n");
        }

        attrs.push_str("            </saml:Attribute>\n");
    }

    attrs.push_str("        </saml:AttributeStatement>\n");
    attrs
}
