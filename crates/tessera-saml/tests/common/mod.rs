//! Common test utilities for engine tests
//!
//! Provides fixture loading, request builders, an assembled test IdP and
//! XML inspection helpers.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tessera_auth::{
    CredentialVerifier, Directory, InMemoryDirectory, LockoutPolicy, PasswordHasher,
};
use tessera_saml::binding::{encode_redirect_query, post_encode, PARAM_SAML_REQUEST};
use tessera_saml::xmldsig::sign_enveloped;
use tessera_saml::{
    EngineSettings, FixedClock, InMemoryDispatcher, InboundMessage, ProtocolEngine,
    SharedTrustStore, SigningCredentials, SigningKeySlot, TrustStore,
};

// ============================================================================
// Fixtures
// ============================================================================

pub const DEV_THY_COM: &str = "http://localhost:4000/v1/oauth/metadata/dev.thy.com";
pub const DEV_THY_COM_ACS: &str = "http://localhost:4000/v1/oauth/authorize";
pub const DEV_THY_COM_SLO: &str = "http://localhost:4000/v1/oauth/revoke?type=callback";
pub const IDP_ENTITY_ID: &str = "https://idp.tessera.test/saml/metadata";

pub const USER1: &str = "user1";
pub const USER1_SECRET: &str = "8976978976698";
pub const USER1_UID: &str = "f2d75402-e1ae-40fe-8cc9-98ca1ab9cd7e";

pub const METADATA_JSON: &str = include_str!("../fixtures/saml20-sp-remote.json");
pub const DIRECTORY_JSON: &str = include_str!("../fixtures/authsources.json");

/// Inside the validity window of the dev.thy.com certificates.
pub fn scenario_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn fast_hasher() -> PasswordHasher {
    PasswordHasher::with_params(8, 1, 1).unwrap()
}

/// The fixture directory without `user3`, whose uid duplicates `user2`'s.
pub fn directory_json_without_duplicate_uid() -> String {
    let mut doc: Value = serde_json::from_str(DIRECTORY_JSON).unwrap();
    doc["users"].as_object_mut().unwrap().remove("user3:user3");
    doc.to_string()
}

/// Key material standing in for a relying party's own.
pub struct RpKeys {
    pub signing: SigningCredentials,
    pub encryption: Option<SigningCredentials>,
}

impl RpKeys {
    /// A generated signing key. The published encryption certificate is kept.
    pub fn signing_only() -> Self {
        Self {
            signing: SigningCredentials::self_signed("dev.thy.com signing", 3650).unwrap(),
            encryption: None,
        }
    }

    /// Generated signing and encryption keys.
    pub fn generated() -> Self {
        Self {
            signing: SigningCredentials::self_signed("dev.thy.com signing", 3650).unwrap(),
            encryption: Some(
                SigningCredentials::self_signed("dev.thy.com encryption", 3650).unwrap(),
            ),
        }
    }
}

/// The fixture metadata with dev.thy.com's certificates swapped for `keys`.
pub fn metadata_json_with(keys: &RpKeys) -> String {
    let mut doc: Value = serde_json::from_str(METADATA_JSON).unwrap();
    let rp_keys = doc[DEV_THY_COM]["keys"].as_array_mut().unwrap();
    for key in rp_keys.iter_mut() {
        if key["signing"] == Value::Bool(true) {
            key["X509Certificate"] = Value::String(keys.signing.certificate_base64_der().unwrap());
        }
        if key["encryption"] == Value::Bool(true) {
            if let Some(encryption) = &keys.encryption {
                key["X509Certificate"] =
                    Value::String(encryption.certificate_base64_der().unwrap());
            }
        }
    }
    doc.to_string()
}

// ============================================================================
// Test IdP
// ============================================================================

pub struct TestIdp {
    pub engine: ProtocolEngine,
    pub dispatcher: Arc<InMemoryDispatcher>,
    pub clock: Arc<FixedClock>,
    pub credentials: SigningCredentials,
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        lockout: LockoutPolicy {
            max_failures: 3,
            ..LockoutPolicy::default()
        },
        ..EngineSettings::new(IDP_ENTITY_ID)
    }
}

impl TestIdp {
    pub fn new(metadata_json: &str) -> Self {
        let hasher = fast_hasher();
        let directory =
            InMemoryDirectory::from_json(&directory_json_without_duplicate_uid(), &hasher).unwrap();
        Self::with_directory(metadata_json, Arc::new(directory), settings())
    }

    pub fn with_directory(
        metadata_json: &str,
        directory: Arc<dyn Directory>,
        settings: EngineSettings,
    ) -> Self {
        let verifier = CredentialVerifier::new(
            directory,
            fast_hasher(),
            settings.lockout,
            settings.directory_timeout(),
        )
        .unwrap();
        let credentials = SigningCredentials::self_signed("tessera idp", 3650).unwrap();
        let dispatcher = Arc::new(InMemoryDispatcher::new());
        let clock = Arc::new(FixedClock::new(scenario_instant()));

        let engine = ProtocolEngine::new(
            settings,
            SharedTrustStore::new(TrustStore::from_json(metadata_json).unwrap()),
            verifier,
            SigningKeySlot::new(Some(credentials.clone())),
            dispatcher.clone(),
            clock.clone(),
        )
        .unwrap();

        Self {
            engine,
            dispatcher,
            clock,
            credentials,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use tessera_saml::Clock;
        self.clock.now()
    }
}

// ============================================================================
// Request builders
// ============================================================================

pub fn saml_instant(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn authn_request_xml(id: &str, issuer: &str, issue_instant: DateTime<Utc>) -> String {
    authn_request_xml_with(id, issuer, issue_instant, "")
}

/// `extra` is spliced into the root element's attributes.
pub fn authn_request_xml_with(
    id: &str,
    issuer: &str,
    issue_instant: DateTime<Utc>,
    extra: &str,
) -> String {
    format!(
        r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{id}" Version="2.0" IssueInstant="{}"{extra}><saml:Issuer>{issuer}</saml:Issuer><samlp:NameIDPolicy AllowCreate="true"/></samlp:AuthnRequest>"#,
        saml_instant(issue_instant)
    )
}

pub fn logout_request_xml(
    id: &str,
    issuer: &str,
    issue_instant: DateTime<Utc>,
    name_id: &str,
    session_index: Option<&str>,
) -> String {
    let session_index = session_index
        .map(|s| format!("<samlp:SessionIndex>{s}</samlp:SessionIndex>"))
        .unwrap_or_default();
    format!(
        r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{id}" Version="2.0" IssueInstant="{}"><saml:Issuer>{issuer}</saml:Issuer><saml:NameID>{name_id}</saml:NameID>{session_index}</samlp:LogoutRequest>"#,
        saml_instant(issue_instant)
    )
}

/// HTTP-Redirect message, query-signed when credentials are given.
pub fn redirect(xml: &str, relay_state: Option<&str>, signer: Option<&SigningCredentials>) -> InboundMessage {
    let query = encode_redirect_query(PARAM_SAML_REQUEST, xml, relay_state, signer).unwrap();
    InboundMessage::redirect(&query).unwrap()
}

/// HTTP-POST message with an enveloped signature over the root element.
pub fn signed_post(xml: &str, id: &str, signer: &SigningCredentials) -> InboundMessage {
    let signed = sign_enveloped(xml, id, signer).unwrap();
    InboundMessage::post(post_encode(&signed), None)
}

pub fn unsigned_post(xml: &str) -> InboundMessage {
    InboundMessage::post(post_encode(xml), None)
}

// ============================================================================
// XML inspection
// ============================================================================

/// Fields of a SAML response or assertion, for assertions in tests.
#[derive(Debug, Default)]
pub struct ParsedMessage {
    pub root: Option<String>,
    pub destination: Option<String>,
    pub in_response_to: Option<String>,
    pub status_codes: Vec<String>,
    pub issuer: Option<String>,
    pub name_id: Option<String>,
    pub audience: Option<String>,
    pub recipient: Option<String>,
    pub not_before: Option<String>,
    pub not_on_or_after: Option<String>,
    pub session_index: Option<String>,
    pub attributes: HashMap<String, Vec<String>>,
    pub has_signature: bool,
    pub has_encrypted_assertion: bool,
}

pub fn parse_saml_xml(xml: &str) -> ParsedMessage {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parsed = ParsedMessage::default();
    let mut current_element = String::new();
    let mut current_attribute: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let attrs: HashMap<String, String> = e
                    .attributes()
                    .flatten()
                    .map(|a| {
                        (
                            String::from_utf8_lossy(a.key.local_name().as_ref()).to_string(),
                            a.unescape_value().unwrap_or_default().to_string(),
                        )
                    })
                    .collect();

                if parsed.root.is_none() {
                    parsed.root = Some(name.clone());
                    parsed.destination = attrs.get("Destination").cloned();
                    parsed.in_response_to = attrs.get("InResponseTo").cloned();
                }
                match name.as_str() {
                    "StatusCode" => parsed.status_codes.extend(attrs.get("Value").cloned()),
                    "SubjectConfirmationData" => parsed.recipient = attrs.get("Recipient").cloned(),
                    "Conditions" => {
                        parsed.not_before = attrs.get("NotBefore").cloned();
                        parsed.not_on_or_after = attrs.get("NotOnOrAfter").cloned();
                    }
                    "AuthnStatement" => parsed.session_index = attrs.get("SessionIndex").cloned(),
                    "Attribute" => current_attribute = attrs.get("Name").cloned(),
                    "Signature" => parsed.has_signature = true,
                    "EncryptedAssertion" => parsed.has_encrypted_assertion = true,
                    _ => {}
                }
                current_element = name;
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                match current_element.as_str() {
                    "Issuer" if parsed.issuer.is_none() => parsed.issuer = Some(text),
                    "NameID" => parsed.name_id = Some(text),
                    "Audience" => parsed.audience = Some(text),
                    "AttributeValue" => {
                        if let Some(name) = &current_attribute {
                            parsed.attributes.entry(name.clone()).or_default().push(text);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"Attribute" {
                    current_attribute = None;
                }
                current_element.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => panic!("XML parse error: {e}"),
            _ => {}
        }
    }

    parsed
}
