//! Trusted relying parties, loaded once and read without locks.
//!
//! A [`TrustStore`] is immutable after load. [`SharedTrustStore`] publishes
//! it behind an atomic pointer so that a reload is a single swap and every
//! exchange completes against the snapshot it started with.

use crate::attributes::{
    is_supported_attribute_name_format, is_supported_nameid_format, AttributeReleasePolicy,
    ATTRNAME_FORMAT_BASIC, NAMEID_FORMAT_TRANSIENT,
};
use crate::error::{ConfigurationError, SamlError, SamlResult};
use crate::metadata::{ContactEntry, EndpointList, KeyEntry, MetadataDocument, RelyingPartyEntry};
use arc_swap::ArcSwap;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use openssl::asn1::Asn1Time;
use openssl::x509::X509;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

pub const BINDING_HTTP_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
pub const BINDING_HTTP_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";

const KEY_TYPE_X509: &str = "X509Certificate";

/// Transport binding of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    HttpPost,
    HttpRedirect,
}

impl Binding {
    #[must_use]
    pub fn uri(self) -> &'static str {
        match self {
            Self::HttpPost => BINDING_HTTP_POST,
            Self::HttpRedirect => BINDING_HTTP_REDIRECT,
        }
    }

    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            BINDING_HTTP_POST => Some(Self::HttpPost),
            BINDING_HTTP_REDIRECT => Some(Self::HttpRedirect),
            _ => None,
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    AssertionConsumer,
    SingleLogout,
}

impl EndpointKind {
    fn element_name(self) -> &'static str {
        match self {
            Self::AssertionConsumer => "AssertionConsumerService",
            Self::SingleLogout => "SingleLogoutService",
        }
    }

    fn default_binding(self) -> Binding {
        match self {
            Self::AssertionConsumer => Binding::HttpPost,
            Self::SingleLogout => Binding::HttpRedirect,
        }
    }
}

/// A registered relying-party endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub binding: Binding,
    pub location: String,
    pub index: u16,
    pub is_default: bool,
}

/// A relying-party certificate and what it may be used for.
#[derive(Clone)]
pub struct TrustKey {
    der: Vec<u8>,
    certificate: X509,
    signing: bool,
    encryption: bool,
}

impl fmt::Debug for TrustKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustKey")
            .field("signing", &self.signing)
            .field("encryption", &self.encryption)
            .field("der_len", &self.der.len())
            .finish()
    }
}

impl TrustKey {
    /// Parse a key from base64 DER.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the text is not a certificate.
    pub fn from_base64(
        encoded: &str,
        signing: bool,
        encryption: bool,
    ) -> Result<Self, String> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let der = STANDARD
            .decode(compact)
            .map_err(|e| format!("certificate is not valid base64: {e}"))?;
        let certificate =
            X509::from_der(&der).map_err(|e| format!("certificate is not valid DER: {e}"))?;
        Ok(Self {
            der,
            certificate,
            signing,
            encryption,
        })
    }

    #[must_use]
    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    #[must_use]
    pub fn is_signing(&self) -> bool {
        self.signing
    }

    #[must_use]
    pub fn is_encryption(&self) -> bool {
        self.encryption
    }

    /// Check that the certificate is in its validity window at `now` and
    /// carries an RSA key.
    ///
    /// # Errors
    ///
    /// Returns a description of why the key cannot be used.
    pub fn check_usable(&self, now: DateTime<Utc>) -> Result<(), String> {
        let now = Asn1Time::from_unix(now.timestamp())
            .map_err(|e| format!("cannot represent current time: {e}"))?;

        let before_start = self
            .certificate
            .not_before()
            .compare(&now)
            .map_err(|e| format!("cannot compare validity: {e}"))?
            .is_gt();
        let after_end = self
            .certificate
            .not_after()
            .compare(&now)
            .map_err(|e| format!("cannot compare validity: {e}"))?
            .is_lt();

        if before_start {
            return Err(format!(
                "certificate is not valid before {}",
                self.certificate.not_before()
            ));
        }
        if after_end {
            return Err(format!(
                "certificate expired at {}",
                self.certificate.not_after()
            ));
        }

        self.certificate
            .public_key()
            .and_then(|key| key.rsa())
            .map(|_| ())
            .map_err(|_| "certificate does not carry an RSA key".to_string())
    }
}

/// A trusted relying party (service provider).
#[derive(Debug, Clone)]
pub struct RelyingParty {
    entity_id: String,
    assertion_consumer_services: Vec<Endpoint>,
    single_logout_services: Vec<Endpoint>,
    name_id_format: String,
    keys: Vec<TrustKey>,
    validate_authn_request: bool,
    contacts: Vec<ContactEntry>,
    release_policy: AttributeReleasePolicy,
}

impl RelyingParty {
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    #[must_use]
    pub fn assertion_consumer_services(&self) -> &[Endpoint] {
        &self.assertion_consumer_services
    }

    #[must_use]
    pub fn single_logout_services(&self) -> &[Endpoint] {
        &self.single_logout_services
    }

    #[must_use]
    pub fn name_id_format(&self) -> &str {
        &self.name_id_format
    }

    #[must_use]
    pub fn keys(&self) -> &[TrustKey] {
        &self.keys
    }

    /// Keys flagged for signing, in metadata order.
    pub fn signing_keys(&self) -> impl Iterator<Item = &TrustKey> {
        self.keys.iter().filter(|k| k.signing)
    }

    /// The first key flagged for encryption.
    #[must_use]
    pub fn encryption_key(&self) -> Option<&TrustKey> {
        self.keys.iter().find(|k| k.encryption)
    }

    #[must_use]
    pub fn requires_signed_requests(&self) -> bool {
        self.validate_authn_request
    }

    #[must_use]
    pub fn contacts(&self) -> &[ContactEntry] {
        &self.contacts
    }

    #[must_use]
    pub fn release_policy(&self) -> &AttributeReleasePolicy {
        &self.release_policy
    }

    #[must_use]
    pub fn default_endpoint(&self, kind: EndpointKind) -> Option<&Endpoint> {
        let endpoints = match kind {
            EndpointKind::AssertionConsumer => &self.assertion_consumer_services,
            EndpointKind::SingleLogout => &self.single_logout_services,
        };
        endpoints.iter().find(|e| e.is_default)
    }

    #[must_use]
    pub fn endpoint_by_index(&self, index: u16) -> Option<&Endpoint> {
        self.assertion_consumer_services
            .iter()
            .find(|e| e.index == index)
    }

    /// The assertion consumer registered at `url`, comparing scheme and host
    /// case-insensitively and ignoring a trailing slash.
    #[must_use]
    pub fn acs_by_location(&self, url: &str) -> Option<&Endpoint> {
        let wanted = normalize_url(url);
        self.assertion_consumer_services
            .iter()
            .find(|e| normalize_url(&e.location) == wanted)
    }

    /// Resolve the assertion consumer an `AuthnRequest` asked for.
    ///
    /// An index takes precedence over a URL; when both are present they must
    /// name the same endpoint. With neither, the default endpoint is used.
    ///
    /// # Errors
    ///
    /// Returns `SamlError::EndpointMismatch` if the request names an endpoint
    /// that is not registered.
    pub fn resolve_acs(&self, index: Option<u16>, url: Option<&str>) -> SamlResult<&Endpoint> {
        let endpoint = match (index, url) {
            (Some(index), _) => self.endpoint_by_index(index).ok_or_else(|| {
                SamlError::EndpointMismatch(format!(
                    "AssertionConsumerServiceIndex {index} is not registered for {}",
                    self.entity_id
                ))
            })?,
            (None, Some(url)) => self.acs_by_location(url).ok_or_else(|| {
                SamlError::EndpointMismatch(format!(
                    "AssertionConsumerServiceURL {url} is not registered for {}",
                    self.entity_id
                ))
            })?,
            (None, None) => self
                .default_endpoint(EndpointKind::AssertionConsumer)
                .ok_or_else(|| {
                    SamlError::EndpointMismatch(format!(
                        "{} has no default AssertionConsumerService",
                        self.entity_id
                    ))
                })?,
        };

        if let (Some(_), Some(url)) = (index, url) {
            if normalize_url(url) != normalize_url(&endpoint.location) {
                return Err(SamlError::EndpointMismatch(format!(
                    "AssertionConsumerServiceURL {url} does not match index {}",
                    endpoint.index
                )));
            }
        }

        Ok(endpoint)
    }
}

/// Lowercase scheme and host, drop a trailing slash from the path.
fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.trim_end_matches('/').to_string();
    };
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);

    let (path, suffix) = match tail.find(['?', '#']) {
        Some(pos) => tail.split_at(pos),
        None => (tail, ""),
    };

    format!(
        "{}://{}{}{}",
        scheme.to_ascii_lowercase(),
        authority.to_ascii_lowercase(),
        path.trim_end_matches('/'),
        suffix
    )
}

/// Immutable set of trusted relying parties.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    parties: HashMap<String, Arc<RelyingParty>>,
}

impl TrustStore {
    /// Load and validate a metadata document.
    ///
    /// # Errors
    ///
    /// Returns every problem found across all records in one
    /// `ConfigurationError`.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let document = MetadataDocument::from_json(json).map_err(|e| {
            ConfigurationError::single(format!("metadata is not valid JSON: {e}"))
        })?;
        Self::from_document(document)
    }

    /// Validate a parsed metadata document.
    ///
    /// # Errors
    ///
    /// Returns every problem found across all records in one
    /// `ConfigurationError`.
    pub fn from_document(document: MetadataDocument) -> Result<Self, ConfigurationError> {
        let mut problems = Vec::new();
        let mut parties = HashMap::new();

        for (key, entry) in document.0 {
            match load_relying_party(&key, entry) {
                Ok(party) => {
                    parties.insert(key, Arc::new(party));
                }
                Err(entry_problems) => problems.extend(
                    entry_problems
                        .into_iter()
                        .map(|p| format!("relying party '{key}': {p}")),
                ),
            }
        }

        if problems.is_empty() {
            Ok(Self { parties })
        } else {
            Err(ConfigurationError::new(problems))
        }
    }

    /// Exact, case-sensitive lookup.
    ///
    /// # Errors
    ///
    /// Returns `SamlError::UnknownRelyingParty` if the entity is not trusted.
    pub fn lookup(&self, entity_id: &str) -> SamlResult<Arc<RelyingParty>> {
        self.parties
            .get(entity_id)
            .cloned()
            .ok_or_else(|| SamlError::UnknownRelyingParty(entity_id.to_string()))
    }

    /// Signing-capable keys of a relying party, in metadata order.
    ///
    /// # Errors
    ///
    /// Returns `SamlError::UnknownRelyingParty` if the entity is not trusted.
    pub fn signing_keys_for(&self, entity_id: &str) -> SamlResult<Vec<TrustKey>> {
        Ok(self.lookup(entity_id)?.signing_keys().cloned().collect())
    }

    /// The default endpoint of the given kind.
    ///
    /// # Errors
    ///
    /// Returns `SamlError::UnknownRelyingParty` if the entity is not trusted,
    /// or `SamlError::EndpointMismatch` if it has no such endpoint.
    pub fn default_endpoint(&self, entity_id: &str, kind: EndpointKind) -> SamlResult<Endpoint> {
        self.lookup(entity_id)?
            .default_endpoint(kind)
            .cloned()
            .ok_or_else(|| {
                SamlError::EndpointMismatch(format!(
                    "{entity_id} has no {}",
                    kind.element_name()
                ))
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parties.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    /// Entity identifiers, sorted.
    #[must_use]
    pub fn entity_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.parties.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// A [`TrustStore`] behind an atomic pointer.
#[derive(Clone)]
pub struct SharedTrustStore {
    current: Arc<ArcSwap<TrustStore>>,
}

impl SharedTrustStore {
    #[must_use]
    pub fn new(store: TrustStore) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(store)),
        }
    }

    /// The store as of now. Later swaps do not affect the returned snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<TrustStore> {
        self.current.load_full()
    }

    /// Publish a new store, returning the previous one.
    pub fn swap(&self, store: TrustStore) -> Arc<TrustStore> {
        self.current.swap(Arc::new(store))
    }
}

impl fmt::Debug for SharedTrustStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedTrustStore")
            .field("relying_parties", &self.current.load().len())
            .finish()
    }
}

fn load_relying_party(key: &str, entry: RelyingPartyEntry) -> Result<RelyingParty, Vec<String>> {
    let mut problems = Vec::new();

    if key.trim().is_empty() {
        problems.push("entity identifier is empty".to_string());
    }
    if let Some(entity_id) = &entry.entityid {
        if entity_id != key {
            problems.push(format!(
                "entityid '{entity_id}' does not match its metadata key"
            ));
        }
    }

    let assertion_consumer_services = load_endpoints(
        entry.assertion_consumer_service.as_ref(),
        EndpointKind::AssertionConsumer,
        &mut problems,
    );
    let single_logout_services = load_endpoints(
        entry.single_logout_service.as_ref(),
        EndpointKind::SingleLogout,
        &mut problems,
    );

    let keys = load_keys(&entry.keys, &mut problems);
    if entry.validate_authn_request && !keys.iter().any(|k| k.signing) {
        problems.push(
            "validate.authnrequest is set but no key is flagged for signing".to_string(),
        );
    }

    let name_id_format = entry
        .name_id_format
        .unwrap_or_else(|| NAMEID_FORMAT_TRANSIENT.to_string());
    if !is_supported_nameid_format(&name_id_format) {
        problems.push(format!("unsupported NameIDFormat '{name_id_format}'"));
    }

    let name_format = entry
        .attribute_name_format
        .unwrap_or_else(|| ATTRNAME_FORMAT_BASIC.to_string());
    if !is_supported_attribute_name_format(&name_format) {
        problems.push(format!("unsupported attributes.NameFormat '{name_format}'"));
    }

    if !problems.is_empty() {
        return Err(problems);
    }

    Ok(RelyingParty {
        entity_id: key.to_string(),
        assertion_consumer_services,
        single_logout_services,
        name_id_format,
        keys,
        validate_authn_request: entry.validate_authn_request,
        contacts: entry.contacts,
        release_policy: AttributeReleasePolicy {
            allowed: entry.attributes.map(|names| names.into_iter().collect::<BTreeSet<_>>()),
            name_format,
            name_id_attribute: entry.name_id_attribute,
        },
    })
}

fn load_endpoints(
    list: Option<&EndpointList>,
    kind: EndpointKind,
    problems: &mut Vec<String>,
) -> Vec<Endpoint> {
    let element = kind.element_name();

    let mut endpoints = match list {
        None => Vec::new(),
        Some(EndpointList::Location(location)) => vec![Endpoint {
            binding: kind.default_binding(),
            location: location.clone(),
            index: 0,
            is_default: true,
        }],
        Some(EndpointList::Endpoints(entries)) => {
            let mut endpoints = Vec::with_capacity(entries.len());
            for (position, entry) in entries.iter().enumerate() {
                let binding = match entry.binding.as_deref() {
                    None => kind.default_binding(),
                    Some(uri) => match Binding::from_uri(uri) {
                        Some(binding) => binding,
                        None => {
                            problems.push(format!("{element} has unknown binding '{uri}'"));
                            continue;
                        }
                    },
                };
                let index = match entry.index {
                    Some(index) => index,
                    None => match u16::try_from(position) {
                        Ok(index) => index,
                        Err(_) => {
                            problems.push(format!("{element} has too many endpoints"));
                            break;
                        }
                    },
                };
                endpoints.push(Endpoint {
                    binding,
                    location: entry.location.clone(),
                    index,
                    is_default: entry.is_default.unwrap_or(false),
                });
            }
            endpoints
        }
    };

    for endpoint in &endpoints {
        if endpoint.location.trim().is_empty() {
            problems.push(format!("{element} index {} has an empty Location", endpoint.index));
        }
    }

    let mut seen = BTreeSet::new();
    for endpoint in &endpoints {
        if !seen.insert(endpoint.index) {
            problems.push(format!("{element} index {} is used more than once", endpoint.index));
        }
    }

    match kind {
        EndpointKind::AssertionConsumer => {
            if list.is_none() || matches!(list, Some(EndpointList::Endpoints(e)) if e.is_empty()) {
                problems.push("no AssertionConsumerService endpoint".to_string());
            }
            for endpoint in &endpoints {
                if endpoint.binding != Binding::HttpPost {
                    problems.push(format!(
                        "AssertionConsumerService index {} must use the HTTP-POST binding",
                        endpoint.index
                    ));
                }
            }
            match endpoints.len() {
                0 => {}
                1 => endpoints[0].is_default = true,
                n => {
                    let defaults = endpoints.iter().filter(|e| e.is_default).count();
                    if defaults != 1 {
                        problems.push(format!(
                            "{n} AssertionConsumerService endpoints need exactly one isDefault, found {defaults}"
                        ));
                    }
                }
            }
        }
        EndpointKind::SingleLogout => {
            let defaults = endpoints.iter().filter(|e| e.is_default).count();
            if defaults > 1 {
                problems.push(format!(
                    "{defaults} SingleLogoutService endpoints are flagged isDefault, at most one may be"
                ));
            }
            let chosen = endpoints
                .iter()
                .position(|e| e.is_default)
                .unwrap_or(0);
            for (position, endpoint) in endpoints.iter_mut().enumerate() {
                endpoint.is_default = position == chosen;
            }
        }
    }

    endpoints
}

fn load_keys(entries: &[KeyEntry], problems: &mut Vec<String>) -> Vec<TrustKey> {
    let mut keys = Vec::with_capacity(entries.len());
    for (position, entry) in entries.iter().enumerate() {
        if entry.key_type != KEY_TYPE_X509 {
            problems.push(format!(
                "key {position} has unsupported type '{}'",
                entry.key_type
            ));
            continue;
        }
        match TrustKey::from_base64(&entry.x509_certificate, entry.signing, entry.encryption) {
            Ok(key) => keys.push(key),
            Err(e) => problems.push(format!("key {position}: {e}")),
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::SigningCredentials;

    fn cert_b64() -> String {
        SigningCredentials::self_signed("sp.example.com", 30)
            .unwrap()
            .certificate_base64_der()
            .unwrap()
    }

    fn single(entity: &str, body: &str) -> String {
        format!(r#"{{"{entity}": {body}}}"#)
    }

    #[test]
    fn test_bare_locations_get_binding_defaults() {
        let store = TrustStore::from_json(&single(
            "https://sp.example.com",
            r#"{"AssertionConsumerService": "https://sp.example.com/acs",
                "SingleLogoutService": "https://sp.example.com/slo"}"#,
        ))
        .unwrap();

        let acs = store
            .default_endpoint("https://sp.example.com", EndpointKind::AssertionConsumer)
            .unwrap();
        assert_eq!(acs.binding, Binding::HttpPost);
        assert!(acs.is_default);

        let slo = store
            .default_endpoint("https://sp.example.com", EndpointKind::SingleLogout)
            .unwrap();
        assert_eq!(slo.binding, Binding::HttpRedirect);

        let rp = store.lookup("https://sp.example.com").unwrap();
        assert_eq!(rp.name_id_format(), NAMEID_FORMAT_TRANSIENT);
    }

    #[test]
    fn test_lookup_is_exact() {
        let store = TrustStore::from_json(&single(
            "https://sp.example.com",
            r#"{"AssertionConsumerService": "https://sp.example.com/acs"}"#,
        ))
        .unwrap();
        assert!(store.lookup("https://sp.example.com").is_ok());
        assert!(matches!(
            store.lookup("https://SP.example.com"),
            Err(SamlError::UnknownRelyingParty(_))
        ));
        assert!(store.lookup("https://sp.example.com/").is_err());
    }

    #[test]
    fn test_ambiguous_default_is_rejected() {
        let err = TrustStore::from_json(&single(
            "sp",
            r#"{"AssertionConsumerService": [
                {"Location": "https://a/acs", "index": 0},
                {"Location": "https://b/acs", "index": 1}
            ]}"#,
        ))
        .unwrap_err();
        assert!(err.problems()[0].contains("exactly one isDefault"));
    }

    #[test]
    fn test_several_default_logout_endpoints_are_rejected() {
        let err = TrustStore::from_json(&single(
            "sp",
            r#"{"AssertionConsumerService": "https://sp/acs",
                "SingleLogoutService": [
                    {"Location": "https://a/slo", "isDefault": true},
                    {"Location": "https://b/slo", "isDefault": true}
                ]}"#,
        ))
        .unwrap_err();
        assert!(err.problems()[0].contains("2 SingleLogoutService endpoints are flagged isDefault"));
    }

    #[test]
    fn test_first_logout_endpoint_is_default_when_none_flagged() {
        let store = TrustStore::from_json(&single(
            "sp",
            r#"{"AssertionConsumerService": "https://sp/acs",
                "SingleLogoutService": [
                    {"Location": "https://a/slo"},
                    {"Location": "https://b/slo"}
                ]}"#,
        ))
        .unwrap();
        let slo = store.default_endpoint("sp", EndpointKind::SingleLogout).unwrap();
        assert_eq!(slo.location, "https://a/slo");
    }

    #[test]
    fn test_every_problem_is_collected() {
        let err = TrustStore::from_json(&format!(
            r#"{{
                "sp-a": {{"entityid": "sp-other"}},
                "sp-b": {{
                    "AssertionConsumerService": [
                        {{"Binding": "urn:bogus", "Location": "https://b/acs"}},
                        {{"Location": "", "index": 4, "isDefault": true}},
                        {{"Location": "https://b/acs2", "index": 4}}
                    ],
                    "keys": [{{"type": "X509Certificate", "X509Certificate": "!!", "signing": true}}],
                    "NameIDFormat": "urn:bogus"
                }},
                "sp-c": {{
                    "AssertionConsumerService": "https://c/acs",
                    "keys": [{{"type": "RSAKeyValue", "X509Certificate": "{cert}", "signing": true}}]
                }}
            }}"#,
            cert = cert_b64()
        ))
        .unwrap_err();

        let all = err.problems().join("\n");
        assert!(all.contains("'sp-a': entityid 'sp-other' does not match"));
        assert!(all.contains("'sp-a': no AssertionConsumerService"));
        assert!(all.contains("unknown binding 'urn:bogus'"));
        assert!(all.contains("empty Location"));
        assert!(all.contains("index 4 is used more than once"));
        assert!(all.contains("not valid base64"));
        assert!(all.contains("unsupported NameIDFormat"));
        assert!(all.contains("'sp-c': key 0 has unsupported type 'RSAKeyValue'"));
    }

    #[test]
    fn test_signed_requests_need_a_signing_key() {
        let err = TrustStore::from_json(&single(
            "sp",
            &format!(
                r#"{{"AssertionConsumerService": "https://sp/acs",
                    "validate.authnrequest": true,
                    "keys": [{{"encryption": true, "signing": false, "type": "X509Certificate",
                               "X509Certificate": "{}"}}]}}"#,
                cert_b64()
            ),
        ))
        .unwrap_err();
        assert!(err.problems()[0].contains("no key is flagged for signing"));
    }

    #[test]
    fn test_redirect_acs_is_rejected() {
        let err = TrustStore::from_json(&single(
            "sp",
            &format!(
                r#"{{"AssertionConsumerService": [{{"Binding": "{BINDING_HTTP_REDIRECT}", "Location": "https://sp/acs"}}]}}"#
            ),
        ))
        .unwrap_err();
        assert!(err.problems()[0].contains("must use the HTTP-POST binding"));
    }

    #[test]
    fn test_resolve_acs_by_index_url_and_default() {
        let store = TrustStore::from_json(&single(
            "sp",
            r#"{"AssertionConsumerService": [
                {"Location": "https://sp.example.com/acs", "index": 0, "isDefault": true},
                {"Location": "https://sp.example.com/alt/", "index": 7}
            ]}"#,
        ))
        .unwrap();
        let rp = store.lookup("sp").unwrap();

        assert_eq!(rp.resolve_acs(None, None).unwrap().index, 0);
        assert_eq!(rp.resolve_acs(Some(7), None).unwrap().index, 7);
        assert_eq!(
            rp.resolve_acs(None, Some("HTTPS://SP.example.com/alt")).unwrap().index,
            7
        );
        assert!(rp
            .resolve_acs(Some(7), Some("https://sp.example.com/alt"))
            .is_ok());
        assert!(matches!(
            rp.resolve_acs(Some(3), None),
            Err(SamlError::EndpointMismatch(_))
        ));
        assert!(matches!(
            rp.resolve_acs(None, Some("https://evil.example.com/acs")),
            Err(SamlError::EndpointMismatch(_))
        ));
        assert!(matches!(
            rp.resolve_acs(Some(0), Some("https://sp.example.com/alt")),
            Err(SamlError::EndpointMismatch(_))
        ));
    }

    #[test]
    fn test_normalize_url_keeps_path_case_and_query() {
        assert_eq!(
            normalize_url("HTTP://Host:4000/V1/acs/?type=x"),
            "http://host:4000/V1/acs?type=x"
        );
    }

    #[test]
    fn test_expired_certificate_is_not_usable() {
        let key = TrustKey::from_base64(&cert_b64(), false, true).unwrap();
        assert!(key.check_usable(Utc::now()).is_ok());
        let later = Utc::now() + chrono::Duration::days(400);
        assert!(key.check_usable(later).unwrap_err().contains("expired"));
        let earlier = Utc::now() - chrono::Duration::days(2);
        assert!(key.check_usable(earlier).unwrap_err().contains("not valid before"));
    }

    #[test]
    fn test_swap_does_not_disturb_snapshot() {
        let shared = SharedTrustStore::new(
            TrustStore::from_json(&single("sp", r#"{"AssertionConsumerService": "https://sp/acs"}"#))
                .unwrap(),
        );
        let before = shared.snapshot();
        shared.swap(TrustStore::default());

        assert!(before.lookup("sp").is_ok());
        assert!(shared.snapshot().lookup("sp").is_err());
    }
}
