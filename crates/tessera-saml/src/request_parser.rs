//! SAML `AuthnRequest` and `LogoutRequest` parsing

use crate::error::{SamlError, SamlResult};
use chrono::{DateTime, Duration, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Maximum allowed clock skew for `IssueInstant` validation (5 minutes)
pub const DEFAULT_MAX_CLOCK_SKEW_SECS: i64 = 300;

/// Maximum age for a request (5 minutes)
pub const DEFAULT_MAX_REQUEST_AGE_SECS: i64 = 300;

/// Maximum length for the request ID attribute
const MAX_REQUEST_ID_LENGTH: usize = 256;

/// Maximum length for the Issuer element value
const MAX_ISSUER_LENGTH: usize = 1024;

const MAX_NAME_ID_LENGTH: usize = 4096;
const MAX_SESSION_INDEX_LENGTH: usize = 256;

/// Parsed SAML `AuthnRequest`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAuthnRequest {
    pub id: String,
    pub issuer: String,
    pub destination: Option<String>,
    pub assertion_consumer_service_url: Option<String>,
    pub assertion_consumer_service_index: Option<u16>,
    pub protocol_binding: Option<String>,
    pub name_id_policy_format: Option<String>,
    pub is_passive: bool,
    pub force_authn: bool,
    pub issue_instant: DateTime<Utc>,
}

/// Parsed SAML `LogoutRequest`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLogoutRequest {
    pub id: String,
    pub issuer: String,
    pub name_id: String,
    pub name_id_format: Option<String>,
    pub session_index: Option<String>,
    pub issue_instant: DateTime<Utc>,
}

/// Parses request XML and applies freshness checks against a supplied instant.
#[derive(Debug, Clone, Copy)]
pub struct RequestParser {
    max_clock_skew: Duration,
    max_request_age: Duration,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(
            Duration::seconds(DEFAULT_MAX_CLOCK_SKEW_SECS),
            Duration::seconds(DEFAULT_MAX_REQUEST_AGE_SECS),
        )
    }
}

impl RequestParser {
    #[must_use]
    pub fn new(max_clock_skew: Duration, max_request_age: Duration) -> Self {
        Self {
            max_clock_skew,
            max_request_age,
        }
    }

    #[must_use]
    pub fn max_clock_skew(&self) -> Duration {
        self.max_clock_skew
    }

    #[must_use]
    pub fn max_request_age(&self) -> Duration {
        self.max_request_age
    }

    /// Parse `AuthnRequest` XML.
    ///
    /// # Errors
    ///
    /// Returns `SamlError::MalformedRequest` if the XML is not an
    /// `AuthnRequest`, lacks a required field, or is stale.
    pub fn parse_authn_request(
        &self,
        xml: &str,
        now: DateTime<Utc>,
    ) -> SamlResult<ParsedAuthnRequest> {
        let mut root_seen = false;
        let mut id = None;
        let mut destination = None;
        let mut acs_url = None;
        let mut acs_index = None;
        let mut protocol_binding = None;
        let mut name_id_format = None;
        let mut is_passive = false;
        let mut force_authn = false;
        let mut issue_instant_raw = None;

        let texts = walk(xml, |name, depth, e| {
            match name {
                "AuthnRequest" if depth == 0 => {
                    root_seen = true;
                    for (key, value) in attributes(e) {
                        match key.as_str() {
                            "ID" => id = Some(value),
                            "IssueInstant" => issue_instant_raw = Some(value),
                            "Destination" => destination = Some(value),
                            "AssertionConsumerServiceURL" => acs_url = Some(value),
                            "AssertionConsumerServiceIndex" => acs_index = Some(value),
                            "ProtocolBinding" => protocol_binding = Some(value),
                            "IsPassive" => is_passive = value == "true",
                            "ForceAuthn" => force_authn = value == "true",
                            _ => {}
                        }
                    }
                }
                "NameIDPolicy" => {
                    name_id_format = attributes(e)
                        .find(|(key, _)| key == "Format")
                        .map(|(_, value)| value);
                }
                _ => {}
            }
            Ok(())
        })?;

        if !root_seen {
            return Err(SamlError::MalformedRequest(
                "Root element is not an AuthnRequest".to_string(),
            ));
        }

        let id = check_id(id)?;
        let issuer = check_issuer(texts.issuer)?;
        let issue_instant = self.check_issue_instant(issue_instant_raw, now)?;

        let assertion_consumer_service_index = acs_index
            .map(|raw| {
                raw.parse::<u16>().map_err(|_| {
                    SamlError::MalformedRequest(format!(
                        "Invalid AssertionConsumerServiceIndex '{raw}'"
                    ))
                })
            })
            .transpose()?;

        Ok(ParsedAuthnRequest {
            id,
            issuer,
            destination,
            assertion_consumer_service_url: acs_url,
            assertion_consumer_service_index,
            protocol_binding,
            name_id_policy_format: name_id_format,
            is_passive,
            force_authn,
            issue_instant,
        })
    }

    /// Parse `LogoutRequest` XML.
    ///
    /// # Errors
    ///
    /// Returns `SamlError::MalformedRequest` if the XML is not a
    /// `LogoutRequest`, lacks a required field, or is stale.
    pub fn parse_logout_request(
        &self,
        xml: &str,
        now: DateTime<Utc>,
    ) -> SamlResult<ParsedLogoutRequest> {
        let mut root_seen = false;
        let mut id = None;
        let mut issue_instant_raw = None;
        let mut name_id_format = None;

        let texts = walk(xml, |name, depth, e| {
            match name {
                "LogoutRequest" if depth == 0 => {
                    root_seen = true;
                    for (key, value) in attributes(e) {
                        match key.as_str() {
                            "ID" => id = Some(value),
                            "IssueInstant" => issue_instant_raw = Some(value),
                            _ => {}
                        }
                    }
                }
                "NameID" => {
                    name_id_format = attributes(e)
                        .find(|(key, _)| key == "Format")
                        .map(|(_, value)| value);
                }
                _ => {}
            }
            Ok(())
        })?;

        if !root_seen {
            return Err(SamlError::MalformedRequest(
                "Root element is not a LogoutRequest".to_string(),
            ));
        }

        let id = check_id(id)?;
        let issuer = check_issuer(texts.issuer)?;
        let issue_instant = self.check_issue_instant(issue_instant_raw, now)?;

        let name_id = texts
            .name_id
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SamlError::MalformedRequest("Missing NameID".to_string()))?;
        if name_id.len() > MAX_NAME_ID_LENGTH {
            return Err(SamlError::MalformedRequest(format!(
                "NameID exceeds maximum length of {MAX_NAME_ID_LENGTH} characters"
            )));
        }
        if let Some(session_index) = &texts.session_index {
            if session_index.len() > MAX_SESSION_INDEX_LENGTH {
                return Err(SamlError::MalformedRequest(format!(
                    "SessionIndex exceeds maximum length of {MAX_SESSION_INDEX_LENGTH} characters"
                )));
            }
        }

        Ok(ParsedLogoutRequest {
            id,
            issuer,
            name_id,
            name_id_format,
            session_index: texts.session_index,
            issue_instant,
        })
    }

    fn check_issue_instant(
        &self,
        raw: Option<String>,
        now: DateTime<Utc>,
    ) -> SamlResult<DateTime<Utc>> {
        let raw = raw.ok_or_else(|| {
            SamlError::MalformedRequest("Missing IssueInstant attribute".to_string())
        })?;

        let issue_instant = DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SamlError::MalformedRequest(format!("Invalid IssueInstant format: {e}")))?;

        let age = now - issue_instant;

        // Reject if IssueInstant is too far in the future (clock skew tolerance)
        if age < -self.max_clock_skew {
            return Err(SamlError::MalformedRequest(format!(
                "IssueInstant is in the future (skew: {}s exceeds {}s tolerance)",
                -age.num_seconds(),
                self.max_clock_skew.num_seconds()
            )));
        }

        if age > self.max_request_age {
            return Err(SamlError::MalformedRequest(format!(
                "IssueInstant is too old (age: {}s exceeds {}s maximum)",
                age.num_seconds(),
                self.max_request_age.num_seconds()
            )));
        }

        Ok(issue_instant)
    }
}

/// Text content of the elements both request kinds care about.
#[derive(Default)]
struct Texts {
    issuer: Option<String>,
    name_id: Option<String>,
    session_index: Option<String>,
}

/// Walk the document, handing each start tag to `on_start` and capturing the
/// first `Issuer`, `NameID` and `SessionIndex` texts.
/// Walk the document, calling `on_start` with each element's local name and
/// nesting depth (0 for the root).
fn walk<F>(xml: &str, mut on_start: F) -> SamlResult<Texts>
where
    F: FnMut(&str, usize, &BytesStart<'_>) -> SamlResult<()>,
{
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut texts = Texts::default();
    let mut current = String::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local_name = e.local_name();
                let name = std::str::from_utf8(local_name.as_ref()).unwrap_or("");
                current = name.to_string();
                on_start(name, depth, &e)?;
                depth += 1;
            }
            Ok(Event::Empty(e)) => {
                let local_name = e.local_name();
                let name = std::str::from_utf8(local_name.as_ref()).unwrap_or("");
                current.clear();
                on_start(name, depth, &e)?;
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| SamlError::MalformedRequest(format!("XML parse error: {e}")))?
                    .to_string();
                let slot = match current.as_str() {
                    "Issuer" => &mut texts.issuer,
                    "NameID" => &mut texts.name_id,
                    "SessionIndex" => &mut texts.session_index,
                    _ => continue,
                };
                if slot.is_none() {
                    *slot = Some(text);
                }
            }
            Ok(Event::End(_)) => {
                current.clear();
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SamlError::MalformedRequest(format!("XML parse error: {e}")));
            }
            _ => {}
        }
    }

    Ok(texts)
}

fn attributes<'a>(e: &'a BytesStart<'_>) -> impl Iterator<Item = (String, String)> + 'a {
    e.attributes().flatten().map(|attr| {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value().unwrap_or_default().to_string();
        (key, value)
    })
}

fn check_id(id: Option<String>) -> SamlResult<String> {
    let id = id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SamlError::MalformedRequest("Missing ID attribute".to_string()))?;

    if id.len() > MAX_REQUEST_ID_LENGTH {
        return Err(SamlError::MalformedRequest(format!(
            "ID attribute exceeds maximum length of {MAX_REQUEST_ID_LENGTH} characters"
        )));
    }
    Ok(id)
}

fn check_issuer(issuer: Option<String>) -> SamlResult<String> {
    let issuer = issuer
        .filter(|issuer| !issuer.is_empty())
        .ok_or_else(|| SamlError::MalformedRequest("Missing Issuer element".to_string()))?;

    if issuer.len() > MAX_ISSUER_LENGTH {
        return Err(SamlError::MalformedRequest(format!(
            "Issuer exceeds maximum length of {MAX_ISSUER_LENGTH} characters"
        )));
    }
    Ok(issuer)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a sample `AuthnRequest` XML with the given `IssueInstant` value.
    fn sample_authn_request(issue_instant: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
    ID="_abc123"
    Version="2.0"
    IssueInstant="{issue_instant}"
    AssertionConsumerServiceURL="https://sp.example.com/saml/acs"
    AssertionConsumerServiceIndex="2"
    ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"
    ForceAuthn="true">
    <saml:Issuer>https://sp.example.com/saml/metadata</saml:Issuer>
    <samlp:NameIDPolicy Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress"/>
</samlp:AuthnRequest>"#
        )
    }

    #[test]
    fn test_parse_authn_request() {
        let now = Utc::now();
        let parsed = RequestParser::default()
            .parse_authn_request(&sample_authn_request(&now.to_rfc3339()), now)
            .unwrap();
        assert_eq!(parsed.id, "_abc123");
        assert_eq!(parsed.issuer, "https://sp.example.com/saml/metadata");
        assert_eq!(
            parsed.assertion_consumer_service_url.as_deref(),
            Some("https://sp.example.com/saml/acs")
        );
        assert_eq!(parsed.assertion_consumer_service_index, Some(2));
        assert_eq!(
            parsed.name_id_policy_format.as_deref(),
            Some("urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress")
        );
        assert!(parsed.force_authn);
        assert!(!parsed.is_passive);
    }

    #[test]
    fn test_issue_instant_missing() {
        let xml = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_abc123" Version="2.0">
    <saml:Issuer>https://sp.example.com</saml:Issuer>
</samlp:AuthnRequest>"#;
        let err = RequestParser::default()
            .parse_authn_request(xml, Utc::now())
            .unwrap_err();
        assert!(err.to_string().contains("Missing IssueInstant"));
    }

    #[test]
    fn test_issue_instant_too_old() {
        let now = Utc::now();
        let old = now - Duration::seconds(600);
        let err = RequestParser::default()
            .parse_authn_request(&sample_authn_request(&old.to_rfc3339()), now)
            .unwrap_err();
        assert!(err.to_string().contains("too old"));
    }

    #[test]
    fn test_issue_instant_future() {
        let now = Utc::now();
        let future = now + Duration::seconds(600);
        let err = RequestParser::default()
            .parse_authn_request(&sample_authn_request(&future.to_rfc3339()), now)
            .unwrap_err();
        assert!(err.to_string().contains("future"));
    }

    #[test]
    fn test_issue_instant_within_skew() {
        let now = Utc::now();
        let slight_future = now + Duration::seconds(120);
        assert!(RequestParser::default()
            .parse_authn_request(&sample_authn_request(&slight_future.to_rfc3339()), now)
            .is_ok());
    }

    #[test]
    fn test_logout_request_is_not_an_authn_request() {
        let now = Utc::now();
        let xml = format!(
            r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_x" IssueInstant="{}"/>"#,
            now.to_rfc3339()
        );
        let err = RequestParser::default()
            .parse_authn_request(&xml, now)
            .unwrap_err();
        assert!(matches!(err, SamlError::MalformedRequest(_)));
    }

    #[test]
    fn test_nested_authn_request_is_not_the_root() {
        let now = Utc::now();
        let inner = sample_authn_request(&now.to_rfc3339())
            .replace(r#"<?xml version="1.0" encoding="UTF-8"?>"#, "");
        let xml = format!(r#"<wrapper xmlns="urn:example">{inner}</wrapper>"#);
        let err = RequestParser::default()
            .parse_authn_request(&xml, now)
            .unwrap_err();
        assert!(err.to_string().contains("Root element is not an AuthnRequest"));
    }

    #[test]
    fn test_nested_logout_request_is_not_the_root() {
        let now = Utc::now();
        let xml = format!(
            r#"<wrapper><samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_lr" IssueInstant="{}">
    <saml:Issuer>https://sp.example.com</saml:Issuer>
    <saml:NameID>user@example.com</saml:NameID>
</samlp:LogoutRequest></wrapper>"#,
            now.to_rfc3339()
        );
        let err = RequestParser::default()
            .parse_logout_request(&xml, now)
            .unwrap_err();
        assert!(matches!(err, SamlError::MalformedRequest(_)));
    }

    #[test]
    fn test_bad_acs_index() {
        let now = Utc::now();
        let xml = sample_authn_request(&now.to_rfc3339())
            .replace("AssertionConsumerServiceIndex=\"2\"", "AssertionConsumerServiceIndex=\"x\"");
        let err = RequestParser::default()
            .parse_authn_request(&xml, now)
            .unwrap_err();
        assert!(err.to_string().contains("AssertionConsumerServiceIndex"));
    }

    #[test]
    fn test_parse_logout_request() {
        let now = Utc::now();
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
    ID="_lr_test123" Version="2.0" IssueInstant="{}"
    Destination="https://idp.example.com/saml/slo">
    <saml:Issuer>https://sp.example.com</saml:Issuer>
    <saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">user@example.com</saml:NameID>
    <samlp:SessionIndex>_session_abc123</samlp:SessionIndex>
</samlp:LogoutRequest>"#,
            now.to_rfc3339()
        );

        let parsed = RequestParser::default()
            .parse_logout_request(&xml, now)
            .unwrap();
        assert_eq!(parsed.id, "_lr_test123");
        assert_eq!(parsed.issuer, "https://sp.example.com");
        assert_eq!(parsed.name_id, "user@example.com");
        assert_eq!(
            parsed.name_id_format.as_deref(),
            Some("urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress")
        );
        assert_eq!(parsed.session_index.as_deref(), Some("_session_abc123"));
    }

    #[test]
    fn test_logout_request_without_name_id() {
        let now = Utc::now();
        let xml = format!(
            r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_lr" IssueInstant="{}">
    <saml:Issuer>https://sp.example.com</saml:Issuer>
</samlp:LogoutRequest>"#,
            now.to_rfc3339()
        );
        let err = RequestParser::default()
            .parse_logout_request(&xml, now)
            .unwrap_err();
        assert!(err.to_string().contains("Missing NameID"));
    }
}
