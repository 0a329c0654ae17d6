//! SAML `LogoutResponse` builder

use crate::assertion_builder::{status_xml, SAML_TIME_FORMAT};
use crate::signing::SigningCredentials;
use crate::xmldsig::{sign_enveloped, xml_escape, SignatureError};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A `LogoutResponse` ready for dispatch.
#[derive(Debug, Clone)]
pub struct LogoutResponse {
    pub id: String,
    pub in_response_to: String,
    pub destination: String,
    pub status: String,
    /// Signed when credentials were available.
    pub xml: String,
}

/// Build a `LogoutResponse` and sign it when `credentials` are given.
///
/// # Errors
///
/// Returns a `SignatureError` if signing fails.
pub fn build_logout_response(
    idp_entity_id: &str,
    in_response_to: &str,
    destination: &str,
    status: &str,
    credentials: Option<&SigningCredentials>,
    now: DateTime<Utc>,
) -> Result<LogoutResponse, SignatureError> {
    let response_id = format!("_lresp_{}", Uuid::new_v4());

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<samlp:LogoutResponse xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\"\n");
    xml.push_str("    xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\"\n");
    xml.push_str("    ID=\"");
    xml.push_str(&xml_escape(&response_id));
    xml.push_str("\"\n    Version=\"2.0\"\n    IssueInstant=\"");
    xml.push_str(&now.format(SAML_TIME_FORMAT).to_string());
    xml.push_str("\"\n    Destination=\"");
    xml.push_str(&xml_escape(destination));
    xml.push_str("\"\n    InResponseTo=\"");
    xml.push_str(&xml_escape(in_response_to));
    xml.push_str("\">\n    <saml:Issuer>");
    xml.push_str(&xml_escape(idp_entity_id));
    xml.push_str("</saml:Issuer>\n    ");
    xml.push_str(&status_xml(status, None));
    xml.push_str("\n</samlp:LogoutResponse>");

    let xml = match credentials {
        Some(credentials) => sign_enveloped(&xml, &response_id, credentials)?,
        None => xml,
    };

    Ok(LogoutResponse {
        id: response_id,
        in_response_to: in_response_to.to_string(),
        destination: destination.to_string(),
        status: status.to_string(),
        xml,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::status;
    use crate::xmldsig::verify_enveloped;

    #[test]
    fn test_signed_logout_response_verifies() {
        let creds = SigningCredentials::self_signed("idp", 1).unwrap();
        let response = build_logout_response(
            "https://idp.example.com",
            "_lr1",
            "https://sp.example.com/slo",
            status::SUCCESS,
            Some(&creds),
            Utc::now(),
        )
        .unwrap();

        assert!(response.xml.contains("InResponseTo=\"_lr1\""));
        assert!(response.xml.contains("Destination=\"https://sp.example.com/slo\""));
        assert_eq!(
            verify_enveloped(&response.xml, creds.certificate()).unwrap(),
            response.id
        );
    }

    #[test]
    fn test_unsigned_without_credentials() {
        let response = build_logout_response(
            "idp",
            "_lr1",
            "https://sp.example.com/slo",
            status::RESPONDER,
            None,
            Utc::now(),
        )
        .unwrap();
        assert!(!response.xml.contains("ds:Signature"));
        assert!(response.xml.contains(status::RESPONDER));
    }
}
