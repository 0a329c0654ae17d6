//! Enveloped XML signatures (RSA-SHA256 over exclusive C14N) and detached
//! signatures for the HTTP-Redirect binding.
//!
//! Signatures are inserted directly after the signed element's
//! `<saml:Issuer>` with no surrounding whitespace, so removing the
//! `ds:Signature` element restores the exact bytes that were digested.

use crate::signing::SigningCredentials;
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::hash::MessageDigest;
use openssl::sign::Verifier;
use openssl::x509::X509;
use thiserror::Error;
use xml_canonicalization::Canonicalizer;

pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const ALG_EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const ALG_ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const ALG_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const ALG_RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const ALG_RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";
pub const ALG_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const ALG_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
pub const ALG_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

const ISSUER_CLOSE: &str = "</saml:Issuer>";

/// Signature creation and verification errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("No signature present")]
    Missing,

    #[error("Malformed signed XML: {0}")]
    Malformed(String),

    #[error("XML canonicalization failed: {0}")]
    Canonicalization(String),

    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Digest mismatch for reference '{0}'")]
    DigestMismatch(String),

    #[error("Signature value does not verify")]
    InvalidSignature,

    #[error("Key error: {0}")]
    Key(String),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

/// Apply exclusive XML canonicalization (without comments).
///
/// # Errors
///
/// Returns `SignatureError::Canonicalization` if the XML cannot be parsed.
pub fn canonicalize(xml: &str) -> Result<String, SignatureError> {
    let mut output = Vec::new();
    Canonicalizer::read_from_str(xml)
        .write_to_writer(&mut output)
        .canonicalize(false)
        .map_err(|e| SignatureError::Canonicalization(e.to_string()))?;

    String::from_utf8(output).map_err(|e| {
        SignatureError::Canonicalization(format!("Canonicalized XML is not valid UTF-8: {e}"))
    })
}

/// XML escape special characters
#[must_use]
pub fn xml_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            _ => result.push(c),
        }
    }
    result
}

/// Parse an X.509 certificate given as PEM or as bare base64 DER.
///
/// # Errors
///
/// Returns `SignatureError::Key` if the text is not a certificate.
pub fn parse_certificate(text: &str) -> Result<X509, SignatureError> {
    if text.contains("-----BEGIN CERTIFICATE-----") {
        return X509::from_pem(text.as_bytes())
            .map_err(|e| SignatureError::Key(format!("Invalid certificate: {e}")));
    }
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD
        .decode(compact)
        .map_err(|e| SignatureError::Key(format!("Invalid certificate encoding: {e}")))?;
    X509::from_der(&der).map_err(|e| SignatureError::Key(format!("Invalid certificate: {e}")))
}

/// Map a `SignatureMethod`/`SigAlg` URI to its digest.
///
/// # Errors
///
/// Returns `SignatureError::UnsupportedAlgorithm` for anything but RSA-SHA*.
pub fn digest_for_signature_alg(uri: &str) -> Result<MessageDigest, SignatureError> {
    match uri {
        ALG_RSA_SHA256 => Ok(MessageDigest::sha256()),
        ALG_RSA_SHA1 => Ok(MessageDigest::sha1()),
        ALG_RSA_SHA384 => Ok(MessageDigest::sha384()),
        ALG_RSA_SHA512 => Ok(MessageDigest::sha512()),
        other => Err(SignatureError::UnsupportedAlgorithm(other.to_string())),
    }
}

fn digest_for_digest_alg(uri: &str) -> Result<MessageDigest, SignatureError> {
    match uri {
        ALG_SHA256 => Ok(MessageDigest::sha256()),
        ALG_SHA1 => Ok(MessageDigest::sha1()),
        ALG_SHA384 => Ok(MessageDigest::sha384()),
        ALG_SHA512 => Ok(MessageDigest::sha512()),
        other => Err(SignatureError::UnsupportedAlgorithm(other.to_string())),
    }
}

/// Sign the element carrying `ID="<element_id>"` with an enveloped signature.
///
/// # Errors
///
/// Returns `SignatureError::Malformed` if the element or its
/// `saml:Issuer` cannot be found, or a crypto/canonicalization error.
pub fn sign_enveloped(
    xml: &str,
    element_id: &str,
    credentials: &SigningCredentials,
) -> Result<String, SignatureError> {
    let (start, end) = element_span(xml, element_id)?;
    let element = &xml[start..end];

    let insert_at = element
        .find(ISSUER_CLOSE)
        .map(|pos| start + pos + ISSUER_CLOSE.len())
        .ok_or_else(|| SignatureError::Malformed("Cannot find Issuer".to_string()))?;

    let digest = openssl::hash::hash(MessageDigest::sha256(), canonicalize(element)?.as_bytes())
        .map_err(|e| SignatureError::Crypto(format!("Digest failed: {e}")))?;
    let digest_b64 = STANDARD.encode(digest);

    let signed_info = signed_info_xml(element_id, &digest_b64);
    let signature = credentials.sign_sha256(canonicalize(&signed_info)?.as_bytes())?;
    let certificate_base64 = credentials.certificate_base64_der()?;

    let mut signature_xml = String::new();
    signature_xml.push_str("<ds:Signature xmlns:ds=\"");
    signature_xml.push_str(XMLDSIG_NS);
    signature_xml.push_str("\">");
    signature_xml.push_str(&signed_info);
    signature_xml.push_str("<ds:SignatureValue>");
    signature_xml.push_str(&STANDARD.encode(signature));
    signature_xml.push_str("</ds:SignatureValue><ds:KeyInfo><ds:X509Data><ds:X509Certificate>");
    signature_xml.push_str(&certificate_base64);
    signature_xml.push_str("</ds:X509Certificate></ds:X509Data></ds:KeyInfo></ds:Signature>");

    let mut result = String::with_capacity(xml.len() + signature_xml.len());
    result.push_str(&xml[..insert_at]);
    result.push_str(&signature_xml);
    result.push_str(&xml[insert_at..]);
    Ok(result)
}

fn signed_info_xml(element_id: &str, digest_b64: &str) -> String {
    let mut signed_info = String::new();
    signed_info.push_str("<ds:SignedInfo xmlns:ds=\"");
    signed_info.push_str(XMLDSIG_NS);
    signed_info.push_str("\">");
    signed_info.push_str("<ds:CanonicalizationMethod Algorithm=\"");
    signed_info.push_str(ALG_EXC_C14N);
    signed_info.push_str("\"/><ds:SignatureMethod Algorithm=\"");
    signed_info.push_str(ALG_RSA_SHA256);
    signed_info.push_str("\"/><ds:Reference URI=\"#");
    signed_info.push_str(&xml_escape(element_id));
    signed_info.push_str("\"><ds:Transforms><ds:Transform Algorithm=\"");
    signed_info.push_str(ALG_ENVELOPED_SIGNATURE);
    signed_info.push_str("\"/><ds:Transform Algorithm=\"");
    signed_info.push_str(ALG_EXC_C14N);
    signed_info.push_str("\"/></ds:Transforms><ds:DigestMethod Algorithm=\"");
    signed_info.push_str(ALG_SHA256);
    signed_info.push_str("\"/><ds:DigestValue>");
    signed_info.push_str(digest_b64);
    signed_info.push_str("</ds:DigestValue></ds:Reference></ds:SignedInfo>");
    signed_info
}

/// Verify the first enveloped signature in `xml` against `certificate`.
///
/// The signature must sit inside the element its reference points to.
/// Returns the referenced element ID on success.
///
/// # Errors
///
/// - `SignatureError::Missing` if there is no `Signature` element
/// - `SignatureError::DigestMismatch` if the signed content was altered
/// - `SignatureError::InvalidSignature` if the signature value does not verify
pub fn verify_enveloped(xml: &str, certificate: &X509) -> Result<String, SignatureError> {
    let block = SignatureBlock::locate(xml)?;
    let info = block.parse(xml)?;

    let reference_id = info.reference_uri.trim_start_matches('#').to_string();
    let (start, end) = if reference_id.is_empty() {
        document_span(xml)?
    } else {
        element_span(xml, &reference_id)?
    };

    if !(start < block.start && block.end <= end) {
        return Err(SignatureError::Malformed(
            "Signature is not enveloped by the referenced element".to_string(),
        ));
    }

    // Enveloped-signature transform
    let mut content = String::with_capacity(end - start);
    content.push_str(&xml[start..block.start]);
    content.push_str(&xml[block.end..end]);

    let digest_md = digest_for_digest_alg(&info.digest_method)?;
    let computed = openssl::hash::hash(digest_md, canonicalize(&content)?.as_bytes())
        .map_err(|e| SignatureError::Crypto(format!("Digest failed: {e}")))?;
    let expected = decode_b64(&info.digest_value)?;
    if computed.len() != expected.len() || !openssl::memcmp::eq(&computed, &expected) {
        return Err(SignatureError::DigestMismatch(reference_id));
    }

    let signed_info = canonicalize(&block.signed_info(xml)?)?;
    verify_detached(
        signed_info.as_bytes(),
        &info.signature_method,
        &decode_b64(&info.signature_value)?,
        certificate,
    )?;

    Ok(reference_id)
}

/// Returns true if `xml` carries an XML signature element.
#[must_use]
pub fn has_enveloped_signature(xml: &str) -> bool {
    SignatureBlock::locate(xml).is_ok()
}

/// Verify a detached signature (HTTP-Redirect binding).
///
/// # Errors
///
/// Returns `SignatureError::UnsupportedAlgorithm` for an unknown `sig_alg`
/// and `SignatureError::InvalidSignature` if the signature does not verify.
pub fn verify_detached(
    data: &[u8],
    sig_alg: &str,
    signature: &[u8],
    certificate: &X509,
) -> Result<(), SignatureError> {
    let digest = digest_for_signature_alg(sig_alg)?;
    let public_key = certificate
        .public_key()
        .map_err(|e| SignatureError::Key(format!("Invalid certificate: {e}")))?;

    let mut verifier = Verifier::new(digest, &public_key)
        .map_err(|e| SignatureError::Crypto(format!("Verifier creation failed: {e}")))?;
    verifier
        .update(data)
        .map_err(|e| SignatureError::Crypto(format!("Verifier update failed: {e}")))?;

    // OpenSSL reports a malformed signature as an error; treat it as a mismatch
    match verifier.verify(signature) {
        Ok(true) => Ok(()),
        Ok(false) | Err(_) => Err(SignatureError::InvalidSignature),
    }
}

fn decode_b64(value: &str) -> Result<Vec<u8>, SignatureError> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| SignatureError::Malformed(format!("Invalid base64: {e}")))
}

/// Byte span of the `ds:Signature` element and the prefix it uses.
struct SignatureBlock {
    start: usize,
    end: usize,
    prefix: &'static str,
}

#[derive(Debug, Default)]
struct SignatureInfo {
    reference_uri: String,
    digest_method: String,
    digest_value: String,
    signature_method: String,
    signature_value: String,
}

impl SignatureBlock {
    fn locate(xml: &str) -> Result<Self, SignatureError> {
        for prefix in ["ds:", ""] {
            let open = format!("<{prefix}Signature");
            if let Some(start) = find_open_tag(xml, 0, &open) {
                let close = format!("</{prefix}Signature>");
                let end = xml[start..]
                    .find(&close)
                    .map(|pos| start + pos + close.len())
                    .ok_or_else(|| {
                        SignatureError::Malformed("Unterminated Signature element".to_string())
                    })?;
                return Ok(Self { start, end, prefix });
            }
        }
        Err(SignatureError::Missing)
    }

    /// The `SignedInfo` element as it appears, with the XML-DSig namespace
    /// declared on it so it can be canonicalized on its own.
    fn signed_info(&self, xml: &str) -> Result<String, SignatureError> {
        let block = &xml[self.start..self.end];
        let open = format!("<{}SignedInfo", self.prefix);
        let close = format!("</{}SignedInfo>", self.prefix);
        let start = find_open_tag(block, 0, &open)
            .ok_or_else(|| SignatureError::Malformed("No SignedInfo element".to_string()))?;
        let end = block[start..]
            .find(&close)
            .map(|pos| start + pos + close.len())
            .ok_or_else(|| SignatureError::Malformed("Unterminated SignedInfo".to_string()))?;
        let signed_info = &block[start..end];

        let tag_end = signed_info.find('>').unwrap_or(signed_info.len());
        let ns_attr = match self.prefix {
            "" => "xmlns=",
            _ => "xmlns:ds=",
        };
        if signed_info[..tag_end].contains(ns_attr) {
            return Ok(signed_info.to_string());
        }

        let mut result = String::with_capacity(signed_info.len() + 64);
        result.push_str(&open);
        result.push(' ');
        result.push_str(ns_attr);
        result.push('"');
        result.push_str(XMLDSIG_NS);
        result.push('"');
        result.push_str(&signed_info[open.len()..]);
        Ok(result)
    }

    fn parse(&self, xml: &str) -> Result<SignatureInfo, SignatureError> {
        use quick_xml::events::Event;
        use quick_xml::Reader;

        #[derive(PartialEq)]
        enum Capture {
            None,
            DigestValue,
            SignatureValue,
        }

        let mut reader = Reader::from_str(&xml[self.start..self.end]);
        reader.config_mut().trim_text(false);

        let mut info = SignatureInfo::default();
        let mut capture = Capture::None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e) | Event::Empty(e)) => {
                    let local_name = e.local_name();
                    let name = std::str::from_utf8(local_name.as_ref()).unwrap_or("");
                    let attr = |wanted: &str| {
                        e.attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == wanted.as_bytes())
                            .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
                    };
                    match name {
                        "Reference" if info.reference_uri.is_empty() => {
                            info.reference_uri = attr("URI").unwrap_or_default();
                        }
                        "DigestMethod" => info.digest_method = attr("Algorithm").unwrap_or_default(),
                        "SignatureMethod" => {
                            info.signature_method = attr("Algorithm").unwrap_or_default();
                        }
                        "DigestValue" => capture = Capture::DigestValue,
                        "SignatureValue" => capture = Capture::SignatureValue,
                        _ => {}
                    }
                }
                Ok(Event::Text(e)) => {
                    let text = e
                        .unescape()
                        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
                    match capture {
                        Capture::DigestValue => info.digest_value.push_str(&text),
                        Capture::SignatureValue => info.signature_value.push_str(&text),
                        Capture::None => {}
                    }
                }
                Ok(Event::End(_)) => capture = Capture::None,
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(SignatureError::Malformed(format!("XML parse error: {e}")));
                }
                _ => {}
            }
        }

        if info.signature_value.trim().is_empty() {
            return Err(SignatureError::Malformed(
                "No SignatureValue element found".to_string(),
            ));
        }
        if info.digest_value.trim().is_empty() {
            return Err(SignatureError::Malformed(
                "No DigestValue element found".to_string(),
            ));
        }

        Ok(info)
    }
}

/// Find `<tag` followed by whitespace, `>` or `/`, starting at `from`.
fn find_open_tag(xml: &str, from: usize, open: &str) -> Option<usize> {
    let mut pos = from;
    while let Some(found) = xml[pos..].find(open) {
        let at = pos + found;
        match xml[at + open.len()..].chars().next() {
            Some(c) if c.is_whitespace() || c == '>' || c == '/' => return Some(at),
            _ => pos = at + open.len(),
        }
    }
    None
}

/// Extract tag name from XML opening tag
fn extract_tag_name(tag_start: &str) -> &str {
    tag_start
        .trim_start_matches('<')
        .split(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .next()
        .unwrap_or("")
}

/// Byte span `[start, end)` of the element carrying `ID="<id>"`.
pub(crate) fn element_span(xml: &str, id: &str) -> Result<(usize, usize), SignatureError> {
    let pattern = format!("ID=\"{}\"", xml_escape(id));
    let not_found = || SignatureError::Malformed(format!("Referenced element not found: {id}"));

    let id_pos = xml.find(&pattern).ok_or_else(not_found)?;
    let start = xml[..id_pos].rfind('<').ok_or_else(not_found)?;
    let tag = extract_tag_name(&xml[start..]);
    if tag.is_empty() {
        return Err(not_found());
    }

    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut depth = 0usize;
    let mut pos = start;

    loop {
        let next_close = xml[pos..]
            .find(&close)
            .map(|i| pos + i)
            .ok_or_else(|| SignatureError::Malformed(format!("Cannot find end of {tag}")))?;

        match find_open_tag(xml, pos, &open) {
            Some(next_open) if next_open < next_close => {
                let gt = xml[next_open..]
                    .find('>')
                    .map(|i| next_open + i)
                    .ok_or_else(|| SignatureError::Malformed(format!("Unterminated {tag}")))?;
                let self_closing = xml[..gt].ends_with('/');
                if self_closing && next_open == start {
                    return Ok((start, gt + 1));
                }
                if !self_closing {
                    depth += 1;
                }
                pos = gt + 1;
            }
            _ => {
                depth = depth.saturating_sub(1);
                pos = next_close + close.len();
                if depth == 0 {
                    return Ok((start, pos));
                }
            }
        }
    }
}

/// Span of the root element, skipping any XML declaration.
fn document_span(xml: &str) -> Result<(usize, usize), SignatureError> {
    let mut start = 0;
    if xml.trim_start().starts_with("<?") {
        start = xml
            .find("?>")
            .map(|p| p + 2)
            .ok_or_else(|| SignatureError::Malformed("Unterminated XML declaration".to_string()))?;
    }
    let start = xml[start..]
        .find('<')
        .map(|p| start + p)
        .ok_or_else(|| SignatureError::Malformed("No root element".to_string()))?;
    let end = xml.trim_end().len();
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, value: &str) -> String {
        format!(
            "<saml:Assertion xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ID=\"{id}\" Version=\"2.0\">\
<saml:Issuer>https://idp.example.com</saml:Issuer>\
<saml:Subject><saml:NameID>{value}</saml:NameID></saml:Subject>\
</saml:Assertion>"
        )
    }

    fn creds() -> SigningCredentials {
        SigningCredentials::self_signed("idp.example.com", 1).unwrap()
    }

    #[test]
    fn test_xml_escape_basic() {
        assert_eq!(xml_escape("<>"), "&lt;&gt;");
        assert_eq!(xml_escape("a&b"), "a&amp;b");
        assert_eq!(xml_escape("\"'"), "&quot;&apos;");
    }

    #[test]
    fn test_canonicalize_xml_preserves_namespaces() {
        let input = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="test">
            <saml:Issuer>https://idp.example.com</saml:Issuer>
        </saml:Assertion>"#;
        let result = canonicalize(input).expect("canonicalization should succeed");
        assert!(result.contains("xmlns:saml"));
        assert!(result.contains("urn:oasis:names:tc:SAML:2.0:assertion"));
    }

    #[test]
    fn test_sign_then_verify() {
        let creds = creds();
        let signed = sign_enveloped(&sample("_a1", "user"), "_a1", &creds).unwrap();
        assert!(signed.contains("</saml:Issuer><ds:Signature"));
        assert_eq!(verify_enveloped(&signed, creds.certificate()).unwrap(), "_a1");
    }

    #[test]
    fn test_removing_signature_restores_original() {
        let original = sample("_a1", "user");
        let signed = sign_enveloped(&original, "_a1", &creds()).unwrap();
        let block = SignatureBlock::locate(&signed).unwrap();
        let restored = format!("{}{}", &signed[..block.start], &signed[block.end..]);
        assert_eq!(restored, original);
    }

    #[test]
    fn test_mutation_after_signing_is_detected() {
        let creds = creds();
        let signed = sign_enveloped(&sample("_a1", "user"), "_a1", &creds).unwrap();
        let tampered = signed.replace(">user<", ">admin<");
        assert_eq!(
            verify_enveloped(&tampered, creds.certificate()),
            Err(SignatureError::DigestMismatch("_a1".into()))
        );
    }

    #[test]
    fn test_wrong_certificate_is_rejected() {
        let signed = sign_enveloped(&sample("_a1", "user"), "_a1", &creds()).unwrap();
        let other = creds();
        assert_eq!(
            verify_enveloped(&signed, other.certificate()),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_unsigned_document_is_missing() {
        assert_eq!(
            verify_enveloped(&sample("_a1", "user"), creds().certificate()),
            Err(SignatureError::Missing)
        );
        assert!(!has_enveloped_signature(&sample("_a1", "user")));
    }

    #[test]
    fn test_signature_outside_reference_is_rejected() {
        let creds = creds();
        let signed = sign_enveloped(&sample("_a1", "user"), "_a1", &creds).unwrap();
        // Wrap the signed assertion and point a second copy's ID elsewhere
        let wrapped = format!(
            "<samlp:Response xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" ID=\"_r\">{}{}</samlp:Response>",
            sample("_a1x", "admin").replace("_a1x", "_a1"),
            signed.replace("ID=\"_a1\"", "ID=\"_moved\"")
        );
        assert!(verify_enveloped(&wrapped, creds.certificate()).is_err());
    }

    #[test]
    fn test_element_span_handles_nested_same_name() {
        let xml = "<a ID=\"x\"><a>inner</a><b/></a><a>after</a>";
        let (start, end) = element_span(xml, "x").unwrap();
        assert_eq!(&xml[start..end], "<a ID=\"x\"><a>inner</a><b/></a>");
    }

    #[test]
    fn test_detached_signature_round_trip() {
        let creds = creds();
        let data = b"SAMLRequest=abc&SigAlg=xyz";
        let signature = creds.sign_sha256(data).unwrap();
        assert!(verify_detached(data, ALG_RSA_SHA256, &signature, creds.certificate()).is_ok());
        assert_eq!(
            verify_detached(b"SAMLRequest=abd&SigAlg=xyz", ALG_RSA_SHA256, &signature, creds.certificate()),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_unsupported_algorithm() {
        assert!(matches!(
            digest_for_signature_alg("http://www.w3.org/2000/09/xmldsig#dsa-sha1"),
            Err(SignatureError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_parse_certificate_with_and_without_headers() {
        let creds = creds();
        let pem = String::from_utf8(creds.certificate().to_pem().unwrap()).unwrap();
        assert!(parse_certificate(&pem).is_ok());
        let bare = creds.certificate_base64_der().unwrap();
        assert!(parse_certificate(&bare).is_ok());
        assert!(parse_certificate("not a cert").is_err());
    }

    #[test]
    fn test_signed_info_gets_namespace_when_inherited() {
        let xml = "<r ID=\"_r\"><saml:Issuer>x</saml:Issuer><ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">\
<ds:SignedInfo><ds:SignatureMethod Algorithm=\"a\"/></ds:SignedInfo></ds:Signature></r>";
        let block = SignatureBlock::locate(xml).unwrap();
        let signed_info = block.signed_info(xml).unwrap();
        assert!(signed_info.starts_with(
            "<ds:SignedInfo xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">"
        ));
    }
}
