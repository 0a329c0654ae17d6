//! HTTP-Redirect and HTTP-POST message encoding.
//!
//! Inbound redirect parameters are kept exactly as received because the
//! query-string signature covers the URL-encoded bytes.

use crate::error::{SamlError, SamlResult};
use crate::signing::SigningCredentials;
use crate::trust_store::Binding;
use crate::xmldsig::{SignatureError, ALG_RSA_SHA256};
use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Maximum decompressed size for deflate decoding (64 KB)
const MAX_DECOMPRESSED_SIZE: u64 = 64 * 1024;

/// Maximum encoded size for a message in the HTTP-Redirect binding (128 KB)
const MAX_ENCODED_SIZE_REDIRECT: usize = 128 * 1024;

/// Maximum encoded size for a message in the HTTP-POST binding (512 KB)
const MAX_ENCODED_SIZE_POST: usize = 512 * 1024;

pub const MAX_RELAY_STATE_LENGTH: usize = 1024;

pub const PARAM_SAML_REQUEST: &str = "SAMLRequest";
pub const PARAM_SAML_RESPONSE: &str = "SAMLResponse";

/// HTTP-Redirect query parameters, URL-encoded as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectQuery {
    message_param: &'static str,
    message: String,
    relay_state: Option<String>,
    sig_alg: Option<String>,
    signature: Option<String>,
}

impl RedirectQuery {
    /// Split a raw query string (without the leading `?`).
    ///
    /// # Errors
    ///
    /// Returns `SamlError::MalformedRequest` if there is no `SAMLRequest`
    /// or `SAMLResponse`, or a parameter appears twice.
    pub fn parse(query: &str) -> SamlResult<Self> {
        let mut message: Option<(&'static str, String)> = None;
        let mut relay_state = None;
        let mut sig_alg = None;
        let mut signature = None;

        for pair in query.trim_start_matches('?').split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let slot = match key {
                PARAM_SAML_REQUEST | PARAM_SAML_RESPONSE => {
                    if message.is_some() {
                        return Err(duplicate(key));
                    }
                    let param = if key == PARAM_SAML_REQUEST {
                        PARAM_SAML_REQUEST
                    } else {
                        PARAM_SAML_RESPONSE
                    };
                    message = Some((param, value.to_string()));
                    continue;
                }
                "RelayState" => &mut relay_state,
                "SigAlg" => &mut sig_alg,
                "Signature" => &mut signature,
                _ => continue,
            };
            if slot.is_some() {
                return Err(duplicate(key));
            }
            *slot = Some(value.to_string());
        }

        let (message_param, message) = message.ok_or_else(|| {
            SamlError::MalformedRequest("Missing SAMLRequest parameter".to_string())
        })?;

        Ok(Self {
            message_param,
            message,
            relay_state,
            sig_alg,
            signature,
        })
    }

    /// Build from already URL-encoded `SAMLRequest` parameter values.
    #[must_use]
    pub fn new(
        saml_request: impl Into<String>,
        relay_state: Option<String>,
        sig_alg: Option<String>,
        signature: Option<String>,
    ) -> Self {
        Self {
            message_param: PARAM_SAML_REQUEST,
            message: saml_request.into(),
            relay_state,
            sig_alg,
            signature,
        }
    }

    /// The octets covered by the query-string signature:
    /// `SAMLRequest=..[&RelayState=..]&SigAlg=..`, URL-encoded as received.
    #[must_use]
    pub fn signed_content(&self) -> String {
        let mut signed_data = format!("{}={}", self.message_param, self.message);
        if let Some(rs) = &self.relay_state {
            if !rs.is_empty() {
                signed_data.push_str("&RelayState=");
                signed_data.push_str(rs);
            }
        }
        signed_data.push_str("&SigAlg=");
        signed_data.push_str(self.sig_alg.as_deref().unwrap_or(""));
        signed_data
    }

    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Decoded `SigAlg` URI.
    ///
    /// # Errors
    ///
    /// Returns `SamlError::InvalidRequestSignature` if it is not valid UTF-8.
    pub fn sig_alg(&self) -> SamlResult<Option<String>> {
        self.sig_alg
            .as_deref()
            .map(|raw| {
                url_decode(raw).map_err(|e| {
                    SamlError::InvalidRequestSignature(format!("Invalid SigAlg encoding: {e}"))
                })
            })
            .transpose()
    }

    /// Decoded signature bytes.
    ///
    /// # Errors
    ///
    /// Returns `SamlError::InvalidRequestSignature` if the value is not
    /// URL-encoded base64.
    pub fn signature(&self) -> SamlResult<Option<Vec<u8>>> {
        self.signature
            .as_deref()
            .map(|raw| {
                let decoded = url_decode(raw).map_err(|e| {
                    SamlError::InvalidRequestSignature(format!("Invalid signature encoding: {e}"))
                })?;
                STANDARD.decode(decoded.trim()).map_err(|e| {
                    SamlError::InvalidRequestSignature(format!("Invalid signature encoding: {e}"))
                })
            })
            .transpose()
    }

    /// Inflate the message XML.
    ///
    /// # Errors
    ///
    /// Returns `SamlError::MalformedRequest` if the message is oversized or
    /// not URL-encoded, base64, deflated UTF-8.
    pub fn decode_xml(&self) -> SamlResult<String> {
        // Reject oversized input before base64 decode
        if self.message.len() > MAX_ENCODED_SIZE_REDIRECT {
            return Err(SamlError::MalformedRequest(format!(
                "Encoded {} exceeds maximum size ({} > {} bytes)",
                self.message_param,
                self.message.len(),
                MAX_ENCODED_SIZE_REDIRECT
            )));
        }

        let encoded = url_decode(&self.message)
            .map_err(|e| SamlError::MalformedRequest(format!("URL decode failed: {e}")))?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SamlError::MalformedRequest(format!("Base64 decode failed: {e}")))?;

        // Inflate with size limit to prevent deflate bomb DoS
        let decoder = DeflateDecoder::new(&decoded[..]);
        let mut xml = String::new();
        decoder
            .take(MAX_DECOMPRESSED_SIZE)
            .read_to_string(&mut xml)
            .map_err(|e| SamlError::MalformedRequest(format!("Deflate decode failed: {e}")))?;

        if xml.len() as u64 >= MAX_DECOMPRESSED_SIZE {
            return Err(SamlError::MalformedRequest(
                "Decompressed message exceeds maximum size limit (64 KB)".to_string(),
            ));
        }

        Ok(xml)
    }

    fn relay_state(&self) -> SamlResult<Option<String>> {
        self.relay_state
            .as_deref()
            .map(|raw| {
                url_decode(raw)
                    .map_err(|e| SamlError::MalformedRequest(format!("Invalid RelayState: {e}")))
            })
            .transpose()
    }
}

fn duplicate(key: &str) -> SamlError {
    SamlError::MalformedRequest(format!("Duplicate {key} parameter"))
}

fn url_decode(raw: &str) -> Result<String, std::string::FromUtf8Error> {
    urlencoding::decode(raw).map(std::borrow::Cow::into_owned)
}

/// A request as it arrived at the IdP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Redirect(RedirectQuery),
    Post {
        /// Base64 `SAMLRequest` form field.
        message: String,
        relay_state: Option<String>,
    },
}

impl InboundMessage {
    /// An HTTP-Redirect request from its raw query string.
    ///
    /// # Errors
    ///
    /// See [`RedirectQuery::parse`].
    pub fn redirect(query: &str) -> SamlResult<Self> {
        RedirectQuery::parse(query).map(Self::Redirect)
    }

    /// An HTTP-POST request from its (already form-decoded) fields.
    #[must_use]
    pub fn post(message: impl Into<String>, relay_state: Option<String>) -> Self {
        Self::Post {
            message: message.into(),
            relay_state,
        }
    }

    #[must_use]
    pub fn binding(&self) -> Binding {
        match self {
            Self::Redirect(_) => Binding::HttpRedirect,
            Self::Post { .. } => Binding::HttpPost,
        }
    }

    /// The decoded message XML.
    ///
    /// # Errors
    ///
    /// Returns `SamlError::MalformedRequest` if the message cannot be decoded.
    pub fn decode_xml(&self) -> SamlResult<String> {
        match self {
            Self::Redirect(query) => query.decode_xml(),
            Self::Post { message, .. } => {
                if message.len() > MAX_ENCODED_SIZE_POST {
                    return Err(SamlError::MalformedRequest(format!(
                        "Encoded SAMLRequest exceeds maximum size ({} > {} bytes)",
                        message.len(),
                        MAX_ENCODED_SIZE_POST
                    )));
                }
                let compact: String = message.chars().filter(|c| !c.is_whitespace()).collect();
                let decoded = STANDARD.decode(compact).map_err(|e| {
                    SamlError::MalformedRequest(format!("Base64 decode failed: {e}"))
                })?;
                String::from_utf8(decoded)
                    .map_err(|e| SamlError::MalformedRequest(format!("Invalid UTF-8: {e}")))
            }
        }
    }

    /// The decoded `RelayState`, bounded in length.
    ///
    /// # Errors
    ///
    /// Returns `SamlError::MalformedRequest` if it is too long or not UTF-8.
    pub fn relay_state(&self) -> SamlResult<Option<String>> {
        let relay_state = match self {
            Self::Redirect(query) => query.relay_state()?,
            Self::Post { relay_state, .. } => relay_state.clone(),
        };
        if let Some(rs) = &relay_state {
            if rs.len() > MAX_RELAY_STATE_LENGTH {
                return Err(SamlError::MalformedRequest(format!(
                    "RelayState exceeds maximum length of {MAX_RELAY_STATE_LENGTH} bytes"
                )));
            }
        }
        Ok(relay_state)
    }
}

/// Base64 encoding used by the HTTP-POST binding.
#[must_use]
pub fn post_encode(xml: &str) -> String {
    STANDARD.encode(xml.as_bytes())
}

/// Raw DEFLATE then base64, as used by the HTTP-Redirect binding.
///
/// # Errors
///
/// Returns the compressor's I/O error.
pub fn deflate_encode(xml: &str) -> std::io::Result<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(xml.as_bytes())?;
    Ok(STANDARD.encode(encoder.finish()?))
}

/// Query string for an outbound HTTP-Redirect message, signed with
/// RSA-SHA256 when credentials are given.
///
/// # Errors
///
/// Returns `SignatureError::Crypto` if compression or signing fails.
pub fn encode_redirect_query(
    message_param: &str,
    xml: &str,
    relay_state: Option<&str>,
    credentials: Option<&SigningCredentials>,
) -> Result<String, SignatureError> {
    let encoded = deflate_encode(xml)
        .map_err(|e| SignatureError::Crypto(format!("Deflate failed: {e}")))?;

    let mut query = format!("{message_param}={}", urlencoding::encode(&encoded));
    if let Some(rs) = relay_state.filter(|rs| !rs.is_empty()) {
        query.push_str("&RelayState=");
        query.push_str(&urlencoding::encode(rs));
    }

    if let Some(credentials) = credentials {
        query.push_str("&SigAlg=");
        query.push_str(&urlencoding::encode(ALG_RSA_SHA256));
        let signature = credentials.sign_sha256(query.as_bytes())?;
        query.push_str("&Signature=");
        query.push_str(&urlencoding::encode(&STANDARD.encode(signature)));
    }

    Ok(query)
}

/// Append a query string to an endpoint location that may already have one.
#[must_use]
pub fn redirect_url(location: &str, query: &str) -> String {
    let separator = if location.contains('?') { '&' } else { '?' };
    format!("{location}{separator}{query}")
}

/// Self-submitting HTML form for the HTTP-POST binding.
#[must_use]
pub fn render_post_form(
    action: &str,
    message_param: &str,
    encoded_message: &str,
    relay_state: Option<&str>,
) -> String {
    let relay_input = relay_state
        .map(|rs| {
            format!(
                r#"<input type="hidden" name="RelayState" value="{}"/>"#,
                html_escape(rs)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>SAML</title>
</head>
<body onload="document.forms[0].submit()">
    <noscript>
        <p>JavaScript is disabled. Click the button below to continue.</p>
    </noscript>
    <form method="POST" action="{}">
        <input type="hidden" name="{}" value="{}"/>
        {}
        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
        html_escape(action),
        message_param,
        html_escape(encoded_message),
        relay_input
    )
}

/// HTML escape for XSS prevention
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
