//! `EncryptedAssertion` envelopes.
//!
//! The signed assertion is encrypted with a fresh AES-256-GCM content key;
//! the key is wrapped with RSA-OAEP under the relying party's certificate.
//! `CipherValue` for the content carries nonce (12 bytes) || ciphertext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::pkey::{PKey, Private};
use openssl::rsa::Padding;
use openssl::x509::X509;
use rand::RngCore;
use thiserror::Error;

pub const XMLENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";
pub const ALG_AES256_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";
pub const ALG_RSA_OAEP_MGF1P: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";
const TYPE_ELEMENT: &str = "http://www.w3.org/2001/04/xmlenc#Element";

/// AES-256-GCM nonce size in bytes.
const NONCE_SIZE: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncryptionError {
    /// The certificate cannot be used as a key-transport key.
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    Crypto(String),

    #[error("Malformed encrypted assertion: {0}")]
    Malformed(String),
}

/// Wrap `signed_assertion` in a `saml:EncryptedAssertion` keyed to `certificate`.
///
/// # Errors
///
/// Returns `EncryptionError::InvalidKey` if the certificate does not carry an
/// RSA public key, or `EncryptionError::Crypto` if encryption fails.
pub fn encrypt_assertion(
    signed_assertion: &str,
    certificate: &X509,
) -> Result<String, EncryptionError> {
    let rsa = certificate
        .public_key()
        .and_then(|key| key.rsa())
        .map_err(|e| EncryptionError::InvalidKey(format!("Certificate is not RSA: {e}")))?;

    let mut content_key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut content_key);

    let cipher = Aes256Gcm::new_from_slice(&content_key)
        .map_err(|e| EncryptionError::Crypto(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, signed_assertion.as_bytes())
        .map_err(|e| EncryptionError::Crypto(e.to_string()))?;

    let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(&ciphertext);

    let mut wrapped = vec![0u8; rsa.size() as usize];
    let wrapped_len = rsa
        .public_encrypt(&content_key, &mut wrapped, Padding::PKCS1_OAEP)
        .map_err(|e| EncryptionError::Crypto(format!("Key transport failed: {e}")))?;
    wrapped.truncate(wrapped_len);

    Ok(format!(
        r#"<saml:EncryptedAssertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"><xenc:EncryptedData xmlns:xenc="{XMLENC_NS}" Type="{TYPE_ELEMENT}"><xenc:EncryptionMethod Algorithm="{ALG_AES256_GCM}"/><ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><xenc:EncryptedKey><xenc:EncryptionMethod Algorithm="{ALG_RSA_OAEP_MGF1P}"><ds:DigestMethod Algorithm="http://www.w3.org/2000/09/xmldsig#sha1"/></xenc:EncryptionMethod><xenc:CipherData><xenc:CipherValue>{key}</xenc:CipherValue></xenc:CipherData></xenc:EncryptedKey></ds:KeyInfo><xenc:CipherData><xenc:CipherValue>{data}</xenc:CipherValue></xenc:CipherData></xenc:EncryptedData></saml:EncryptedAssertion>"#,
        key = STANDARD.encode(wrapped),
        data = STANDARD.encode(payload),
    ))
}

/// Unwrap an `EncryptedAssertion` produced by [`encrypt_assertion`].
///
/// Relying parties do this on their side; the IdP uses it to check its own
/// output.
///
/// # Errors
///
/// Returns `EncryptionError::Malformed` if the envelope is not in the
/// expected shape, or `EncryptionError::Crypto` if decryption fails.
pub fn decrypt_assertion(
    encrypted: &str,
    private_key: &PKey<Private>,
) -> Result<String, EncryptionError> {
    let envelope = Envelope::parse(encrypted)?;

    if envelope.data_algorithm != ALG_AES256_GCM {
        return Err(EncryptionError::Malformed(format!(
            "Unsupported data encryption algorithm: {}",
            envelope.data_algorithm
        )));
    }
    if envelope.key_algorithm != ALG_RSA_OAEP_MGF1P {
        return Err(EncryptionError::Malformed(format!(
            "Unsupported key transport algorithm: {}",
            envelope.key_algorithm
        )));
    }

    let rsa = private_key
        .rsa()
        .map_err(|e| EncryptionError::InvalidKey(format!("Key is not RSA: {e}")))?;
    let mut content_key = vec![0u8; rsa.size() as usize];
    let key_len = rsa
        .private_decrypt(&envelope.wrapped_key, &mut content_key, Padding::PKCS1_OAEP)
        .map_err(|e| EncryptionError::Crypto(format!("Key unwrap failed: {e}")))?;
    content_key.truncate(key_len);

    if envelope.payload.len() < NONCE_SIZE {
        return Err(EncryptionError::Malformed(
            "Encrypted data too short".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new_from_slice(&content_key)
        .map_err(|e| EncryptionError::Crypto(e.to_string()))?;
    let (nonce_bytes, ciphertext) = envelope.payload.split_at(NONCE_SIZE);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| EncryptionError::Crypto(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| EncryptionError::Crypto(e.to_string()))
}

struct Envelope {
    data_algorithm: String,
    key_algorithm: String,
    wrapped_key: Vec<u8>,
    payload: Vec<u8>,
}

impl Envelope {
    fn parse(xml: &str) -> Result<Self, EncryptionError> {
        use quick_xml::events::Event;
        use quick_xml::Reader;

        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut algorithms = Vec::new();
        let mut cipher_values = Vec::new();
        let mut in_cipher_value = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e) | Event::Empty(e)) => match e.local_name().as_ref() {
                    b"EncryptionMethod" => {
                        let algorithm = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == b"Algorithm")
                            .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
                            .unwrap_or_default();
                        algorithms.push(algorithm);
                    }
                    b"CipherValue" => in_cipher_value = true,
                    _ => {}
                },
                Ok(Event::Text(e)) if in_cipher_value => {
                    let text = e
                        .unescape()
                        .map_err(|e| EncryptionError::Malformed(e.to_string()))?;
                    cipher_values.push(text.to_string());
                }
                Ok(Event::End(_)) => in_cipher_value = false,
                Ok(Event::Eof) => break,
                Err(e) => return Err(EncryptionError::Malformed(format!("XML parse error: {e}"))),
                _ => {}
            }
        }

        let [data_algorithm, key_algorithm] = <[String; 2]>::try_from(algorithms)
            .map_err(|_| EncryptionError::Malformed("Expected two EncryptionMethod elements".into()))?;
        let [wrapped_key, payload] = <[String; 2]>::try_from(cipher_values)
            .map_err(|_| EncryptionError::Malformed("Expected two CipherValue elements".into()))?;

        let decode = |value: &str| {
            STANDARD
                .decode(value.trim())
                .map_err(|e| EncryptionError::Malformed(format!("Invalid base64: {e}")))
        };

        Ok(Self {
            data_algorithm,
            key_algorithm,
            wrapped_key: decode(&wrapped_key)?,
            payload: decode(&payload)?,
        })
    }
}
