//! IdP signing credentials: an RSA private key and its X.509 certificate.

use crate::xmldsig::SignatureError;
use arc_swap::ArcSwapOption;
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use std::sync::Arc;

/// RSA key and certificate used to sign assertions and logout responses.
#[derive(Clone)]
pub struct SigningCredentials {
    private_key: PKey<Private>,
    certificate: X509,
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("subject", &self.subject_common_name())
            .finish_non_exhaustive()
    }
}

impl SigningCredentials {
    /// Load from PEM-encoded key and certificate.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::Key` if either PEM is unreadable, the key is
    /// not RSA, or the key does not match the certificate.
    pub fn from_pem(private_key_pem: &str, certificate_pem: &str) -> Result<Self, SignatureError> {
        let private_key = PKey::private_key_from_pem(private_key_pem.as_bytes())
            .map_err(|e| SignatureError::Key(format!("Invalid private key: {e}")))?;
        let certificate = X509::from_pem(certificate_pem.as_bytes())
            .map_err(|e| SignatureError::Key(format!("Invalid certificate: {e}")))?;
        Self::new(private_key, certificate)
    }

    /// Pair an existing key and certificate.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::Key` if the key is not RSA or does not match
    /// the certificate's public key.
    pub fn new(private_key: PKey<Private>, certificate: X509) -> Result<Self, SignatureError> {
        if private_key.rsa().is_err() {
            return Err(SignatureError::Key("Signing key must be RSA".to_string()));
        }
        let public_key = certificate
            .public_key()
            .map_err(|e| SignatureError::Key(format!("Certificate has no public key: {e}")))?;
        if !private_key.public_eq(&public_key) {
            return Err(SignatureError::Key(
                "Private key does not match certificate".to_string(),
            ));
        }
        Ok(Self {
            private_key,
            certificate,
        })
    }

    /// Generate a fresh 2048-bit RSA key with a self-signed certificate.
    ///
    /// Meant for development bootstrapping and tests.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::Crypto` if OpenSSL fails.
    pub fn self_signed(common_name: &str, validity_days: u32) -> Result<Self, SignatureError> {
        let build = || -> Result<(PKey<Private>, X509), openssl::error::ErrorStack> {
            let private_key = PKey::from_rsa(Rsa::generate(2048)?)?;

            let mut name = X509NameBuilder::new()?;
            name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
            let name = name.build();

            let serial = {
                let mut bn = BigNum::new()?;
                bn.rand(127, MsbOption::MAYBE_ZERO, false)?;
                bn.to_asn1_integer()?
            };

            let mut builder = X509Builder::new()?;
            builder.set_version(2)?;
            builder.set_serial_number(&serial)?;
            builder.set_subject_name(&name)?;
            builder.set_issuer_name(&name)?;
            builder.set_pubkey(&private_key)?;
            let not_before = Asn1Time::days_from_now(0)?;
            let not_after = Asn1Time::days_from_now(validity_days)?;
            builder.set_not_before(&not_before)?;
            builder.set_not_after(&not_after)?;
            builder.sign(&private_key, MessageDigest::sha256())?;

            Ok((private_key, builder.build()))
        };

        let (private_key, certificate) =
            build().map_err(|e| SignatureError::Crypto(format!("Key generation failed: {e}")))?;

        Ok(Self {
            private_key,
            certificate,
        })
    }

    /// RSA-SHA256 (PKCS#1 v1.5) signature over `data`.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::Crypto` if OpenSSL fails.
    pub fn sign_sha256(&self, data: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.private_key)
            .map_err(|e| SignatureError::Crypto(format!("Signer creation failed: {e}")))?;
        signer
            .update(data)
            .map_err(|e| SignatureError::Crypto(format!("Signer update failed: {e}")))?;
        signer
            .sign_to_vec()
            .map_err(|e| SignatureError::Crypto(format!("Signing failed: {e}")))
    }

    /// Certificate as base64 DER, the form used in `ds:X509Certificate`.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::Crypto` if DER encoding fails.
    pub fn certificate_base64_der(&self) -> Result<String, SignatureError> {
        let der = self
            .certificate
            .to_der()
            .map_err(|e| SignatureError::Crypto(format!("Certificate encoding failed: {e}")))?;
        Ok(STANDARD.encode(der))
    }

    #[must_use]
    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    #[must_use]
    pub fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    fn subject_common_name(&self) -> Option<String> {
        self.certificate
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|name| name.to_string())
    }
}

/// Replaceable slot holding the IdP signing credentials.
///
/// Clones share the slot, so a rotation is seen by every holder: the
/// assertion builder, logout responses and redirect-query signing.
#[derive(Clone, Default)]
pub struct SigningKeySlot {
    inner: Arc<ArcSwapOption<SigningCredentials>>,
}

impl std::fmt::Debug for SigningKeySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeySlot")
            .field("credentials", &self.load())
            .finish()
    }
}

impl SigningKeySlot {
    #[must_use]
    pub fn new(credentials: Option<SigningCredentials>) -> Self {
        Self {
            inner: Arc::new(ArcSwapOption::from(credentials.map(Arc::new))),
        }
    }

    /// The credentials currently installed.
    #[must_use]
    pub fn load(&self) -> Option<Arc<SigningCredentials>> {
        self.inner.load_full()
    }

    /// Install new credentials. Holders of a previous `load` keep theirs.
    pub fn store(&self, credentials: Option<SigningCredentials>) {
        self.inner.store(credentials.map(Arc::new));
    }
}
