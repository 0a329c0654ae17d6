//! Relying-party metadata document as loaded from JSON.
//!
//! Field names follow the `saml20-sp-remote` metadata layout so that
//! existing metadata exports load unchanged. Validation happens in
//! [`crate::trust_store`]; these types only describe the shape.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entity identifier to relying-party record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataDocument(pub BTreeMap<String, RelyingPartyEntry>);

impl MetadataDocument {
    /// Parse a metadata document.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the document does not have the expected shape.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: RelyingPartyEntry) {
        self.0.insert(key.into(), entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelyingPartyEntry {
    /// Defaults to the map key when absent.
    #[serde(default)]
    pub entityid: Option<String>,

    #[serde(default)]
    pub contacts: Vec<ContactEntry>,

    #[serde(rename = "AssertionConsumerService", default)]
    pub assertion_consumer_service: Option<EndpointList>,

    #[serde(rename = "SingleLogoutService", default)]
    pub single_logout_service: Option<EndpointList>,

    #[serde(rename = "NameIDFormat", default)]
    pub name_id_format: Option<String>,

    #[serde(default)]
    pub keys: Vec<KeyEntry>,

    #[serde(rename = "validate.authnrequest", default)]
    pub validate_authn_request: bool,

    /// Attribute names released to this relying party. All when absent.
    #[serde(default)]
    pub attributes: Option<Vec<String>>,

    #[serde(rename = "attributes.NameFormat", default)]
    pub attribute_name_format: Option<String>,

    /// Attribute used as the NameID value for persistent/unspecified formats.
    #[serde(rename = "simplesaml.nameidattribute", default)]
    pub name_id_attribute: Option<String>,
}

/// An endpoint given either as a bare location or as a list of records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointList {
    Location(String),
    Endpoints(Vec<EndpointEntry>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointEntry {
    #[serde(rename = "Binding", default)]
    pub binding: Option<String>,

    #[serde(rename = "Location", default)]
    pub location: String,

    #[serde(default)]
    pub index: Option<u16>,

    #[serde(rename = "isDefault", default)]
    pub is_default: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEntry {
    #[serde(default)]
    pub encryption: bool,

    #[serde(default)]
    pub signing: bool,

    #[serde(rename = "type", default = "default_key_type")]
    pub key_type: String,

    #[serde(rename = "X509Certificate", default)]
    pub x509_certificate: String,
}

fn default_key_type() -> String {
    "X509Certificate".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactEntry {
    #[serde(rename = "contactType", default)]
    pub contact_type: Option<String>,

    #[serde(rename = "emailAddress", default)]
    pub email_address: Option<String>,

    #[serde(rename = "givenName", default)]
    pub given_name: Option<String>,

    #[serde(rename = "surName", default)]
    pub sur_name: Option<String>,
}
