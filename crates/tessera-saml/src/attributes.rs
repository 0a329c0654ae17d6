//! Attribute release and `NameID` resolution.

use tessera_auth::directory::{COMPANY_KEY, EXPIRATION_KEY, REFRESH_KEY, ROLE_KEY};
use tessera_auth::Principal;
use std::collections::BTreeSet;

/// Supported `NameID` formats
pub const NAMEID_FORMAT_UNSPECIFIED: &str =
    "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";
pub const NAMEID_FORMAT_EMAIL: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";
pub const NAMEID_FORMAT_PERSISTENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent";
pub const NAMEID_FORMAT_TRANSIENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:transient";

pub const ATTRNAME_FORMAT_BASIC: &str = "urn:oasis:names:tc:SAML:2.0:attrname-format:basic";
pub const ATTRNAME_FORMAT_URI: &str = "urn:oasis:names:tc:SAML:2.0:attrname-format:uri";
pub const ATTRNAME_FORMAT_UNSPECIFIED: &str =
    "urn:oasis:names:tc:SAML:2.0:attrname-format:unspecified";

/// Directory attribute consulted for the emailAddress `NameID` format.
pub const EMAIL_ATTRIBUTE: &str = "email";

/// Check if a `NameID` format is supported
#[must_use]
pub fn is_supported_nameid_format(format: &str) -> bool {
    matches!(
        format,
        NAMEID_FORMAT_UNSPECIFIED
            | NAMEID_FORMAT_EMAIL
            | NAMEID_FORMAT_PERSISTENT
            | NAMEID_FORMAT_TRANSIENT
    )
}

#[must_use]
pub fn is_supported_attribute_name_format(format: &str) -> bool {
    matches!(
        format,
        ATTRNAME_FORMAT_BASIC | ATTRNAME_FORMAT_URI | ATTRNAME_FORMAT_UNSPECIFIED
    )
}

/// Which attributes a relying party receives, and how they are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeReleasePolicy {
    /// Allow-list of attribute names. `None` releases everything.
    pub allowed: Option<BTreeSet<String>>,
    /// `NameFormat` put on every released attribute.
    pub name_format: String,
    /// Attribute whose value becomes a persistent/unspecified `NameID`.
    pub name_id_attribute: Option<String>,
}

impl Default for AttributeReleasePolicy {
    fn default() -> Self {
        Self {
            allowed: None,
            name_format: ATTRNAME_FORMAT_BASIC.to_string(),
            name_id_attribute: None,
        }
    }
}

impl AttributeReleasePolicy {
    fn permits(&self, name: &str) -> bool {
        self.allowed
            .as_ref()
            .map_or(true, |allowed| allowed.contains(name))
    }
}

/// A resolved SAML attribute ready for assertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttribute {
    pub name: String,
    pub name_format: String,
    pub values: Vec<String>,
}

/// Attributes released to a relying party, sorted by name.
///
/// Role, company, expiration and refresh are released under their directory
/// names. The credential secret never reaches a principal and so is never
/// released. Empty lists produce no attribute.
#[must_use]
pub fn release_attributes(
    principal: &Principal,
    policy: &AttributeReleasePolicy,
) -> Vec<ResolvedAttribute> {
    let mut released: Vec<(String, Vec<String>)> = principal
        .attributes
        .iter()
        .map(|(name, value)| (name.clone(), value.values()))
        .collect();

    let extras = [
        (ROLE_KEY, principal.role.clone()),
        (COMPANY_KEY, principal.company.clone()),
        (EXPIRATION_KEY, principal.expiration.as_ref().map(ToString::to_string)),
        (REFRESH_KEY, principal.refresh.as_ref().map(ToString::to_string)),
    ];
    for (name, value) in extras {
        if let Some(value) = value {
            released.push((name.to_string(), vec![value]));
        }
    }

    released.sort_by(|a, b| a.0.cmp(&b.0));

    released
        .into_iter()
        .filter(|(name, values)| !values.is_empty() && policy.permits(name))
        .map(|(name, values)| ResolvedAttribute {
            name,
            name_format: policy.name_format.clone(),
            values,
        })
        .collect()
}

/// Get `NameID` value for the specified format
///
/// Returns `None` for an unsupported format.
#[must_use]
pub fn resolve_name_id(
    principal: &Principal,
    format: &str,
    policy: &AttributeReleasePolicy,
) -> Option<String> {
    let from_attribute = |name: &str| {
        principal
            .attribute(name)
            .and_then(|v| v.first())
            .filter(|v| !v.is_empty())
            .map(String::from)
    };

    match format {
        NAMEID_FORMAT_PERSISTENT | NAMEID_FORMAT_UNSPECIFIED => Some(
            policy
                .name_id_attribute
                .as_deref()
                .and_then(from_attribute)
                .unwrap_or_else(|| principal.unique_id.clone()),
        ),
        NAMEID_FORMAT_EMAIL => {
            Some(from_attribute(EMAIL_ATTRIBUTE).unwrap_or_else(|| principal.unique_id.clone()))
        }
        NAMEID_FORMAT_TRANSIENT => Some(format!("_transient_{}", uuid::Uuid::new_v4())),
        _ => None,
    }
}
