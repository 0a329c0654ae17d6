//! User directory: the document format, its loader and the lookup trait.
//!
//! A directory document has a `template` of default attributes and a
//! `users` map keyed by `"<username>:<password>"`:
//!
//! ```json
//! {
//!   "template": { "email": "user@example.com", "sn": "Doe" },
//!   "users": {
//!     "user1:user1": { "uid": "c2e4...", "cn": "user1", "secret": "8976978976698" }
//!   }
//! }
//! ```
//!
//! Each user entry is laid over the template once at load. The stored
//! credential is the entry's `secret` when it has one, otherwise the
//! password half of the key, and it is kept only as an Argon2id hash.

use crate::error::{AuthError, DirectoryError};
use crate::password::PasswordHasher;
use crate::principal::{AttributeValue, Principal, TimeSpan};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Keys with a dedicated meaning in a user entry.
pub const UID_KEY: &str = "uid";
pub const DISPLAY_NAME_KEY: &str = "cn";
pub const SECRET_KEY: &str = "secret";
pub const EXPIRATION_KEY: &str = "expiration";
pub const REFRESH_KEY: &str = "refresh";
pub const ROLE_KEY: &str = "rol";
pub const ROLE_KEY_LONG: &str = "role";
pub const COMPANY_KEY: &str = "company";

/// Raw directory document as read from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryDocument {
    /// Attributes every user starts from.
    #[serde(default)]
    pub template: BTreeMap<String, AttributeValue>,
    /// Users keyed by `"<username>:<password>"`.
    #[serde(default)]
    pub users: BTreeMap<String, BTreeMap<String, AttributeValue>>,
}

impl DirectoryDocument {
    /// Parse a directory document from JSON.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidDocument` on malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        serde_json::from_str(json).map_err(|e| AuthError::InvalidDocument(e.to_string()))
    }
}

/// A directory entry after load: the username, the credential hash and the
/// principal it authenticates as.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub username: String,
    pub credential_hash: String,
    pub principal: Principal,
}

/// Lookup seam for credential verification.
///
/// Implementations may be remote; callers bound every call with a timeout.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Find the record for a username. `Ok(None)` means no such user.
    async fn find(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError>;
}

/// Directory held entirely in memory, built once from a `DirectoryDocument`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    users: HashMap<String, UserRecord>,
}

impl InMemoryDirectory {
    /// Parse and load a JSON directory document.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidDocument` for malformed JSON and
    /// `AuthError::InvalidDirectory` listing every inconsistent entry.
    pub fn from_json(json: &str, hasher: &PasswordHasher) -> Result<Self, AuthError> {
        Self::from_document(DirectoryDocument::from_json(json)?, hasher)
    }

    /// Load a parsed document, merging the template into each user.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidDirectory` listing every problem found:
    /// malformed keys, repeated usernames, missing or duplicate `uid`, bad
    /// durations, missing credentials.
    pub fn from_document(doc: DirectoryDocument, hasher: &PasswordHasher) -> Result<Self, AuthError> {
        let mut problems = Vec::new();
        let mut users: HashMap<String, UserRecord> = HashMap::new();
        let mut uid_owners: HashMap<String, String> = HashMap::new();
        let mut usernames: HashSet<String> = HashSet::new();

        for (key, entry) in doc.users {
            let Some((username, password)) = key.split_once(':') else {
                problems.push(format!(
                    "user key '{key}' must have the form '<username>:<password>'"
                ));
                continue;
            };
            if username.is_empty() {
                problems.push(format!("user key '{key}' has an empty username"));
                continue;
            }
            if !usernames.insert(username.to_string()) {
                problems.push(format!("user '{username}' is defined more than once"));
                continue;
            }

            let mut merged = doc.template.clone();
            merged.extend(entry);

            let draft = match draft_principal(username, merged) {
                Ok(draft) => draft,
                Err(mut entry_problems) => {
                    problems.append(&mut entry_problems);
                    continue;
                }
            };

            if let Some(owner) = uid_owners.get(&draft.principal.unique_id) {
                problems.push(format!(
                    "user '{username}': uid '{}' is already used by '{owner}'",
                    draft.principal.unique_id
                ));
                continue;
            }

            let credential = match draft.secret.as_deref() {
                Some(secret) => secret,
                None if !password.is_empty() => password,
                None => {
                    problems.push(format!("user '{username}' has neither a password nor a secret"));
                    continue;
                }
            };

            let credential_hash = match hasher.hash(credential) {
                Ok(h) => h,
                Err(e) => {
                    problems.push(format!("user '{username}': {e}"));
                    continue;
                }
            };

            uid_owners.insert(draft.principal.unique_id.clone(), username.to_string());
            users.insert(
                username.to_string(),
                UserRecord {
                    username: username.to_string(),
                    credential_hash,
                    principal: draft.principal,
                },
            );
        }

        if !problems.is_empty() {
            return Err(AuthError::InvalidDirectory { problems });
        }

        tracing::debug!(users = users.len(), "Directory loaded");

        Ok(Self { users })
    }

    /// Insert a ready-made record, replacing any record with the same username.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidDirectory` if another username already
    /// owns the record's `uid`.
    pub fn insert(&mut self, record: UserRecord) -> Result<(), AuthError> {
        if let Some(owner) = self.users.values().find(|existing| {
            existing.username != record.username
                && existing.principal.unique_id == record.principal.unique_id
        }) {
            return Err(AuthError::InvalidDirectory {
                problems: vec![format!(
                    "user '{}': uid '{}' is already used by '{}'",
                    record.username, record.principal.unique_id, owner.username
                )],
            });
        }
        self.users.insert(record.username.clone(), record);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Usernames in sorted order.
    #[must_use]
    pub fn usernames(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.users.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn find(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(self.users.get(username).cloned())
    }
}

struct DraftPrincipal {
    principal: Principal,
    secret: Option<String>,
}

/// Split a merged entry into the principal and its credential secret.
fn draft_principal(
    username: &str,
    mut attrs: BTreeMap<String, AttributeValue>,
) -> Result<DraftPrincipal, Vec<String>> {
    let mut problems = Vec::new();

    let unique_id = match attrs.get(UID_KEY).and_then(AttributeValue::as_scalar) {
        Some(uid) if !uid.trim().is_empty() => uid.to_string(),
        Some(_) => {
            problems.push(format!("user '{username}' has an empty uid"));
            String::new()
        }
        None => {
            problems.push(format!("user '{username}' is missing a scalar uid"));
            String::new()
        }
    };

    let display_name = attrs
        .get(DISPLAY_NAME_KEY)
        .and_then(AttributeValue::first)
        .unwrap_or(username)
        .to_string();

    let secret = take_scalar(&mut attrs, username, SECRET_KEY, &mut problems);
    let role = take_scalar(&mut attrs, username, ROLE_KEY, &mut problems)
        .or_else(|| take_scalar(&mut attrs, username, ROLE_KEY_LONG, &mut problems));
    let company = take_scalar(&mut attrs, username, COMPANY_KEY, &mut problems);
    let expiration = take_span(&mut attrs, username, EXPIRATION_KEY, &mut problems);
    let refresh = take_span(&mut attrs, username, REFRESH_KEY, &mut problems);

    if !problems.is_empty() {
        return Err(problems);
    }

    Ok(DraftPrincipal {
        principal: Principal {
            unique_id,
            display_name,
            attributes: attrs,
            expiration,
            refresh,
            role,
            company,
        },
        secret,
    })
}

fn take_scalar(
    attrs: &mut BTreeMap<String, AttributeValue>,
    username: &str,
    key: &str,
    problems: &mut Vec<String>,
) -> Option<String> {
    match attrs.remove(key) {
        Some(AttributeValue::Scalar(v)) => Some(v),
        Some(AttributeValue::List(_)) => {
            problems.push(format!("user '{username}': '{key}' must be a single value"));
            None
        }
        None => None,
    }
}

fn take_span(
    attrs: &mut BTreeMap<String, AttributeValue>,
    username: &str,
    key: &str,
    problems: &mut Vec<String>,
) -> Option<TimeSpan> {
    let raw = take_scalar(attrs, username, key, problems)?;
    match TimeSpan::parse(&raw) {
        Ok(span) => Some(span),
        Err(e) => {
            problems.push(format!("user '{username}': {key} {e}"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> PasswordHasher {
        PasswordHasher::with_params(8, 1, 1).unwrap()
    }

    const DOC: &str = r#"{
        "template": { "email": "user@example.com", "sn": "Doe", "givenName": "Jane" },
        "users": {
            "alice:alice-pw": { "uid": "u-1", "cn": "Alice", "email": "alice@example.com" },
            "bob:bob-pw": { "uid": "u-2", "secret": "s3cret", "expiration": "1m", "refresh": "3m", "rol": "admin", "company": "ACME" }
        }
    }"#;

    #[test]
    fn test_template_is_merged_under_user_entry() {
        let dir = InMemoryDirectory::from_json(DOC, &fast_hasher()).unwrap();
        let alice = dir.users.get("alice").unwrap();
        assert_eq!(alice.principal.unique_id, "u-1");
        assert_eq!(alice.principal.display_name, "Alice");
        assert_eq!(
            alice.principal.attribute("email"),
            Some(&AttributeValue::from("alice@example.com"))
        );
        assert_eq!(alice.principal.attribute("sn"), Some(&AttributeValue::from("Doe")));
    }

    #[test]
    fn test_special_fields_are_typed_and_removed_from_attributes() {
        let dir = InMemoryDirectory::from_json(DOC, &fast_hasher()).unwrap();
        let bob = &dir.users.get("bob").unwrap().principal;
        assert_eq!(bob.role.as_deref(), Some("admin"));
        assert_eq!(bob.company.as_deref(), Some("ACME"));
        assert_eq!(bob.expiration.as_ref().unwrap().as_str(), "1m");
        assert_eq!(bob.refresh.as_ref().unwrap().duration().as_secs(), 180);
        assert!(bob.attribute(SECRET_KEY).is_none());
        assert!(bob.attribute(ROLE_KEY).is_none());
        // Display name falls back to the username
        assert_eq!(bob.display_name, "bob");
    }

    #[test]
    fn test_secret_takes_precedence_over_password() {
        let hasher = fast_hasher();
        let dir = InMemoryDirectory::from_json(DOC, &hasher).unwrap();
        let bob = dir.users.get("bob").unwrap();
        assert!(hasher.verify("s3cret", &bob.credential_hash).unwrap());
        assert!(!hasher.verify("bob-pw", &bob.credential_hash).unwrap());

        let alice = dir.users.get("alice").unwrap();
        assert!(hasher.verify("alice-pw", &alice.credential_hash).unwrap());
    }

    #[test]
    fn test_duplicate_uid_is_rejected() {
        let doc = r#"{"users": {
            "a:a": { "uid": "same" },
            "b:b": { "uid": "same" }
        }}"#;
        let err = InMemoryDirectory::from_json(doc, &fast_hasher()).unwrap_err();
        let problems = err.problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("uid 'same' is already used by 'a'"));
    }

    #[test]
    fn test_repeated_username_is_rejected() {
        let doc = r#"{"users": {
            "alice:one": { "uid": "u-1" },
            "alice:two": { "uid": "u-2" }
        }}"#;
        let err = InMemoryDirectory::from_json(doc, &fast_hasher()).unwrap_err();
        let problems = err.problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("'alice' is defined more than once"));
    }

    #[test]
    fn test_insert_rejects_uid_owned_by_another_user() {
        let mut dir = InMemoryDirectory::from_json(DOC, &fast_hasher()).unwrap();
        let mut carol = dir.users.get("alice").unwrap().clone();
        carol.username = "carol".to_string();
        let err = dir.insert(carol).unwrap_err();
        assert!(err.to_string().contains("uid 'u-1' is already used by 'alice'"));

        // Replacing a user's own record is fine
        let alice = dir.users.get("alice").unwrap().clone();
        dir.insert(alice).unwrap();
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn test_all_problems_are_reported_together() {
        let doc = r#"{"users": {
            "nocolon": { "uid": "x" },
            "a:a": { "cn": "no uid" },
            "b:b": { "uid": "b", "expiration": "soon" }
        }}"#;
        let err = InMemoryDirectory::from_json(doc, &fast_hasher()).unwrap_err();
        assert_eq!(err.problems().len(), 3, "{:?}", err.problems());
    }

    #[test]
    fn test_missing_credential_is_rejected() {
        let doc = r#"{"users": { "a:": { "uid": "a" } }}"#;
        let err = InMemoryDirectory::from_json(doc, &fast_hasher()).unwrap_err();
        assert!(err.to_string().contains("neither a password nor a secret"));
    }

    #[test]
    fn test_malformed_json_is_invalid_document() {
        let err = InMemoryDirectory::from_json("{", &fast_hasher()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn test_find_unknown_user_is_none() {
        let dir = InMemoryDirectory::from_json(DOC, &fast_hasher()).unwrap();
        assert!(dir.find("mallory").await.unwrap().is_none());
        assert!(dir.find("alice").await.unwrap().is_some());
        assert_eq!(dir.usernames(), vec!["alice", "bob"]);
    }
}
