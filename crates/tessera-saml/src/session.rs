//! Registry of sessions established at relying parties
//!
//! A session is recorded whenever an assertion is issued and removed again
//! by single logout.

use crate::assertion_builder::Assertion;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Default lifetime of a recorded session (8 hours).
pub const DEFAULT_SESSION_LIFETIME_SECS: i64 = 8 * 60 * 60;

/// A session the IdP has established at one relying party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpSession {
    pub sp_entity_id: String,
    pub principal_id: String,
    pub name_id: String,
    pub name_id_format: String,
    pub session_index: String,
    pub expires_at: DateTime<Utc>,
}

impl SpSession {
    /// The session an assertion establishes, kept for `lifetime` after the
    /// assertion's issue instant. This is independent of the assertion's
    /// own `NotOnOrAfter`.
    #[must_use]
    pub fn from_assertion(assertion: &Assertion, principal_id: &str, lifetime: Duration) -> Self {
        Self {
            sp_entity_id: assertion.conditions.audience.clone(),
            principal_id: principal_id.to_string(),
            name_id: assertion.name_id.clone(),
            name_id_format: assertion.name_id_format.clone(),
            session_index: assertion.session_index.clone(),
            expires_at: assertion.issue_instant + lifetime,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Sessions keyed by (relying party, session index).
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<(String, String), SpSession>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, session: SpSession) {
        tracing::debug!(
            sp_entity_id = %session.sp_entity_id,
            session_index = %session.session_index,
            "SP session recorded"
        );
        self.sessions.insert(
            (session.sp_entity_id.clone(), session.session_index.clone()),
            session,
        );
    }

    /// Remove the sessions a `LogoutRequest` names and return them.
    ///
    /// Without a session index every session of `name_id` at the relying
    /// party is removed.
    pub fn invalidate(
        &self,
        sp_entity_id: &str,
        name_id: &str,
        session_index: Option<&str>,
    ) -> Vec<SpSession> {
        if let Some(index) = session_index {
            let key = (sp_entity_id.to_string(), index.to_string());
            return self
                .sessions
                .remove_if(&key, |_, session| session.name_id == name_id)
                .map(|(_, session)| vec![session])
                .unwrap_or_default();
        }

        let mut removed = Vec::new();
        self.sessions.retain(|_, session| {
            if session.sp_entity_id == sp_entity_id && session.name_id == name_id {
                removed.push(session.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// All live sessions for a principal, across relying parties.
    #[must_use]
    pub fn sessions_for(&self, principal_id: &str) -> Vec<SpSession> {
        let mut sessions: Vec<SpSession> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().principal_id == principal_id)
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| a.sp_entity_id.cmp(&b.sp_entity_id));
        sessions
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));
        before.saturating_sub(self.sessions.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
