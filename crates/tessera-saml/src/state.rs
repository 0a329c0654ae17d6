//! Exchange state machine and its recorded history

use crate::dispatch::OutboundResponse;
use crate::error::{FailureKind, SamlError};
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Authn,
    Logout,
}

/// State of one protocol exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    ReceivedRequest,
    Validated,
    Authenticated,
    AssertionIssued,
    SessionInvalidated,
    Dispatched,
    Failed(FailureKind),
}

impl ExchangeState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Dispatched | Self::Failed(_))
    }

    /// Whether `next` may follow this state in an exchange of `kind`.
    #[must_use]
    pub fn can_transition_to(&self, next: ExchangeState, kind: ExchangeKind) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Self::Failed(_)) {
            return true;
        }
        match (kind, self, next) {
            (_, Self::ReceivedRequest, Self::Validated) => true,
            (ExchangeKind::Authn, Self::Validated, Self::Authenticated) => true,
            (ExchangeKind::Authn, Self::Authenticated, Self::AssertionIssued) => true,
            (ExchangeKind::Authn, Self::AssertionIssued, Self::Dispatched) => true,
            (ExchangeKind::Logout, Self::Validated, Self::SessionInvalidated) => true,
            (ExchangeKind::Logout, Self::SessionInvalidated, Self::Dispatched) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReceivedRequest => f.write_str("received_request"),
            Self::Validated => f.write_str("validated"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::AssertionIssued => f.write_str("assertion_issued"),
            Self::SessionInvalidated => f.write_str("session_invalidated"),
            Self::Dispatched => f.write_str("dispatched"),
            Self::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub state: ExchangeState,
    pub at: DateTime<Utc>,
}

/// One exchange and every state it has passed through.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub id: Uuid,
    pub kind: ExchangeKind,
    history: Vec<StateChange>,
}

impl Exchange {
    #[must_use]
    pub fn start(kind: ExchangeKind, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            history: vec![StateChange {
                state: ExchangeState::ReceivedRequest,
                at,
            }],
        }
    }

    #[must_use]
    pub fn state(&self) -> ExchangeState {
        self.history
            .last()
            .map_or(ExchangeState::ReceivedRequest, |change| change.state)
    }

    #[must_use]
    pub fn history(&self) -> &[StateChange] {
        &self.history
    }

    /// Move to `next`. Illegal transitions are ignored and logged.
    pub fn advance(&mut self, next: ExchangeState, at: DateTime<Utc>) {
        let current = self.state();
        if !current.can_transition_to(next, self.kind) {
            tracing::error!(
                exchange_id = %self.id,
                from = %current,
                to = %next,
                "Illegal exchange state transition"
            );
            return;
        }
        tracing::debug!(exchange_id = %self.id, from = %current, to = %next, "Exchange state changed");
        self.history.push(StateChange { state: next, at });
    }

    pub fn fail(&mut self, error: &SamlError, at: DateTime<Utc>) {
        self.advance(ExchangeState::Failed(error.kind()), at);
    }
}

/// Outcome of an exchange as returned to the caller.
#[derive(Debug)]
pub struct ExchangeReport {
    pub exchange: Exchange,
    /// The response handed to the dispatcher, success or error status.
    pub response: Option<OutboundResponse>,
    pub error: Option<SamlError>,
}

impl ExchangeReport {
    #[must_use]
    pub fn state(&self) -> ExchangeState {
        self.exchange.state()
    }

    #[must_use]
    pub fn is_dispatched(&self) -> bool {
        self.state() == ExchangeState::Dispatched
    }

    /// Stable reason code of the failure, if the exchange failed.
    #[must_use]
    pub fn reason_code(&self) -> Option<&'static str> {
        self.error.as_ref().map(SamlError::reason_code)
    }

    /// # Errors
    ///
    /// Returns the exchange's error if it failed.
    pub fn into_result(self) -> Result<Option<OutboundResponse>, SamlError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.response),
        }
    }
}
