//! SAML 2.0 Identity Provider engine for Tessera
//!
//! This crate provides:
//! - The trust store of relying parties, loaded from JSON metadata
//! - SP-initiated SSO (`AuthnRequest` processing) over HTTP-Redirect and HTTP-POST
//! - Signed, optionally encrypted, assertion issuance
//! - Single logout for the requesting relying party
//! - Replay attack prevention via a bounded request-identifier cache
//! - Aggregated startup validation

pub mod assertion_builder;
pub mod attributes;
pub mod binding;
pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod encryption;
pub mod engine;
pub mod error;
pub mod logout;
pub mod metadata;
pub mod replay;
pub mod request_parser;
pub mod session;
pub mod signing;
pub mod state;
pub mod trust_store;
pub mod xmldsig;

pub use assertion_builder::{Assertion, AssertionBuilder, Conditions};
pub use attributes::{AttributeReleasePolicy, ResolvedAttribute};
pub use binding::{InboundMessage, RedirectQuery};
pub use bootstrap::EngineBootstrap;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineSettings;
pub use dispatch::{
    DeliveryError, InMemoryDispatcher, MessageKind, OutboundResponse, RenderedResponse,
    ResponseDispatcher,
};
pub use engine::{LoginCredentials, ProtocolEngine};
pub use error::{BuildFailure, ConfigurationError, FailureKind, SamlError, SamlResult};
pub use replay::ReplayCache;
pub use session::{SessionRegistry, SpSession};
pub use signing::{SigningCredentials, SigningKeySlot};
pub use state::{Exchange, ExchangeKind, ExchangeReport, ExchangeState};
pub use trust_store::{
    Binding, Endpoint, EndpointKind, RelyingParty, SharedTrustStore, TrustKey, TrustStore,
};
