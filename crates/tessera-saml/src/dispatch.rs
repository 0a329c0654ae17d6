//! Outbound responses and the transport seam that delivers them.

use crate::binding::{
    encode_redirect_query, post_encode, redirect_url, render_post_form, PARAM_SAML_RESPONSE,
};
use crate::signing::SigningCredentials;
use crate::trust_store::{Binding, Endpoint};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    AuthnResponse,
    LogoutResponse,
}

impl MessageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthnResponse => "authn_response",
            Self::LogoutResponse => "logout_response",
        }
    }
}

/// A protocol response addressed to a relying-party endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundResponse {
    pub kind: MessageKind,
    pub destination: Endpoint,
    /// The response XML, before binding encoding.
    pub xml: String,
    pub relay_state: Option<String>,
    pub in_response_to: Option<String>,
    pub status: String,
}

/// What the transport sends to the user agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedResponse {
    /// HTML page that auto-submits the message to `action`
    PostForm { action: String, html: String },
    /// 302 target
    Redirect { url: String },
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Response could not be rendered: {0}")]
    Render(String),

    #[error("Transport rejected the response: {0}")]
    Rejected(String),
}

impl OutboundResponse {
    #[must_use]
    pub fn binding(&self) -> Binding {
        self.destination.binding
    }

    /// Base64 message as sent in the HTTP-POST binding.
    #[must_use]
    pub fn post_encoded(&self) -> String {
        post_encode(&self.xml)
    }

    /// Render for the destination's binding. Redirect queries are signed
    /// when `credentials` are given.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Render` if deflate or query signing fails.
    pub fn render(
        &self,
        credentials: Option<&SigningCredentials>,
    ) -> Result<RenderedResponse, DeliveryError> {
        match self.destination.binding {
            Binding::HttpPost => Ok(RenderedResponse::PostForm {
                action: self.destination.location.clone(),
                html: render_post_form(
                    &self.destination.location,
                    PARAM_SAML_RESPONSE,
                    &self.post_encoded(),
                    self.relay_state.as_deref(),
                ),
            }),
            Binding::HttpRedirect => {
                let query = encode_redirect_query(
                    PARAM_SAML_RESPONSE,
                    &self.xml,
                    self.relay_state.as_deref(),
                    credentials,
                )
                .map_err(|e| DeliveryError::Render(e.to_string()))?;
                Ok(RenderedResponse::Redirect {
                    url: redirect_url(&self.destination.location, &query),
                })
            }
        }
    }
}

/// Delivery of responses, implemented by the embedding transport.
#[async_trait]
pub trait ResponseDispatcher: Send + Sync {
    /// Deliver a response. Failures are reported, never retried.
    async fn dispatch(&self, response: &OutboundResponse) -> Result<(), DeliveryError>;
}

/// Dispatcher that keeps delivered responses in memory (for testing)
#[derive(Debug, Default)]
pub struct InMemoryDispatcher {
    delivered: RwLock<Vec<OutboundResponse>>,
    reject: AtomicBool,
}

impl InMemoryDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later delivery fail with `DeliveryError::Rejected`.
    pub fn reject_deliveries(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub async fn delivered(&self) -> Vec<OutboundResponse> {
        self.delivered.read().await.clone()
    }

    pub async fn last(&self) -> Option<OutboundResponse> {
        self.delivered.read().await.last().cloned()
    }
}

#[async_trait]
impl ResponseDispatcher for InMemoryDispatcher {
    async fn dispatch(&self, response: &OutboundResponse) -> Result<(), DeliveryError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(DeliveryError::Rejected("transport unavailable".to_string()));
        }
        self.delivered.write().await.push(response.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::status;
    use crate::xmldsig::verify_detached;
    use base64::{engine::general_purpose::STANDARD, Engine};

    fn response(binding: Binding) -> OutboundResponse {
        OutboundResponse {
            kind: MessageKind::LogoutResponse,
            destination: Endpoint {
                binding,
                location: "https://sp.example.com/slo?type=callback".into(),
                index: 0,
                is_default: true,
            },
            xml: "<samlp:LogoutResponse/>".into(),
            relay_state: Some("state-1".into()),
            in_response_to: Some("_lr1".into()),
            status: status::SUCCESS.into(),
        }
    }

    #[test]
    fn test_post_form_carries_message_and_relay_state() {
        let rendered = response(Binding::HttpPost).render(None).unwrap();
        let RenderedResponse::PostForm { action, html } = rendered else {
            panic!("expected a form");
        };
        assert_eq!(action, "https://sp.example.com/slo?type=callback");
        assert!(html.contains("name=\"SAMLResponse\""));
        assert!(html.contains(&STANDARD.encode("<samlp:LogoutResponse/>")));
        assert!(html.contains("value=\"state-1\""));
        assert!(html.contains("action=\"https://sp.example.com/slo?type=callback\""));
    }

    #[test]
    fn test_redirect_url_is_signed() {
        let creds = SigningCredentials::self_signed("idp", 1).unwrap();
        let rendered = response(Binding::HttpRedirect).render(Some(&creds)).unwrap();
        let RenderedResponse::Redirect { url } = rendered else {
            panic!("expected a redirect");
        };
        assert!(url.starts_with("https://sp.example.com/slo?type=callback&SAMLResponse="));

        let query = url.split_once("callback&").unwrap().1;
        let (signed, signature) = query.split_once("&Signature=").unwrap();
        let signature = STANDARD
            .decode(urlencoding::decode(signature).unwrap().as_bytes())
            .unwrap();
        verify_detached(
            signed.as_bytes(),
            crate::xmldsig::ALG_RSA_SHA256,
            &signature,
            creds.certificate(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_dispatcher_records_and_rejects() {
        let dispatcher = InMemoryDispatcher::new();
        dispatcher.dispatch(&response(Binding::HttpPost)).await.unwrap();
        assert_eq!(dispatcher.delivered().await.len(), 1);

        dispatcher.reject_deliveries(true);
        assert!(dispatcher.dispatch(&response(Binding::HttpPost)).await.is_err());
        assert_eq!(dispatcher.delivered().await.len(), 1);
    }
}
