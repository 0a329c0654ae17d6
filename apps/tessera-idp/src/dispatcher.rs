//! Dispatcher used when no transport is attached: responses are rendered
//! for their binding and logged.

use async_trait::async_trait;
use tessera_saml::{
    DeliveryError, OutboundResponse, RenderedResponse, ResponseDispatcher, SigningKeySlot,
};

#[derive(Debug, Default)]
pub struct LoggingDispatcher {
    /// Signs HTTP-Redirect queries. Shared with the engine, so rotation
    /// applies here too.
    signing: SigningKeySlot,
}

impl LoggingDispatcher {
    #[must_use]
    pub fn new(signing: SigningKeySlot) -> Self {
        Self { signing }
    }

    /// Render with the credentials currently in the slot.
    fn render(&self, response: &OutboundResponse) -> Result<RenderedResponse, DeliveryError> {
        let credentials = self.signing.load();
        response.render(credentials.as_deref())
    }
}

#[async_trait]
impl ResponseDispatcher for LoggingDispatcher {
    async fn dispatch(&self, response: &OutboundResponse) -> Result<(), DeliveryError> {
        let (binding, target, size) = match self.render(response)? {
            RenderedResponse::PostForm { action, html } => ("post", action, html.len()),
            RenderedResponse::Redirect { url } => ("redirect", url, 0),
        };
        tracing::info!(
            kind = response.kind.as_str(),
            binding,
            target = %target,
            form_bytes = size,
            in_response_to = response.in_response_to.as_deref().unwrap_or(""),
            status = %response.status,
            "Response rendered for delivery"
        );
        Ok(())
    }
}
