use async_trait::async_trait;

use crate::{
    domain::{DestinationId, MessageRef},
    messaging::types::{MessagingCapabilities, OutboundMessage},
    Result,
};

/// Messenger port used by fan-out and command replies.
///
/// Telegram is the only implementation; tests use in-memory fakes.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    /// Send a full outbound message (HTML body, optional link button, preview flag).
    async fn send(&self, to: &DestinationId, msg: &OutboundMessage) -> Result<MessageRef>;

    /// Plain HTML reply without a button.
    async fn send_html(&self, to: &DestinationId, html: &str) -> Result<MessageRef> {
        self.send(to, &OutboundMessage::html(html)).await
    }
}
