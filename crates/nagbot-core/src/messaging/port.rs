use async_trait::async_trait;

use crate::{domain::ChatId, messaging::types::MessagingCapabilities, Result};

/// Cross-messenger port.
///
/// Telegram is the first implementation; the shape is designed so future
/// adapters (Slack/Discord/WhatsApp) can fit behind the same interface.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()>;
}
