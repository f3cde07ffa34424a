use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    messaging::types::ChatAction,
    Result,
};

/// Text messaging port for the primary identity.
///
/// Everything the relay says to the requester on its own behalf (status
/// messages, progress edits, error replies, summaries) goes through here.
/// Relayed content itself goes through [`crate::ports::RelaySink`].
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_html(
        &self,
        chat_id: ChatId,
        html: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef>;
    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()>;
    async fn delete_message(&self, msg: MessageRef) -> Result<()>;

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()>;
}
