use std::sync::Arc;

use teloxide::prelude::*;

use relay_core::{
    domain::{ChatId, CorrelationId, MessageId, RelayRequest, UserId},
    errors::Error,
    formatting::escape_html,
    link::{classify_input, InputKind, ParsedLink},
};

use crate::router::AppState;

const NOT_A_LINK_TEXT: &str =
    "Send a Telegram post link like <code>https://t.me/channel/123</code>. Use /help for more.";

fn relay_request(user: UserId, chat_id: ChatId, message_id: MessageId, link: ParsedLink) -> RelayRequest {
    RelayRequest {
        requester: user,
        chat_id,
        reply_to: Some(message_id),
        source: link.source,
        range: link.range,
        correlation: CorrelationId::for_message(chat_id, message_id),
    }
}

fn join_reply(result: &relay_core::Result<()>) -> String {
    match result {
        Ok(()) => "✅ <b>Successfully joined!</b>\n\nYou can now send post links from this chat.".to_string(),
        Err(e @ (Error::SessionMissing | Error::SessionInvalid(_))) => e.user_message(),
        Err(e) => format!("❌ <b>Error:</b> <code>{}</code>", escape_html(&e.to_string())),
    }
}

pub async fn handle_link(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    let user = UserId(from.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);
    let message_id = MessageId(msg.id.0);
    let text = msg.text().unwrap_or("");

    match classify_input(text) {
        InputKind::Invite(invite) => {
            let result = join(&state, user, &invite).await;
            if let Err(e) = &result {
                tracing::info!(user = user.0, error = %e, "invite join failed");
            }
            reply(&state, chat_id, message_id, &join_reply(&result)).await;
        }
        InputKind::Post(Ok(link)) => {
            let req = relay_request(user, chat_id, message_id, link);
            tracing::info!(
                user = user.0,
                correlation = %req.correlation,
                items = req.range.count(),
                "relay request"
            );
            let relay = state.relay.clone();
            tokio::spawn(async move {
                // Batch-scoped failures were already reported to the requester.
                match relay.run(req).await {
                    Ok(report) => tracing::info!(?report, "relay finished"),
                    Err(e) => tracing::debug!(error = %e, "relay aborted"),
                }
            });
        }
        InputKind::Post(Err(e)) => reply(&state, chat_id, message_id, &e.user_message()).await,
        InputKind::Other => reply(&state, chat_id, message_id, NOT_A_LINK_TEXT).await,
    }
    Ok(())
}

async fn join(state: &AppState, user: UserId, invite: &str) -> relay_core::Result<()> {
    let session = state.relay.sessions().acquire(user).await?;
    let joined = session.join_chat(invite).await;
    if let Err(e) = session.close().await {
        tracing::debug!(error = %e, "session close failed");
    }
    joined
}

async fn reply(state: &AppState, chat_id: ChatId, message_id: MessageId, html: &str) {
    if let Err(e) = state.messenger.send_html(chat_id, html, Some(message_id)).await {
        tracing::warn!(chat = chat_id.0, error = %e, "reply failed");
    }
}
