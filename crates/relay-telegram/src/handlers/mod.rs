//! Telegram update handlers.
//!
//! Commands are answered inline. Post links start a relay batch on its own
//! task so `/cancel` from the same chat is never queued behind it.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use crate::router::AppState;

mod commands;
mod link;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    // Relay requests are per user; anonymous senders (channels, admins-as-group) are ignored.
    if msg.from().is_none() {
        return Ok(());
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };

    if text.starts_with('/') {
        return commands::handle_command(bot, msg, state).await;
    }

    link::handle_link(msg, state).await
}
