use std::sync::Arc;

use teloxide::prelude::*;

use relay_core::{
    domain::{ChatId, MessageId, MessageRef, SessionToken, UserId},
    formatting::escape_html,
    messaging::port::MessagingPort,
};

use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn start_text(first_name: &str, logged_in: bool, remaining: Option<u32>, limit: u32) -> String {
    let login = if logged_in {
        "✅ Login: Yes".to_string()
    } else {
        "❌ Login: No - use /login".to_string()
    };
    let usage = match remaining {
        None => "📊 Usage: unlimited".to_string(),
        Some(left) => format!("📊 Usage: {}/{limit} downloads today", limit.saturating_sub(left)),
    };
    format!(
        "👋 <b>Welcome {}!</b>\n\n<b>📥 Content Relay Bot</b>\n\n{login}\n{usage}\n\n\
<b>Quick Start:</b>\n1. Use /login to authenticate\n2. Send any Telegram post link\n3. Get your content!\n\n\
<b>Commands:</b> use /help",
        escape_html(first_name)
    )
}

const HELP_TEXT: &str = "<b>📖 Help</b>\n\n\
Send a post link and the bot relays it to this chat.\n\n\
<b>Links:</b>\n\
• Public: <code>https://t.me/channel/123</code>\n\
• Private: <code>https://t.me/c/1234567890/123</code>\n\
• Bot chat: <code>https://t.me/b/somebot/123</code>\n\
• Invite: <code>https://t.me/+hash</code> (joins with your session)\n\n\
<b>Commands:</b>\n\
/start - status and remaining quota\n\
/batch - how to relay a range\n\
/cancel - stop the running download\n\
/login &lt;token&gt; - store your session token\n\
/logout - forget your session token";

const BATCH_TEXT: &str = "<b>📦 Batch Download Guide</b>\n\n\
Add a range to the link to relay several posts at once:\n\
<code>https://t.me/channel/100-150</code>\n\n\
<b>Notes:</b>\n\
• Posts are relayed one by one, in order\n\
• Use /cancel to stop a batch\n\
• Spaces in the range don't matter: <code>1 - 10</code> works\n\
• One batch per user at a time";

const CANCELLED_TEXT: &str = "✅ <b>Process Cancelled Successfully!</b>\n\n\
⏹️ Your download/upload is stopping.\n\n💡 You can start a new download once it has stopped.";

const NOTHING_RUNNING_TEXT: &str = "ℹ️ <b>No Active Process</b>\n\n\
⚠️ There is no download or upload running.\n\n💡 Send me a Telegram post link to start.";

pub async fn handle_command(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    let user = UserId(from.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);
    let text = msg.text().unwrap_or("");
    let (cmd, args) = parse_command(text);

    tracing::debug!(user = user.0, %cmd, "command");

    let reply = match cmd.as_str() {
        "start" => {
            let logged_in = state.store.has_session(user);
            let remaining = state.store.remaining_today(user);
            start_text(&from.first_name, logged_in, remaining, state.cfg.daily_quota)
        }
        "help" => HELP_TEXT.to_string(),
        "batch" => BATCH_TEXT.to_string(),
        "cancel" => {
            if state.relay.cancel(user) {
                CANCELLED_TEXT.to_string()
            } else {
                NOTHING_RUNNING_TEXT.to_string()
            }
        }
        "login" => login(&state, user, chat_id, MessageId(msg.id.0), &args).await,
        "logout" => match state.store.clear_session(user) {
            Ok(()) => "✅ <b>Logged out.</b>".to_string(),
            Err(e) => format!("❌ <b>Logout failed:</b> {}", escape_html(&e.to_string())),
        },
        _ => "Unknown command. Use /help".to_string(),
    };

    send(&*state.messenger, chat_id, &reply).await;
    Ok(())
}

async fn login(
    state: &AppState,
    user: UserId,
    chat_id: ChatId,
    message_id: MessageId,
    args: &str,
) -> String {
    if args.is_empty() {
        return "🔐 <b>Usage:</b> <code>/login &lt;session token&gt;</code>".to_string();
    }

    // The token should not linger in the chat history.
    if let Err(e) = state
        .messenger
        .delete_message(MessageRef {
            chat_id,
            message_id,
        })
        .await
    {
        tracing::debug!(error = %e, "login message not deleted");
    }

    if let Err(e) = state
        .store
        .set_session(user, SessionToken(args.to_string()))
    {
        return format!("❌ <b>Login failed:</b> {}", escape_html(&e.to_string()));
    }

    match state.relay.sessions().acquire(user).await {
        Ok(session) => {
            if let Err(e) = session.close().await {
                tracing::debug!(error = %e, "login session close failed");
            }
            "✅ <b>Logged in.</b>\n\nYou can now send post links from restricted chats.".to_string()
        }
        Err(e) => {
            if let Err(clear) = state.store.clear_session(user) {
                tracing::warn!(error = %clear, "rejected session token not cleared");
            }
            e.user_message()
        }
    }
}

async fn send(messenger: &dyn MessagingPort, chat_id: ChatId, html: &str) {
    if let Err(e) = messenger.send_html(chat_id, html, None).await {
        tracing::warn!(chat = chat_id.0, error = %e, "reply failed");
    }
}
