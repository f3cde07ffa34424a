use std::path::PathBuf;

/// Core error type for the relay pipeline.
///
/// Adapter crates map their transport errors into this type so the batch
/// orchestrator can decide, per variant, whether a failure aborts the batch,
/// is reported for the current item, or is only logged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed link: {0}")]
    LinkMalformed(String),

    #[error("no session for requester")]
    SessionMissing,

    #[error("session invalid: {0}")]
    SessionInvalid(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("message is empty or was deleted")]
    ItemEmpty,

    #[error("unsupported content kind")]
    UnsupportedKind,

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("mirror failed: {0}")]
    MirrorFailed(String),

    #[error("cleanup failed: {path}: {reason}")]
    CleanupFailed { path: PathBuf, reason: String },

    #[error("a batch is already running for this requester")]
    AlreadyRunning,

    #[error("quota exhausted")]
    QuotaExhausted,

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

/// How far a failure propagates inside a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorScope {
    /// Abort the whole batch with a user-facing instruction.
    Batch,
    /// Fail the current item only; the batch moves on to the next id.
    Item,
    /// Log only, never shown to the requester.
    Silent,
}

impl Error {
    pub fn scope(&self) -> ErrorScope {
        match self {
            Error::LinkMalformed(_)
            | Error::SessionMissing
            | Error::SessionInvalid(_)
            | Error::AlreadyRunning
            | Error::QuotaExhausted
            | Error::Config(_) => ErrorScope::Batch,
            Error::MirrorFailed(_) | Error::CleanupFailed { .. } => ErrorScope::Silent,
            Error::SourceUnavailable(_)
            | Error::ItemEmpty
            | Error::UnsupportedKind
            | Error::TransferFailed(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::External(_) => ErrorScope::Item,
        }
    }

    /// Instruction shown to the requester when a batch-scoped error aborts a request.
    pub fn user_message(&self) -> String {
        match self {
            Error::LinkMalformed(_) => "❌ <b>Invalid link.</b>\n\nSend a post link like <code>https://t.me/channel/123</code> or a range like <code>https://t.me/channel/100-150</code>.".to_string(),
            Error::SessionMissing => "🔐 <b>For downloading restricted content you have to /login first.</b>".to_string(),
            Error::SessionInvalid(_) => "⚠️ <b>Your login session expired.</b>\n\nUse /logout first, then /login again.".to_string(),
            Error::AlreadyRunning => "⚠️ <b>One download is already in progress!</b>\n\n⏳ Please wait for it to complete or use /cancel to stop it.".to_string(),
            Error::QuotaExhausted => "❌ <b>Daily limit reached!</b>\n\nYou've used all downloads for today. Try again tomorrow.".to_string(),
            other => format!(
                "❌ <b>Error:</b> <code>{}</code>",
                crate::formatting::escape_html(&other.to_string())
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
