//! Collaborator ports the relay pipeline reads and writes through.
//!
//! Implementations live in adapter crates (`relay-gateway`, `relay-telegram`)
//! or beside the core (`store::FileStore`).

use std::{path::Path, path::PathBuf, sync::Arc};

use async_trait::async_trait;

use crate::{
    content::{ContentKind, MediaFile, RetrievedItem, TextSpan},
    customize::TransferSettings,
    domain::{ChatId, MessageId, MessageRef, SessionToken, SourceChat, UserId},
    Result,
};

/// Byte-progress callback: `(current, total)`.
pub type ProgressSink = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Charge one unit; `false` when the requester has nothing left today.
    async fn consume(&self, user: UserId) -> Result<bool>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, user: UserId) -> Result<TransferSettings>;
    /// Return the current index counter and increment it.
    async fn take_index(&self, user: UserId) -> Result<u64>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, user: UserId) -> Result<Option<SessionToken>>;
}

/// Opens delegated sessions acting as the requester.
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn connect(&self, token: &SessionToken) -> Result<Arc<dyn SourceSession>>;
}

/// One open delegated session, held for the duration of a batch.
#[async_trait]
pub trait SourceSession: Send + Sync {
    /// `Ok(None)` when the source does not know the id.
    async fn fetch_item(&self, chat: &SourceChat, id: i32) -> Result<Option<RetrievedItem>>;

    /// Download an attachment to `dest`, reporting byte progress.
    async fn download_media(&self, media: &MediaFile, dest: &Path, progress: ProgressSink)
        -> Result<()>;

    /// Download a small file (thumbnail) to `dest`.
    async fn download_file(&self, file_ref: &str, dest: &Path) -> Result<()>;

    /// Forward an item as-is into `to` (used for polls, which cannot be re-sent).
    async fn forward_item(&self, from: &SourceChat, id: i32, to: ChatId) -> Result<()>;

    async fn join_chat(&self, invite_link: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Caption attached to an upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Caption {
    /// Rendered by the relay; sent with HTML parse mode.
    Html(String),
    /// Source caption carried over with its own formatting spans.
    Plain { text: String, spans: Vec<TextSpan> },
}

impl Caption {
    pub fn text(&self) -> &str {
        match self {
            Caption::Html(t) => t,
            Caption::Plain { text, .. } => text,
        }
    }
}

/// One media upload, fully prepared by the transfer engine.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaUpload {
    /// Kind the upload is sent as (may differ from the source kind).
    pub kind: ContentKind,
    pub path: PathBuf,
    pub file_name: String,
    pub thumbnail: Option<PathBuf>,
    pub caption: Option<Caption>,
    pub duration: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Content delivery through the primary (bot) identity.
#[async_trait]
pub trait RelaySink: Send + Sync {
    async fn send_text(
        &self,
        to: ChatId,
        text: &str,
        spans: &[TextSpan],
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef>;

    /// Server-side copy, no download involved.
    async fn copy_message(
        &self,
        to: ChatId,
        from: &SourceChat,
        id: i32,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef>;

    async fn send_media(
        &self,
        to: ChatId,
        upload: &MediaUpload,
        reply_to: Option<MessageId>,
        progress: Option<ProgressSink>,
    ) -> Result<MessageRef>;

    /// Download a file the primary identity can see (custom thumbnails).
    async fn download_file(&self, file_ref: &str, dest: &Path) -> Result<()>;
}
