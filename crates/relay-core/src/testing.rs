//! Hand-written fakes for the ports, shared by the unit tests.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    content::{MediaFile, RetrievedItem, TextSpan},
    domain::{ChatId, MessageId, MessageRef, SessionToken, SourceChat},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::ChatAction,
    },
    ports::{MediaUpload, ProgressSink, RelaySink, SourceReader, SourceSession},
    Result,
};

static NEXT_MESSAGE_ID: AtomicI32 = AtomicI32::new(1000);

fn alloc(chat_id: ChatId) -> MessageRef {
    MessageRef {
        chat_id,
        message_id: MessageId(NEXT_MESSAGE_ID.fetch_add(1, Ordering::SeqCst)),
    }
}

#[derive(Default)]
pub struct FakeMessenger {
    sends: Mutex<Vec<(ChatId, String)>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    deletes: Mutex<Vec<MessageRef>>,
    actions: Mutex<Vec<ChatAction>>,
}

impl FakeMessenger {
    pub fn sent_html(&self) -> Vec<String> {
        self.sends.lock().unwrap().iter().map(|(_, h)| h.clone()).collect()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<ChatAction> {
        self.actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send_html(
        &self,
        chat_id: ChatId,
        html: &str,
        _reply_to: Option<MessageId>,
    ) -> Result<MessageRef> {
        self.sends.lock().unwrap().push((chat_id, html.to_string()));
        Ok(alloc(chat_id))
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.edits.lock().unwrap().push((msg, html.to_string()));
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.deletes.lock().unwrap().push(msg);
        Ok(())
    }

    async fn send_chat_action(&self, _chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.actions.lock().unwrap().push(action);
        Ok(())
    }
}

/// What the sink delivered, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Delivered {
    Text { to: ChatId, text: String },
    Copy { to: ChatId, from: SourceChat, id: i32 },
    Media { to: ChatId, upload: MediaUpload, existed: bool },
}

#[derive(Default)]
pub struct FakeSink {
    delivered: Mutex<Vec<Delivered>>,
    fail_copy: AtomicBool,
    refused_chats: Mutex<HashSet<i64>>,
    fail_media: AtomicBool,
}

impl FakeSink {
    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn media(&self) -> Vec<MediaUpload> {
        self.delivered()
            .into_iter()
            .filter_map(|d| match d {
                Delivered::Media { upload, .. } => Some(upload),
                _ => None,
            })
            .collect()
    }

    pub fn fail_copies(&self) {
        self.fail_copy.store(true, Ordering::SeqCst);
    }

    pub fn fail_uploads(&self) {
        self.fail_media.store(true, Ordering::SeqCst);
    }

    /// Every delivery into `chat` fails.
    pub fn refuse_chat(&self, chat: i64) {
        self.refused_chats.lock().unwrap().insert(chat);
    }

    fn refuses(&self, chat: ChatId) -> bool {
        self.refused_chats.lock().unwrap().contains(&chat.0)
    }
}

#[async_trait]
impl RelaySink for FakeSink {
    async fn send_text(
        &self,
        to: ChatId,
        text: &str,
        _spans: &[TextSpan],
        _reply_to: Option<MessageId>,
    ) -> Result<MessageRef> {
        self.delivered.lock().unwrap().push(Delivered::Text {
            to,
            text: text.to_string(),
        });
        Ok(alloc(to))
    }

    async fn copy_message(
        &self,
        to: ChatId,
        from: &SourceChat,
        id: i32,
        _reply_to: Option<MessageId>,
    ) -> Result<MessageRef> {
        if self.fail_copy.load(Ordering::SeqCst) || self.refuses(to) {
            return Err(Error::External("copy refused".into()));
        }
        self.delivered.lock().unwrap().push(Delivered::Copy {
            to,
            from: from.clone(),
            id,
        });
        Ok(alloc(to))
    }

    async fn send_media(
        &self,
        to: ChatId,
        upload: &MediaUpload,
        _reply_to: Option<MessageId>,
        progress: Option<ProgressSink>,
    ) -> Result<MessageRef> {
        if self.fail_media.load(Ordering::SeqCst) || self.refuses(to) {
            return Err(Error::TransferFailed("upload refused".into()));
        }
        let existed = upload.path.exists();
        if let Some(p) = progress {
            p(5, 10);
            p(10, 10);
        }
        self.delivered.lock().unwrap().push(Delivered::Media {
            to,
            upload: upload.clone(),
            existed,
        });
        Ok(alloc(to))
    }

    async fn download_file(&self, file_ref: &str, dest: &Path) -> Result<()> {
        tokio::fs::write(dest, file_ref.as_bytes()).await?;
        Ok(())
    }
}

type DownloadHook = Box<dyn Fn(i32) + Send + Sync>;

/// Source session serving a fixed set of items.
#[derive(Default)]
pub struct FakeSession {
    items: Mutex<HashMap<i32, RetrievedItem>>,
    fetched: Mutex<Vec<i32>>,
    downloads: Mutex<Vec<PathBuf>>,
    forwards: Mutex<Vec<(i32, ChatId)>>,
    joined: Mutex<Vec<String>>,
    unavailable: Mutex<HashSet<i32>>,
    on_download: Mutex<Option<DownloadHook>>,
    closed: AtomicUsize,
}

impl FakeSession {
    pub fn with_items(items: impl IntoIterator<Item = RetrievedItem>) -> Self {
        let s = Self::default();
        {
            let mut map = s.items.lock().unwrap();
            for item in items {
                map.insert(item.id, item);
            }
        }
        s
    }

    pub fn make_unavailable(&self, id: i32) {
        self.unavailable.lock().unwrap().insert(id);
    }

    /// Run `hook(item_id)` while a download for that item is in flight.
    pub fn on_download(&self, hook: impl Fn(i32) + Send + Sync + 'static) {
        *self.on_download.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn fetched(&self) -> Vec<i32> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn downloads(&self) -> Vec<PathBuf> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn forwards(&self) -> Vec<(i32, ChatId)> {
        self.forwards.lock().unwrap().clone()
    }

    pub fn joined(&self) -> Vec<String> {
        self.joined.lock().unwrap().clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn item_of(&self, media: &MediaFile) -> Option<i32> {
        self.items
            .lock()
            .unwrap()
            .values()
            .find(|i| {
                [&i.document, &i.video, &i.animation, &i.sticker, &i.voice, &i.audio, &i.photo]
                    .iter()
                    .any(|m| m.as_ref().is_some_and(|m| m.file_ref == media.file_ref))
            })
            .map(|i| i.id)
    }
}

#[async_trait]
impl SourceSession for FakeSession {
    async fn fetch_item(&self, _chat: &SourceChat, id: i32) -> Result<Option<RetrievedItem>> {
        self.fetched.lock().unwrap().push(id);
        if self.unavailable.lock().unwrap().contains(&id) {
            return Err(Error::SourceUnavailable(format!("no access to {id}")));
        }
        Ok(self.items.lock().unwrap().get(&id).cloned())
    }

    async fn download_media(
        &self,
        media: &MediaFile,
        dest: &Path,
        progress: ProgressSink,
    ) -> Result<()> {
        tokio::fs::write(dest, b"0123456789").await?;
        self.downloads.lock().unwrap().push(dest.to_path_buf());
        progress(5, 10);
        if let Some(id) = self.item_of(media) {
            if let Some(hook) = self.on_download.lock().unwrap().as_ref() {
                hook(id);
            }
        }
        progress(10, 10);
        Ok(())
    }

    async fn download_file(&self, file_ref: &str, dest: &Path) -> Result<()> {
        tokio::fs::write(dest, file_ref.as_bytes()).await?;
        self.downloads.lock().unwrap().push(dest.to_path_buf());
        Ok(())
    }

    async fn forward_item(&self, _from: &SourceChat, id: i32, to: ChatId) -> Result<()> {
        self.forwards.lock().unwrap().push((id, to));
        Ok(())
    }

    async fn join_chat(&self, invite_link: &str) -> Result<()> {
        self.joined.lock().unwrap().push(invite_link.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeReader {
    session: Mutex<Option<Arc<FakeSession>>>,
    reject: AtomicBool,
    connects: AtomicUsize,
}

impl FakeReader {
    pub fn serving(session: Arc<FakeSession>) -> Self {
        Self {
            session: Mutex::new(Some(session)),
            ..Default::default()
        }
    }

    pub fn reject_connect(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceReader for FakeReader {
    async fn connect(&self, _token: &SessionToken) -> Result<Arc<dyn SourceSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Err(Error::External("AUTH_KEY_UNREGISTERED".into()));
        }
        let session: Arc<dyn SourceSession> =
            self.session.lock().unwrap().clone().unwrap_or_default();
        Ok(session)
    }
}

pub fn media_item(id: i32, kind: crate::content::ContentKind, name: &str) -> RetrievedItem {
    use crate::content::ContentKind as K;

    let media = Some(MediaFile {
        file_ref: format!("file-{id}"),
        file_name: Some(name.to_string()),
        size: Some(10),
        thumbs: vec![format!("thumb-{id}")],
        ..Default::default()
    });
    let mut item = RetrievedItem {
        id,
        caption: Some(format!("caption {id}")),
        ..Default::default()
    };
    match kind {
        K::Document => item.document = media,
        K::Video => item.video = media,
        K::Animation => item.animation = media,
        K::Sticker => item.sticker = media,
        K::Voice => item.voice = media,
        K::Audio => item.audio = media,
        K::Photo => item.photo = media,
        K::Text => item.text = Some(name.to_string()),
        K::Poll => item.poll = Some(serde_json::json!({"question": name})),
    }
    item
}
