//! Per-item transfer: fetch, classify, download, customize, relay, mirror, clean up.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio_util::sync::CancellationToken;

use crate::{
    cleanup::{CleanupPolicy, StatusLedger, TransientFiles},
    config::RelayTuning,
    content::{classify, CaptionPolicy, ContentKind, KindPolicy, MediaFile, RetrievedItem, TextSpan, ThumbnailPolicy},
    customize::{apply_suffix, render_caption, replace_words, TransferSettings},
    domain::{ChatId, MessageRef, RelayRequest, SourceChat},
    errors::Error,
    formatting::escape_html,
    messaging::port::MessagingPort,
    ports::{Caption, MediaUpload, RelaySink, SettingsStore, SourceSession},
    progress::{spawn_reflector, Phase, ProgressMonitor, ReflectTiming, StatusKey},
    utils::sanitize_file_name,
    Result,
};

const STATUS_INITIAL: &str = "📥 <b>Downloading...</b>";

/// How one id ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    Relayed(ContentKind),
    /// Delivered by a server-side copy; the kind was never inspected.
    Copied,
    /// Nothing relayable at this id.
    Skipped,
    /// Cancellation observed after download; nothing was relayed.
    Cancelled,
}

/// Everything one item needs from its batch.
pub struct ItemContext<'a> {
    pub request: &'a RelayRequest,
    pub source: &'a SourceChat,
    pub session: &'a dyn SourceSession,
    pub cancel: &'a CancellationToken,
}

/// A classified item plus the policy that drives its transfer.
pub struct Relayable<'a> {
    item: &'a RetrievedItem,
    kind: ContentKind,
    policy: KindPolicy,
}

impl<'a> Relayable<'a> {
    pub fn new(item: &'a RetrievedItem) -> Option<Self> {
        let kind = classify(item)?;
        Some(Self {
            item,
            kind,
            policy: kind.policy(),
        })
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn policy(&self) -> KindPolicy {
        self.policy
    }

    pub fn media(&self) -> Option<&'a MediaFile> {
        self.item.media(self.kind)
    }

    /// File name as the source reports it, if any.
    pub fn source_name(&self) -> Option<String> {
        self.media()
            .and_then(|m| m.file_name.clone())
            .filter(|name| !name.trim().is_empty())
    }

    /// Source file name, or a kind-based stand-in used for local paths and uploads.
    pub fn file_name(&self) -> String {
        if let Some(name) = self.source_name() {
            return name;
        }
        let ext = match self.kind {
            ContentKind::Video | ContentKind::Animation => ".mp4",
            ContentKind::Audio => ".mp3",
            ContentKind::Voice => ".ogg",
            ContentKind::Sticker => ".webp",
            ContentKind::Photo => ".jpg",
            _ => "",
        };
        format!("{}_{}{ext}", self.kind.label(), self.item.id)
    }

    pub fn caption(&self) -> Option<&'a str> {
        self.item.caption.as_deref().filter(|c| !c.is_empty())
    }

    pub fn caption_spans(&self) -> &'a [TextSpan] {
        &self.item.caption_entities
    }

    /// Source name after filename word replacement and suffix.
    ///
    /// `None` when the source has no name; stand-in names are never rewritten.
    pub fn target_name(&self, settings: &TransferSettings) -> Option<String> {
        let name = self.source_name()?;
        if !self.policy.suffix {
            return Some(name);
        }
        let replaced = replace_words(&name, settings.replace_filename_words.as_deref());
        Some(apply_suffix(&replaced, settings.filename_suffix.as_deref()))
    }
}

pub struct TransferEngine {
    messenger: Arc<dyn MessagingPort>,
    sink: Arc<dyn RelaySink>,
    settings: Arc<dyn SettingsStore>,
    monitor: Arc<ProgressMonitor>,
    ledger: Arc<StatusLedger>,
    tuning: RelayTuning,
}

impl TransferEngine {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        sink: Arc<dyn RelaySink>,
        settings: Arc<dyn SettingsStore>,
        monitor: Arc<ProgressMonitor>,
        ledger: Arc<StatusLedger>,
        tuning: RelayTuning,
    ) -> Self {
        Self {
            messenger,
            sink,
            settings,
            monitor,
            ledger,
            tuning,
        }
    }

    pub fn sink(&self) -> &Arc<dyn RelaySink> {
        &self.sink
    }

    /// Fetch one id from the source and relay it to the requester.
    pub async fn process(&self, ctx: &ItemContext<'_>, id: i32) -> Result<ItemOutcome> {
        let item = ctx
            .session
            .fetch_item(ctx.source, id)
            .await?
            .ok_or(Error::ItemEmpty)?;
        if item.empty {
            return Err(Error::ItemEmpty);
        }

        let Some(relayable) = Relayable::new(&item) else {
            tracing::debug!(item = id, "nothing relayable");
            return Ok(ItemOutcome::Skipped);
        };

        let settings = self.settings.get(ctx.request.requester).await?;
        if relayable.policy().needs_download {
            self.relay_media(ctx, &relayable, &settings).await
        } else {
            self.relay_inline(ctx, &relayable, &settings).await
        }
    }

    async fn relay_inline(
        &self,
        ctx: &ItemContext<'_>,
        rel: &Relayable<'_>,
        settings: &TransferSettings,
    ) -> Result<ItemOutcome> {
        let req = ctx.request;
        let mirror = settings.wants_mirror(rel.kind());

        match rel.kind() {
            ContentKind::Text => {
                let text = rel.item.text.as_deref().unwrap_or_default();
                let sent = self
                    .sink
                    .send_text(req.chat_id, text, &rel.item.entities, req.reply_to)
                    .await?;
                if let Some(dest) = mirror {
                    self.mirror(sent, dest).await;
                }
            }
            ContentKind::Poll => {
                ctx.session
                    .forward_item(ctx.source, rel.item.id, req.chat_id)
                    .await?;
                if let Some(dest) = mirror {
                    if let Err(e) = ctx
                        .session
                        .forward_item(ctx.source, rel.item.id, ChatId(dest))
                        .await
                    {
                        let e = Error::MirrorFailed(e.to_string());
                        tracing::warn!(destination = dest, error = %e, "mirror skipped");
                    }
                }
            }
            _ => return Err(Error::UnsupportedKind),
        }

        Ok(ItemOutcome::Relayed(rel.kind()))
    }

    async fn relay_media(
        &self,
        ctx: &ItemContext<'_>,
        rel: &Relayable<'_>,
        settings: &TransferSettings,
    ) -> Result<ItemOutcome> {
        let status = self
            .messenger
            .send_html(ctx.request.chat_id, STATUS_INITIAL, ctx.request.reply_to)
            .await?;
        self.ledger.record(status);

        let mut files = TransientFiles::new(CleanupPolicy::from(&self.tuning));
        let outcome = self.media_steps(ctx, rel, settings, status, &mut files).await;
        files.release().await;

        if let Err(e) = self.messenger.delete_message(status).await {
            tracing::debug!(error = %e, "status message not deleted");
        }
        self.ledger.forget(status);

        outcome
    }

    async fn media_steps(
        &self,
        ctx: &ItemContext<'_>,
        rel: &Relayable<'_>,
        settings: &TransferSettings,
        status: MessageRef,
        files: &mut TransientFiles,
    ) -> Result<ItemOutcome> {
        let req = ctx.request;
        let media = rel.media().ok_or(Error::UnsupportedKind)?;
        let prefix = format!(
            "{}-{}",
            sanitize_file_name(&req.correlation.0),
            rel.item.id
        );

        let downloaded = self.transient_path(&prefix, &rel.file_name());
        files.track(&downloaded);
        self.download(ctx, rel, media, &downloaded, status).await?;

        let target_name = rel.target_name(settings);
        let file_name = target_name.clone().unwrap_or_else(|| rel.file_name());
        let path = if file_name != rel.file_name() {
            let renamed = self.transient_path(&prefix, &file_name);
            tokio::fs::rename(&downloaded, &renamed).await?;
            files.retrack(&downloaded, &renamed);
            renamed
        } else {
            downloaded
        };

        let thumbnail = self.thumbnail(ctx, rel, media, settings, &prefix, files).await;
        let caption = self
            .caption(rel, settings, target_name.as_deref().unwrap_or_default(), req)
            .await?;

        if ctx.cancel.is_cancelled() {
            tracing::info!(item = rel.item.id, "cancelled after download");
            return Ok(ItemOutcome::Cancelled);
        }

        let upload = MediaUpload {
            kind: if settings.send_as_document && rel.kind().can_send_as_document() {
                ContentKind::Document
            } else {
                rel.kind()
            },
            path,
            file_name,
            thumbnail,
            caption,
            duration: media.duration,
            width: media.width,
            height: media.height,
        };

        let sent = self.upload(ctx, rel, &upload, status).await?;
        if let Some(dest) = settings.wants_mirror(rel.kind()) {
            self.mirror(sent, dest).await;
        }

        Ok(ItemOutcome::Relayed(rel.kind()))
    }

    fn transient_path(&self, prefix: &str, name: &str) -> PathBuf {
        self.tuning
            .download_dir
            .join(format!("{prefix}-{}", sanitize_file_name(name)))
    }

    fn status_key(&self, req: &RelayRequest, item: i32, phase: Phase) -> StatusKey {
        StatusKey {
            correlation: req.correlation.clone(),
            item,
            phase,
        }
    }

    fn reflect_timing(&self) -> ReflectTiming {
        ReflectTiming {
            refresh: self.tuning.status_refresh,
            retry: self.tuning.status_retry,
        }
    }

    async fn download(
        &self,
        ctx: &ItemContext<'_>,
        rel: &Relayable<'_>,
        media: &MediaFile,
        dest: &Path,
        status: MessageRef,
    ) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let key = self.status_key(ctx.request, rel.item.id, Phase::Download);
        let reflector = spawn_reflector(
            self.monitor.hub(),
            &key,
            self.messenger.clone(),
            status,
            self.reflect_timing(),
        );
        let result = ctx
            .session
            .download_media(media, dest, self.monitor.sink(key.clone()))
            .await;
        self.monitor.discard(&key);
        reflector.stop().await;

        result.map_err(|e| match e {
            kept @ (Error::TransferFailed(_) | Error::SourceUnavailable(_)) => kept,
            other => Error::TransferFailed(format!("download: {other}")),
        })
    }

    async fn upload(
        &self,
        ctx: &ItemContext<'_>,
        rel: &Relayable<'_>,
        upload: &MediaUpload,
        status: MessageRef,
    ) -> Result<MessageRef> {
        let req = ctx.request;
        let key = self.status_key(req, rel.item.id, Phase::Upload);
        let reflector = spawn_reflector(
            self.monitor.hub(),
            &key,
            self.messenger.clone(),
            status,
            self.reflect_timing(),
        );

        if let Err(e) = self
            .messenger
            .send_chat_action(req.chat_id, rel.policy().chat_action)
            .await
        {
            tracing::debug!(error = %e, "chat action failed");
        }

        let result = self
            .sink
            .send_media(
                req.chat_id,
                upload,
                req.reply_to,
                Some(self.monitor.sink(key.clone())),
            )
            .await;
        self.monitor.discard(&key);
        reflector.stop().await;

        result.map_err(|e| match e {
            kept @ Error::TransferFailed(_) => kept,
            other => Error::TransferFailed(format!("upload: {other}")),
        })
    }

    /// Resolve the thumbnail for this kind. Failures fall back to no thumbnail.
    async fn thumbnail(
        &self,
        ctx: &ItemContext<'_>,
        rel: &Relayable<'_>,
        media: &MediaFile,
        settings: &TransferSettings,
        prefix: &str,
        files: &mut TransientFiles,
    ) -> Option<PathBuf> {
        let policy = rel.policy().thumbnail;
        let custom = match policy {
            ThumbnailPolicy::None => return None,
            ThumbnailPolicy::NativeOnly => None,
            ThumbnailPolicy::CustomOrNative => settings.custom_thumbnail.as_deref(),
        };

        let dest = self.transient_path(prefix, "thumb.jpg");
        let fetched = match (custom, media.thumbs.first()) {
            (Some(file_ref), _) => self.sink.download_file(file_ref, &dest).await,
            (None, Some(native)) => ctx.session.download_file(native, &dest).await,
            (None, None) => return None,
        };

        match fetched {
            Ok(()) => {
                files.track(&dest);
                Some(dest)
            }
            Err(e) => {
                tracing::debug!(item = rel.item.id, error = %e, "thumbnail unavailable");
                // A failed fetch may still have left a partial file.
                if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
                    files.track(&dest);
                }
                None
            }
        }
    }

    /// `file_name` is the rewritten source name, empty when the source has none.
    async fn caption(
        &self,
        rel: &Relayable<'_>,
        settings: &TransferSettings,
        file_name: &str,
        req: &RelayRequest,
    ) -> Result<Option<Caption>> {
        match rel.policy().caption {
            CaptionPolicy::Drop => Ok(None),
            CaptionPolicy::Passthrough => Ok(rel.caption().map(|text| Caption::Plain {
                text: text.to_string(),
                spans: rel.caption_spans().to_vec(),
            })),
            CaptionPolicy::Template => {
                let original = rel
                    .caption()
                    .map(|c| replace_words(c, settings.replace_caption_words.as_deref()))
                    .unwrap_or_default();

                let Some(template) = settings.caption_template.as_deref().filter(|t| !t.is_empty())
                else {
                    return Ok((!original.is_empty()).then(|| Caption::Html(escape_html(&original))));
                };

                let index = self.settings.take_index(req.requester).await?;
                let shown_name = rel.policy().fixed_name.unwrap_or(file_name);
                Ok(Some(Caption::Html(render_caption(
                    template,
                    &escape_html(&original),
                    &escape_html(shown_name),
                    index,
                ))))
            }
        }
    }

    /// Copy a delivered message into the mirror destination; failures are logged only.
    async fn mirror(&self, sent: MessageRef, dest: i64) {
        let from = SourceChat::Id(sent.chat_id.0);
        if let Err(e) = self
            .sink
            .copy_message(ChatId(dest), &from, sent.message_id.0, None)
            .await
        {
            let e = Error::MirrorFailed(e.to_string());
            tracing::warn!(destination = dest, error = %e, "mirror skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CorrelationId, IdRange, MessageId, SourceRef, UserId};
    use crate::progress::ProgressHub;
    use crate::store::FileStore;
    use crate::testing::{media_item, Delivered, FakeMessenger, FakeSession, FakeSink};
    use crate::utils::tmp_path;
    use std::time::Duration;

    struct Harness {
        engine: TransferEngine,
        messenger: Arc<FakeMessenger>,
        sink: Arc<FakeSink>,
        store: Arc<FileStore>,
        ledger: Arc<StatusLedger>,
        dir: PathBuf,
    }

    fn harness() -> Harness {
        harness_tuned(|_| {})
    }

    fn harness_tuned(tune: impl FnOnce(&mut RelayTuning)) -> Harness {
        let dir = tmp_path("relay-transfer");
        let messenger = Arc::new(FakeMessenger::default());
        let sink = Arc::new(FakeSink::default());
        let store = Arc::new(FileStore::in_memory(0));
        let ledger = Arc::new(StatusLedger::in_memory());
        let mut tuning = RelayTuning {
            item_delay: Duration::ZERO,
            cleanup_settle: Duration::ZERO,
            cleanup_backoff: Duration::from_millis(1),
            status_refresh: Duration::from_millis(5),
            status_retry: Duration::from_millis(5),
            download_dir: dir.clone(),
            ..Default::default()
        };
        tune(&mut tuning);
        let monitor = Arc::new(ProgressMonitor::new(
            Arc::new(ProgressHub::new()),
            Duration::from_millis(1),
        ));
        let engine = TransferEngine::new(
            messenger.clone(),
            sink.clone(),
            store.clone(),
            monitor,
            ledger.clone(),
            tuning,
        );
        Harness {
            engine,
            messenger,
            sink,
            store,
            ledger,
            dir,
        }
    }

    fn request() -> RelayRequest {
        RelayRequest {
            requester: UserId(42),
            chat_id: ChatId(42),
            reply_to: Some(MessageId(1)),
            source: SourceRef::Private(555),
            range: IdRange::single(10),
            correlation: CorrelationId("42:1".into()),
        }
    }

    fn leftover_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    async fn run(h: &Harness, session: &FakeSession, cancel: &CancellationToken, id: i32) -> Result<ItemOutcome> {
        let req = request();
        let source = req.source.resolve();
        let ctx = ItemContext {
            request: &req,
            source: &source,
            session,
            cancel,
        };
        h.engine.process(&ctx, id).await
    }

    #[tokio::test]
    async fn document_gets_suffix_thumbnail_and_template_caption() {
        let h = harness();
        h.store
            .update_settings(UserId(42), |s| {
                s.filename_suffix = Some("HD".into());
                s.caption_template = Some("{filename} | {IndexCount}".into());
            })
            .unwrap();
        for _ in 0..3 {
            h.store.take_index(UserId(42)).await.unwrap();
        }
        let session = FakeSession::with_items([media_item(10, ContentKind::Document, "clip.mp4")]);

        let outcome = run(&h, &session, &CancellationToken::new(), 10).await.unwrap();
        assert_eq!(outcome, ItemOutcome::Relayed(ContentKind::Document));

        let media = h.sink.media();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].file_name, "clip HD .mp4");
        assert_eq!(
            media[0].caption,
            Some(Caption::Html("clip HD .mp4 | 3".into()))
        );
        assert!(media[0].thumbnail.is_some());
        assert_eq!(h.store.take_index(UserId(42)).await.unwrap(), 4);

        assert!(matches!(
            h.sink.delivered()[0],
            Delivered::Media { existed: true, .. }
        ));
        assert_eq!(leftover_files(&h.dir), 0);
        assert_eq!(h.messenger.deleted().len(), 1);
        assert!(h.ledger.live().is_empty());
    }

    #[tokio::test]
    async fn template_index_uses_filename_from_source() {
        let h = harness();
        h.store
            .update_settings(UserId(42), |s| {
                s.caption_template = Some("{filename} | {IndexCount}".into())
            })
            .unwrap();
        for _ in 0..3 {
            h.store.take_index(UserId(42)).await.unwrap();
        }
        let session = FakeSession::with_items([media_item(10, ContentKind::Video, "clip.mp4")]);

        run(&h, &session, &CancellationToken::new(), 10).await.unwrap();
        assert_eq!(
            h.sink.media()[0].caption,
            Some(Caption::Html("clip.mp4 | 3".into()))
        );
        assert_eq!(h.store.take_index(UserId(42)).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn unnamed_source_file_is_not_suffixed() {
        let h = harness();
        h.store
            .update_settings(UserId(42), |s| {
                s.filename_suffix = Some("HD".into());
                s.caption_template = Some("[{filename}]".into());
            })
            .unwrap();
        let mut item = media_item(10, ContentKind::Video, "unused");
        if let Some(video) = item.video.as_mut() {
            video.file_name = None;
        }
        let session = FakeSession::with_items([item]);

        run(&h, &session, &CancellationToken::new(), 10).await.unwrap();

        let media = h.sink.media();
        assert_eq!(media[0].file_name, "video_10.mp4");
        assert_eq!(media[0].caption, Some(Caption::Html("[]".into())));
        assert_eq!(leftover_files(&h.dir), 0);
    }

    #[tokio::test]
    async fn photo_template_uses_fixed_name() {
        let h = harness();
        h.store
            .update_settings(UserId(42), |s| s.caption_template = Some("{filename}".into()))
            .unwrap();
        let session = FakeSession::with_items([media_item(10, ContentKind::Photo, "p.jpg")]);

        run(&h, &session, &CancellationToken::new(), 10).await.unwrap();
        assert_eq!(h.sink.media()[0].caption, Some(Caption::Html("photo".into())));
    }

    #[tokio::test]
    async fn word_replacement_rewrites_name_and_templated_caption() {
        let h = harness();
        h.store
            .update_settings(UserId(42), |s| {
                s.replace_filename_words = Some("clip:movie".into());
                s.replace_caption_words = Some("caption:note|10:ten".into());
                s.filename_suffix = Some("HD".into());
                s.caption_template = Some("{caption} / {filename}".into());
            })
            .unwrap();
        let session = FakeSession::with_items([media_item(10, ContentKind::Document, "clip.mp4")]);

        run(&h, &session, &CancellationToken::new(), 10).await.unwrap();

        let media = h.sink.media();
        assert_eq!(media[0].file_name, "movie HD .mp4");
        assert_eq!(
            media[0].caption,
            Some(Caption::Html("note ten / movie HD .mp4".into()))
        );
    }

    #[tokio::test]
    async fn single_file_item_settles_once() {
        let h = harness_tuned(|t| t.cleanup_settle = Duration::from_millis(300));
        let mut item = media_item(10, ContentKind::Document, "a.pdf");
        if let Some(doc) = item.document.as_mut() {
            doc.thumbs.clear();
        }
        let session = FakeSession::with_items([item]);

        let started = std::time::Instant::now();
        run(&h, &session, &CancellationToken::new(), 10).await.unwrap();
        let elapsed = started.elapsed();

        assert!(h.sink.media()[0].thumbnail.is_none());
        assert!(elapsed < Duration::from_millis(550), "{elapsed:?}");
        assert_eq!(leftover_files(&h.dir), 0);
    }

    #[tokio::test]
    async fn custom_thumbnail_comes_from_primary_identity() {
        let h = harness();
        h.store
            .update_settings(UserId(42), |s| s.custom_thumbnail = Some("custom-thumb".into()))
            .unwrap();
        let session = FakeSession::with_items([media_item(10, ContentKind::Video, "clip.mp4")]);

        run(&h, &session, &CancellationToken::new(), 10).await.unwrap();
        // Only the media itself went through the delegated session.
        assert_eq!(session.downloads().len(), 1);
        assert!(h.sink.media()[0].thumbnail.is_some());
    }

    #[tokio::test]
    async fn audio_ignores_custom_thumbnail_and_sticker_drops_caption() {
        let h = harness();
        h.store
            .update_settings(UserId(42), |s| s.custom_thumbnail = Some("custom-thumb".into()))
            .unwrap();
        let session = FakeSession::with_items([
            media_item(10, ContentKind::Audio, "song.mp3"),
            media_item(11, ContentKind::Sticker, "s.webp"),
        ]);

        run(&h, &session, &CancellationToken::new(), 10).await.unwrap();
        run(&h, &session, &CancellationToken::new(), 11).await.unwrap();

        // audio: media + native thumb; sticker: media only
        assert_eq!(session.downloads().len(), 3);
        let media = h.sink.media();
        assert_eq!(media[0].caption, Some(Caption::Html("caption 10".into())));
        assert_eq!(media[1].caption, None);
        assert_eq!(media[1].thumbnail, None);
    }

    #[tokio::test]
    async fn send_as_document_rewrites_upload_kind() {
        let h = harness();
        h.store
            .update_settings(UserId(42), |s| s.send_as_document = true)
            .unwrap();
        let session = FakeSession::with_items([
            media_item(10, ContentKind::Video, "clip.mp4"),
            media_item(11, ContentKind::Voice, "v.ogg"),
        ]);

        run(&h, &session, &CancellationToken::new(), 10).await.unwrap();
        run(&h, &session, &CancellationToken::new(), 11).await.unwrap();
        let media = h.sink.media();
        assert_eq!(media[0].kind, ContentKind::Document);
        assert_eq!(media[1].kind, ContentKind::Voice);
    }

    #[tokio::test]
    async fn cancellation_after_download_skips_relay_and_cleans_up() {
        let h = harness();
        let cancel = CancellationToken::new();
        let session = FakeSession::with_items([media_item(10, ContentKind::Video, "clip.mp4")]);
        let trip = cancel.clone();
        session.on_download(move |_| trip.cancel());

        let outcome = run(&h, &session, &cancel, 10).await.unwrap();
        assert_eq!(outcome, ItemOutcome::Cancelled);
        assert!(h.sink.delivered().is_empty());
        assert_eq!(leftover_files(&h.dir), 0);
        assert_eq!(h.messenger.deleted().len(), 1);
    }

    #[tokio::test]
    async fn failed_upload_still_removes_transient_files() {
        let h = harness();
        h.sink.fail_uploads();
        let session = FakeSession::with_items([media_item(10, ContentKind::Document, "a.pdf")]);

        let err = run(&h, &session, &CancellationToken::new(), 10).await.unwrap_err();
        assert!(matches!(err, Error::TransferFailed(_)));
        assert_eq!(leftover_files(&h.dir), 0);
        assert!(h.ledger.live().is_empty());
    }

    #[tokio::test]
    async fn mirror_failure_is_swallowed() {
        let h = harness();
        h.store
            .update_settings(UserId(42), |s| s.mirror_destination = Some(-100777))
            .unwrap();
        h.sink.refuse_chat(-100777);
        let session = FakeSession::with_items([media_item(10, ContentKind::Photo, "p.jpg")]);

        let outcome = run(&h, &session, &CancellationToken::new(), 10).await.unwrap();
        assert_eq!(outcome, ItemOutcome::Relayed(ContentKind::Photo));
        assert_eq!(h.sink.media().len(), 1);
    }

    #[tokio::test]
    async fn mirror_follows_kind_filter() {
        let h = harness();
        h.store
            .update_settings(UserId(42), |s| {
                s.mirror_destination = Some(-100777);
                s.filters.text = false;
            })
            .unwrap();
        let session = FakeSession::with_items([
            media_item(10, ContentKind::Text, "hello"),
            media_item(11, ContentKind::Photo, "p.jpg"),
        ]);

        run(&h, &session, &CancellationToken::new(), 10).await.unwrap();
        run(&h, &session, &CancellationToken::new(), 11).await.unwrap();

        let copies: Vec<_> = h
            .sink
            .delivered()
            .into_iter()
            .filter(|d| matches!(d, Delivered::Copy { .. }))
            .collect();
        assert_eq!(copies.len(), 1);
        assert!(matches!(copies[0], Delivered::Copy { to: ChatId(-100777), .. }));
    }

    #[tokio::test]
    async fn text_is_resent_and_poll_is_forwarded() {
        let h = harness();
        let session = FakeSession::with_items([
            media_item(10, ContentKind::Text, "hello"),
            media_item(11, ContentKind::Poll, "q?"),
        ]);

        run(&h, &session, &CancellationToken::new(), 10).await.unwrap();
        run(&h, &session, &CancellationToken::new(), 11).await.unwrap();

        assert_eq!(
            h.sink.delivered(),
            vec![Delivered::Text {
                to: ChatId(42),
                text: "hello".into()
            }]
        );
        assert_eq!(session.forwards(), vec![(11, ChatId(42))]);
        assert!(h.messenger.sent_html().is_empty());
    }

    #[tokio::test]
    async fn missing_and_unclassifiable_items() {
        let h = harness();
        let session = FakeSession::with_items([RetrievedItem {
            id: 11,
            ..Default::default()
        }]);

        let err = run(&h, &session, &CancellationToken::new(), 10).await.unwrap_err();
        assert!(matches!(err, Error::ItemEmpty));
        let outcome = run(&h, &session, &CancellationToken::new(), 11).await.unwrap();
        assert_eq!(outcome, ItemOutcome::Skipped);
    }
}
