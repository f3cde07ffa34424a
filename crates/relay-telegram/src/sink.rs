//! RelaySink over the Bot API: re-sends, server-side copies, uploads, downloads.

use std::path::Path;

use async_trait::async_trait;
use teloxide::{
    net::Download,
    prelude::*,
    types::{InputFile, MessageEntity, MessageEntityKind, ParseMode, Recipient},
};

use relay_core::{
    content::{ContentKind, SpanKind, TextSpan},
    domain::{ChatId, MessageId, MessageRef, SourceChat},
    errors::Error,
    ports::{Caption, MediaUpload, ProgressSink, RelaySink},
    Result,
};

use crate::TelegramMessenger;

/// Bot API form of a span; `None` for kinds this API version cannot express.
pub(crate) fn to_entity(span: &TextSpan) -> Option<MessageEntity> {
    let kind = match &span.kind {
        SpanKind::Bold => MessageEntityKind::Bold,
        SpanKind::Italic => MessageEntityKind::Italic,
        SpanKind::Underline => MessageEntityKind::Underline,
        SpanKind::Strikethrough => MessageEntityKind::Strikethrough,
        SpanKind::Spoiler => MessageEntityKind::Spoiler,
        SpanKind::Code => MessageEntityKind::Code,
        SpanKind::Pre { language } => MessageEntityKind::Pre {
            language: language.clone(),
        },
        SpanKind::TextLink { url } => MessageEntityKind::TextLink {
            url: reqwest::Url::parse(url).ok()?,
        },
        SpanKind::Url => MessageEntityKind::Url,
        SpanKind::Mention => MessageEntityKind::Mention,
        SpanKind::Hashtag => MessageEntityKind::Hashtag,
        SpanKind::Blockquote => return None,
    };
    Some(MessageEntity {
        kind,
        offset: span.offset,
        length: span.length,
    })
}

fn to_entities(spans: &[TextSpan]) -> Vec<MessageEntity> {
    spans.iter().filter_map(to_entity).collect()
}

pub(crate) fn recipient(chat: &SourceChat) -> Recipient {
    match chat {
        SourceChat::Id(id) => Recipient::Id(teloxide::types::ChatId(*id)),
        SourceChat::Username(name) => {
            Recipient::ChannelUsername(format!("@{}", name.trim_start_matches('@')))
        }
    }
}

/// Caption text, parse mode and entities, in the shape every send method takes.
fn caption_parts(caption: Option<&Caption>) -> (Option<String>, Option<ParseMode>, Vec<MessageEntity>) {
    match caption {
        None => (None, None, Vec::new()),
        Some(Caption::Html(text)) => (Some(text.clone()), Some(ParseMode::Html), Vec::new()),
        Some(Caption::Plain { text, spans }) => (Some(text.clone()), None, to_entities(spans)),
    }
}

/// Apply caption, reply target and thumbnail to any multipart send request.
macro_rules! decorate {
    ($req:expr, $caption:expr, $reply_to:expr) => {{
        let (text, mode, entities) = caption_parts($caption);
        let mut req = $req;
        if let Some(text) = text {
            req = req.caption(text);
        }
        if let Some(mode) = mode {
            req = req.parse_mode(mode);
        }
        if !entities.is_empty() {
            req = req.caption_entities(entities);
        }
        if let Some(id) = $reply_to {
            req = req
                .reply_to_message_id(teloxide::types::MessageId(id.0))
                .allow_sending_without_reply(true);
        }
        req
    }};
}

impl TelegramMessenger {
    async fn send_upload(
        &self,
        to: teloxide::types::ChatId,
        up: &MediaUpload,
        reply_to: Option<MessageId>,
    ) -> Result<Message> {
        let file = || InputFile::file(&up.path).file_name(up.file_name.clone());
        let thumb = || up.thumbnail.as_ref().map(InputFile::file);
        let caption = up.caption.as_ref();

        match up.kind {
            ContentKind::Document => {
                self.with_retry(|| {
                    let mut req = decorate!(self.bot.send_document(to, file()), caption, reply_to);
                    if let Some(t) = thumb() {
                        req = req.thumb(t);
                    }
                    req
                })
                .await
            }
            ContentKind::Video => {
                self.with_retry(|| {
                    let mut req = decorate!(self.bot.send_video(to, file()), caption, reply_to)
                        .supports_streaming(true);
                    if let Some(t) = thumb() {
                        req = req.thumb(t);
                    }
                    if let Some(d) = up.duration {
                        req = req.duration(d);
                    }
                    if let (Some(w), Some(h)) = (up.width, up.height) {
                        req = req.width(w).height(h);
                    }
                    req
                })
                .await
            }
            ContentKind::Audio => {
                self.with_retry(|| {
                    let mut req = decorate!(self.bot.send_audio(to, file()), caption, reply_to);
                    if let Some(t) = thumb() {
                        req = req.thumb(t);
                    }
                    if let Some(d) = up.duration {
                        req = req.duration(d);
                    }
                    req
                })
                .await
            }
            ContentKind::Voice => {
                self.with_retry(|| {
                    let mut req = decorate!(self.bot.send_voice(to, file()), caption, reply_to);
                    if let Some(d) = up.duration {
                        req = req.duration(d);
                    }
                    req
                })
                .await
            }
            ContentKind::Animation => {
                self.with_retry(|| decorate!(self.bot.send_animation(to, file()), caption, reply_to))
                    .await
            }
            ContentKind::Photo => {
                self.with_retry(|| decorate!(self.bot.send_photo(to, file()), caption, reply_to))
                    .await
            }
            ContentKind::Sticker => {
                self.with_retry(|| {
                    let req = self.bot.send_sticker(to, file());
                    match reply_to {
                        Some(id) => req
                            .reply_to_message_id(id.0)
                            .allow_sending_without_reply(true),
                        None => req,
                    }
                })
                .await
            }
            ContentKind::Text | ContentKind::Poll => Err(Error::UnsupportedKind),
        }
    }
}

#[async_trait]
impl RelaySink for TelegramMessenger {
    async fn send_text(
        &self,
        to: ChatId,
        text: &str,
        spans: &[TextSpan],
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef> {
        let entities = to_entities(spans);
        let msg = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_message(Self::tg_chat(to), text.to_string())
                    .entities(entities.clone());
                if let Some(id) = reply_to {
                    req = req
                        .reply_to_message_id(Self::tg_msg_id(id))
                        .allow_sending_without_reply(true);
                }
                req
            })
            .await?;
        Ok(Self::message_ref(to, &msg))
    }

    async fn copy_message(
        &self,
        to: ChatId,
        from: &SourceChat,
        id: i32,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef> {
        let copied = self
            .with_retry(|| {
                let mut req = self.bot.copy_message(
                    Self::tg_chat(to),
                    recipient(from),
                    teloxide::types::MessageId(id),
                );
                if let Some(r) = reply_to {
                    req = req
                        .reply_to_message_id(Self::tg_msg_id(r))
                        .allow_sending_without_reply(true);
                }
                req
            })
            .await?;
        Ok(MessageRef {
            chat_id: to,
            message_id: MessageId(copied.0),
        })
    }

    async fn send_media(
        &self,
        to: ChatId,
        upload: &MediaUpload,
        reply_to: Option<MessageId>,
        progress: Option<ProgressSink>,
    ) -> Result<MessageRef> {
        // The Bot API client gives no byte-level upload feedback; report start and end.
        let total = tokio::fs::metadata(&upload.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if let Some(p) = &progress {
            p(0, total.max(1));
        }

        let msg = self
            .send_upload(Self::tg_chat(to), upload, reply_to)
            .await
            .map_err(|e| match e {
                Error::External(detail) => Error::TransferFailed(detail),
                other => other,
            })?;

        if let Some(p) = &progress {
            p(total.max(1), total.max(1));
        }
        Ok(Self::message_ref(to, &msg))
    }

    async fn download_file(&self, file_ref: &str, dest: &Path) -> Result<()> {
        let file = self
            .with_retry(|| self.bot.get_file(file_ref.to_string()))
            .await?;
        let mut out = tokio::fs::File::create(dest).await?;
        self.bot
            .download_file(&file.path, &mut out)
            .await
            .map_err(|e| Error::External(format!("telegram download error: {e}")))?;
        Ok(())
    }
}
