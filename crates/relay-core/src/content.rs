//! Retrieved content items and their classification into relayable kinds.

use serde::{Deserialize, Serialize};

use crate::messaging::types::ChatAction;

/// Formatting span over a text or caption (offsets in UTF-16 code units).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub kind: SpanKind,
    pub offset: usize,
    pub length: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpanKind {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Spoiler,
    Code,
    Pre { language: Option<String> },
    TextLink { url: String },
    Url,
    Mention,
    Hashtag,
    Blockquote,
}

/// One media attachment as reported by the source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFile {
    /// Opaque reference the source session can download.
    pub file_ref: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    /// Native thumbnails, smallest first.
    #[serde(default)]
    pub thumbs: Vec<String>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// A content item fetched from a source conversation by message id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub id: i32,
    /// Deleted or never-existing message.
    #[serde(default)]
    pub empty: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Vec<TextSpan>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub caption_entities: Vec<TextSpan>,
    #[serde(default)]
    pub document: Option<MediaFile>,
    #[serde(default)]
    pub video: Option<MediaFile>,
    #[serde(default)]
    pub animation: Option<MediaFile>,
    #[serde(default)]
    pub sticker: Option<MediaFile>,
    #[serde(default)]
    pub voice: Option<MediaFile>,
    #[serde(default)]
    pub audio: Option<MediaFile>,
    #[serde(default)]
    pub photo: Option<MediaFile>,
    #[serde(default)]
    pub poll: Option<serde_json::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Document,
    Video,
    Animation,
    Sticker,
    Voice,
    Audio,
    Photo,
    Text,
    Poll,
}

type Predicate = fn(&RetrievedItem) -> bool;

/// Classification order. The first matching predicate wins.
const PRIORITY: [(ContentKind, Predicate); 9] = [
    (ContentKind::Document, |i| i.document.is_some()),
    (ContentKind::Video, |i| i.video.is_some()),
    (ContentKind::Animation, |i| i.animation.is_some()),
    (ContentKind::Sticker, |i| i.sticker.is_some()),
    (ContentKind::Voice, |i| i.voice.is_some()),
    (ContentKind::Audio, |i| i.audio.is_some()),
    (ContentKind::Photo, |i| i.photo.is_some()),
    (ContentKind::Text, |i| i.text.as_deref().is_some_and(|t| !t.is_empty())),
    (ContentKind::Poll, |i| i.poll.is_some()),
];

/// Decide the content kind of an item; `None` means nothing relayable.
pub fn classify(item: &RetrievedItem) -> Option<ContentKind> {
    PRIORITY
        .iter()
        .find(|(_, matches)| matches(item))
        .map(|(kind, _)| *kind)
}

impl RetrievedItem {
    /// The attachment backing `kind`, if any.
    pub fn media(&self, kind: ContentKind) -> Option<&MediaFile> {
        match kind {
            ContentKind::Document => self.document.as_ref(),
            ContentKind::Video => self.video.as_ref(),
            ContentKind::Animation => self.animation.as_ref(),
            ContentKind::Sticker => self.sticker.as_ref(),
            ContentKind::Voice => self.voice.as_ref(),
            ContentKind::Audio => self.audio.as_ref(),
            ContentKind::Photo => self.photo.as_ref(),
            ContentKind::Text | ContentKind::Poll => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThumbnailPolicy {
    None,
    /// Only the source's own first thumbnail.
    NativeOnly,
    /// The requester's custom thumbnail, else the native one.
    CustomOrNative,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptionPolicy {
    /// No caption at all.
    Drop,
    /// Original caption and spans, untouched.
    Passthrough,
    /// Requester template, else original caption.
    Template,
}

/// Per-kind transfer behaviour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KindPolicy {
    pub needs_download: bool,
    pub thumbnail: ThumbnailPolicy,
    pub caption: CaptionPolicy,
    /// Apply the requester's filename suffix.
    pub suffix: bool,
    /// Name substituted for `{filename}` when the kind has none.
    pub fixed_name: Option<&'static str>,
    pub chat_action: ChatAction,
}

impl ContentKind {
    pub fn policy(self) -> KindPolicy {
        use CaptionPolicy as C;
        use ThumbnailPolicy as T;

        let (needs_download, thumbnail, caption, suffix, fixed_name, chat_action) = match self {
            ContentKind::Document => (true, T::CustomOrNative, C::Template, true, None, ChatAction::UploadDocument),
            ContentKind::Video => (true, T::CustomOrNative, C::Template, true, None, ChatAction::UploadVideo),
            ContentKind::Audio => (true, T::NativeOnly, C::Template, true, None, ChatAction::UploadDocument),
            ContentKind::Photo => (true, T::None, C::Template, false, Some("photo"), ChatAction::UploadPhoto),
            ContentKind::Animation => (true, T::None, C::Drop, false, None, ChatAction::UploadVideo),
            ContentKind::Sticker => (true, T::None, C::Drop, false, None, ChatAction::UploadPhoto),
            ContentKind::Voice => (true, T::None, C::Passthrough, false, None, ChatAction::UploadVoice),
            ContentKind::Text | ContentKind::Poll => (false, T::None, C::Passthrough, false, None, ChatAction::Typing),
        };

        KindPolicy {
            needs_download,
            thumbnail,
            caption,
            suffix,
            fixed_name,
            chat_action,
        }
    }

    /// Kinds the requester may ask to receive as a plain document.
    pub fn can_send_as_document(self) -> bool {
        matches!(self, ContentKind::Video | ContentKind::Photo | ContentKind::Audio)
    }

    pub fn label(self) -> &'static str {
        match self {
            ContentKind::Document => "document",
            ContentKind::Video => "video",
            ContentKind::Animation => "animation",
            ContentKind::Sticker => "sticker",
            ContentKind::Voice => "voice",
            ContentKind::Audio => "audio",
            ContentKind::Photo => "photo",
            ContentKind::Text => "text",
            ContentKind::Poll => "poll",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(name: &str) -> Option<MediaFile> {
        Some(MediaFile {
            file_ref: format!("ref-{name}"),
            file_name: Some(name.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn document_wins_over_everything_else() {
        let item = RetrievedItem {
            id: 1,
            document: media("a.pdf"),
            video: media("b.mp4"),
            photo: media("c.jpg"),
            text: Some("hi".into()),
            ..Default::default()
        };
        assert_eq!(classify(&item), Some(ContentKind::Document));
    }

    #[test]
    fn priority_order_is_followed_down_the_list() {
        let item = RetrievedItem {
            id: 1,
            voice: media("v.ogg"),
            audio: media("a.mp3"),
            ..Default::default()
        };
        assert_eq!(classify(&item), Some(ContentKind::Voice));

        let item = RetrievedItem {
            id: 1,
            photo: media("p.jpg"),
            text: Some("caption-less text".into()),
            ..Default::default()
        };
        assert_eq!(classify(&item), Some(ContentKind::Photo));
    }

    #[test]
    fn text_and_poll_classify_and_nothing_is_none() {
        let text = RetrievedItem {
            id: 1,
            text: Some("hello".into()),
            ..Default::default()
        };
        assert_eq!(classify(&text), Some(ContentKind::Text));

        let poll = RetrievedItem {
            id: 2,
            poll: Some(serde_json::json!({"question": "?"})),
            ..Default::default()
        };
        assert_eq!(classify(&poll), Some(ContentKind::Poll));

        let blank = RetrievedItem {
            id: 3,
            text: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(classify(&blank), None);
    }

    #[test]
    fn policies_match_kind_rules() {
        assert_eq!(ContentKind::Audio.policy().thumbnail, ThumbnailPolicy::NativeOnly);
        assert_eq!(ContentKind::Video.policy().thumbnail, ThumbnailPolicy::CustomOrNative);
        assert_eq!(ContentKind::Animation.policy().caption, CaptionPolicy::Drop);
        assert_eq!(ContentKind::Sticker.policy().caption, CaptionPolicy::Drop);
        assert_eq!(ContentKind::Voice.policy().caption, CaptionPolicy::Passthrough);
        assert_eq!(ContentKind::Photo.policy().fixed_name, Some("photo"));
        assert!(!ContentKind::Text.policy().needs_download);
        assert!(ContentKind::Document.policy().suffix);
        assert!(!ContentKind::Photo.policy().suffix);
    }

    #[test]
    fn gateway_payload_deserializes_with_defaults() {
        let item: RetrievedItem = serde_json::from_str(
            r#"{"id": 7, "video": {"file_ref": "v1", "file_name": "clip.mp4", "thumbs": ["t1"]},
                "caption": "hi", "caption_entities": [{"kind": {"type": "bold"}, "offset": 0, "length": 2}]}"#,
        )
        .unwrap();
        assert_eq!(classify(&item), Some(ContentKind::Video));
        assert_eq!(item.video.as_ref().unwrap().thumbs, vec!["t1".to_string()]);
        assert_eq!(item.caption_entities[0].kind, SpanKind::Bold);
        assert!(!item.empty);
    }
}
