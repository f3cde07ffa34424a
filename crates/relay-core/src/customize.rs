//! Per-requester transfer customization: captions, filenames, kind filters.

use serde::{Deserialize, Serialize};

use crate::content::ContentKind;

/// Which kinds get mirrored to the requester's destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindFilters {
    pub document: bool,
    pub video: bool,
    pub animation: bool,
    pub sticker: bool,
    pub voice: bool,
    pub audio: bool,
    pub photo: bool,
    pub text: bool,
    pub poll: bool,
}

impl Default for KindFilters {
    fn default() -> Self {
        Self {
            document: true,
            video: true,
            animation: true,
            sticker: true,
            voice: true,
            audio: true,
            photo: true,
            text: true,
            poll: true,
        }
    }
}

impl KindFilters {
    pub fn allows(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::Document => self.document,
            ContentKind::Video => self.video,
            ContentKind::Animation => self.animation,
            ContentKind::Sticker => self.sticker,
            ContentKind::Voice => self.voice,
            ContentKind::Audio => self.audio,
            ContentKind::Photo => self.photo,
            ContentKind::Text => self.text,
            ContentKind::Poll => self.poll,
        }
    }
}

/// Snapshot of a requester's transfer preferences, read once per item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Chat that receives a mirror copy of every relayed item.
    pub mirror_destination: Option<i64>,
    pub caption_template: Option<String>,
    /// File reference of the requester's custom thumbnail (primary identity).
    pub custom_thumbnail: Option<String>,
    pub filename_suffix: Option<String>,
    /// `find:replace|find2:replace2`
    pub replace_caption_words: Option<String>,
    /// `find:replace|find2:replace2`
    pub replace_filename_words: Option<String>,
    pub filters: KindFilters,
    pub send_as_document: bool,
}

impl TransferSettings {
    pub fn wants_mirror(&self, kind: ContentKind) -> Option<i64> {
        self.mirror_destination.filter(|_| self.filters.allows(kind))
    }
}

/// Insert `suffix` before the extension: `movie.mkv` + `HD` → `movie HD .mkv`.
///
/// Names without an extension get the suffix appended directly.
pub fn apply_suffix(file_name: &str, suffix: Option<&str>) -> String {
    let Some(suffix) = suffix.filter(|s| !s.is_empty()) else {
        return file_name.to_string();
    };
    if file_name.is_empty() {
        return file_name.to_string();
    }
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem} {suffix} .{ext}"),
        None => format!("{file_name}{suffix}"),
    }
}

/// Apply a `find:replace|find2:replace2` pattern list, left to right.
///
/// Malformed pairs (no `:` or an empty find) are ignored.
pub fn replace_words(text: &str, patterns: Option<&str>) -> String {
    let Some(patterns) = patterns else {
        return text.to_string();
    };
    patterns
        .split('|')
        .filter_map(|pair| pair.split_once(':'))
        .filter(|(find, _)| !find.is_empty())
        .fold(text.to_string(), |acc, (find, replace)| acc.replace(find, replace))
}

/// Substitute `{caption}`, `{filename}`, `{IndexCount}` in a caption template.
///
/// Unknown placeholders are left as written.
pub fn render_caption(template: &str, caption: &str, file_name: &str, index: u64) -> String {
    template
        .replace("{caption}", caption)
        .replace("{filename}", file_name)
        .replace("{IndexCount}", &index.to_string())
}
