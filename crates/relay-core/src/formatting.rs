//! Formatting utilities (Telegram HTML escaping, human-readable sizes).

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const SIZE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Format a byte count in binary units with two decimals (`1.50MB`).
///
/// Scales B → KB → MB → GB and falls through to TB for anything larger.
pub fn format_size(bytes: f64) -> String {
    let mut size = bytes.max(0.0);
    for unit in SIZE_UNITS {
        if size < 1024.0 {
            return format!("{size:.2}{unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2}TB")
}

/// Truncate to `max_chars` characters, appending `...` when something was cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = s.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}
