//! Post-link parsing: free text → source identifier + inclusive id range.
//!
//! Accepted shapes (host prefix optional):
//! - public:     `t.me/<name>/<from>[-<to>]`
//! - private:    `t.me/c/<digits>/<from>[-<to>]`
//! - bot-scoped: `t.me/b/<name>/<from>[-<to>]`

use std::sync::OnceLock;

use regex::Regex;

use crate::{
    domain::{private_chat_id, IdRange, SourceRef},
    errors::Error,
    Result,
};

const HOST_MARKERS: [&str; 2] = ["telegram.me/", "t.me/"];

/// A successfully parsed post link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedLink {
    pub source: SourceRef,
    pub range: IdRange,
}

/// What a free-text message asks for.
#[derive(Debug)]
pub enum InputKind {
    /// A chat invite link the delegated session should join.
    Invite(String),
    /// A post link (or a malformed attempt at one).
    Post(Result<ParsedLink>),
    /// Nothing the relay understands.
    Other,
}

/// Decide what a free-text message is.
pub fn classify_input(text: &str) -> InputKind {
    let text = text.trim();
    if is_invite_link(text) {
        return InputKind::Invite(text.to_string());
    }
    if HOST_MARKERS.iter().any(|m| text.contains(m)) {
        return InputKind::Post(parse_link(text));
    }
    InputKind::Other
}

pub fn is_invite_link(text: &str) -> bool {
    text.contains("/+") || text.contains("/joinchat/")
}

fn path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:c/(?P<chan>\d+)|b/(?P<bot>[A-Za-z0-9_]+)|(?P<name>[A-Za-z0-9_]+))/(?P<range>[^/]+)$")
            .expect("valid link regex")
    })
}

/// Parse a post link into a source identifier and an inclusive id range.
pub fn parse_link(text: &str) -> Result<ParsedLink> {
    let path = strip_host(text.trim());
    let caps = path_regex()
        .captures(path)
        .ok_or_else(|| Error::LinkMalformed(format!("unrecognized link: {path}")))?;

    let source = if let Some(chan) = caps.name("chan") {
        let id = chan
            .as_str()
            .parse::<i64>()
            .ok()
            .filter(|id| private_chat_id(*id).is_some())
            .ok_or_else(|| Error::LinkMalformed(format!("bad channel id: {}", chan.as_str())))?;
        SourceRef::Private(id)
    } else if let Some(bot) = caps.name("bot") {
        SourceRef::BotScoped(bot.as_str().to_string())
    } else if let Some(name) = caps.name("name") {
        SourceRef::Public(name.as_str().to_string())
    } else {
        return Err(Error::LinkMalformed(format!("unrecognized link: {path}")));
    };

    let range_text = caps.name("range").map(|m| m.as_str()).unwrap_or("");
    let range = parse_range(range_text)?;

    Ok(ParsedLink { source, range })
}

fn strip_host(text: &str) -> &str {
    for marker in HOST_MARKERS {
        if let Some(i) = text.find(marker) {
            return &text[i + marker.len()..];
        }
    }
    text
}

/// Parse `<from>[-<to>]`, ignoring whitespace around `-` and a trailing query marker.
pub fn parse_range(raw: &str) -> Result<IdRange> {
    let without_query = match raw.split_once('?') {
        Some((head, _)) => head,
        None => raw,
    };
    let trimmed = without_query.trim();

    let (from, to) = match trimmed.split_once('-') {
        Some((a, b)) => (parse_id(a)?, parse_id(b)?),
        None => {
            let id = parse_id(trimmed)?;
            (id, id)
        }
    };

    if to < from {
        return Err(Error::LinkMalformed(format!(
            "range end {to} is before start {from}"
        )));
    }
    Ok(IdRange { from, to })
}

fn parse_id(s: &str) -> Result<i32> {
    let s = s.trim();
    let id = s
        .parse::<i32>()
        .map_err(|_| Error::LinkMalformed(format!("not a message id: {s:?}")))?;
    if id < 1 {
        return Err(Error::LinkMalformed(format!("message id must be positive: {id}")));
    }
    Ok(id)
}
