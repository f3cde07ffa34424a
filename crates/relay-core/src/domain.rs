use std::fmt;

use serde::{Deserialize, Serialize};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Ties a batch to its status artifacts and its cancellation flag.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Correlation ids are derived from the request message (chat + message id).
    pub fn for_message(chat_id: ChatId, message_id: MessageId) -> Self {
        Self(format!("{}:{}", chat_id.0, message_id.0))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a link points, as written by the requester.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceRef {
    /// `t.me/<name>/<id>`
    Public(String),
    /// `t.me/c/<digits>/<id>`
    Private(i64),
    /// `t.me/b/<name>/<id>`
    BotScoped(String),
}

impl SourceRef {
    /// Resolve the link identifier into something the transport can address.
    ///
    /// Private channel links carry the bare channel id; the API form is `-100<digits>`.
    /// `link::parse_link` only yields private ids that fit that form.
    pub fn resolve(&self) -> SourceChat {
        match self {
            SourceRef::Public(name) | SourceRef::BotScoped(name) => {
                SourceChat::Username(name.clone())
            }
            SourceRef::Private(digits) => {
                SourceChat::Id(private_chat_id(*digits).unwrap_or(-*digits))
            }
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, SourceRef::Public(_))
    }
}

/// `-100<digits>`, or `None` when that does not fit an i64.
pub fn private_chat_id(digits: i64) -> Option<i64> {
    format!("-100{digits}").parse().ok()
}

/// A source chat addressable by the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceChat {
    Id(i64),
    Username(String),
}

impl fmt::Display for SourceChat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceChat::Id(id) => write!(f, "{id}"),
            SourceChat::Username(name) => write!(f, "@{name}"),
        }
    }
}

/// Inclusive message id range. `to >= from` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdRange {
    pub from: i32,
    pub to: i32,
}

impl IdRange {
    pub fn single(id: i32) -> Self {
        Self { from: id, to: id }
    }

    /// Number of ids covered (never zero).
    pub fn count(&self) -> usize {
        (self.to - self.from) as usize + 1
    }

    pub fn is_batch(&self) -> bool {
        self.to > self.from
    }

    pub fn ids(&self) -> impl Iterator<Item = i32> {
        self.from..=self.to
    }
}

/// Opaque delegated access token owned by the requester.
///
/// Created and refreshed by the external login flow only.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(pub String);

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// One top-level relay request covering an inclusive id range.
#[derive(Clone, Debug)]
pub struct RelayRequest {
    pub requester: UserId,
    pub chat_id: ChatId,
    pub reply_to: Option<MessageId>,
    pub source: SourceRef,
    pub range: IdRange,
    pub correlation: CorrelationId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_source_resolves_to_channel_id() {
        assert_eq!(
            SourceRef::Private(1234567890).resolve(),
            SourceChat::Id(-1001234567890)
        );
        assert_eq!(
            SourceRef::BotScoped("somebot".into()).resolve(),
            SourceChat::Username("somebot".into())
        );
    }

    #[test]
    fn range_iterates_inclusive() {
        let r = IdRange { from: 100, to: 105 };
        assert_eq!(r.count(), 6);
        assert!(r.is_batch());
        assert!(!IdRange::single(7).is_batch());
        assert_eq!(r.ids().collect::<Vec<_>>(), vec![100, 101, 102, 103, 104, 105]);
    }

    #[test]
    fn session_token_is_redacted_in_debug() {
        let t = SessionToken("secret".into());
        assert!(!format!("{t:?}").contains("secret"));
    }
}
