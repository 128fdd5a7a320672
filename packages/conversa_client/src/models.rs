//! Data model shared by the sockets and the REST boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between the two usernames in a conversation id.
pub const CONVERSATION_SEPARATOR: &str = "__";

/// Product-level cap on message length, in characters.
pub const MAX_MESSAGE_LEN: usize = 512;

/// Public view of a user as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl UserSummary {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            name: None,
            url: None,
        }
    }
}

/// A single chat message. Immutable once received; identity is owned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    pub from_user: UserSummary,
    pub to_user: UserSummary,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

/// Entry of `GET /api/conversations/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub name: String,
    pub other_user: UserSummary,
    #[serde(default)]
    pub last_message: Option<MessageRecord>,
}

/// One page of `GET /api/messages/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<MessageRecord>,
}

impl MessagePage {
    /// The server only links a next page when one exists.
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

/// Identifier shared by both participants of a conversation: the two
/// usernames in lexicographic order joined by [`CONVERSATION_SEPARATOR`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn between(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{first}{CONVERSATION_SEPARATOR}{second}"))
    }

    /// Accepts an id produced by [`ConversationId::between`]; anything else is `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let (a, b) = name.split_once(CONVERSATION_SEPARATOR)?;
        if a.is_empty() || b.is_empty() {
            return None;
        }
        Some(Self::between(a, b))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn participants(&self) -> (&str, &str) {
        self.0
            .split_once(CONVERSATION_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""))
    }

    /// The participant that is not `me`. A self-conversation yields `me`.
    /// Matched against `me` on either side, so the other username may itself
    /// contain the separator.
    pub fn other_participant(&self, me: &str) -> Option<&str> {
        let first = self
            .0
            .strip_prefix(me)
            .and_then(|rest| rest.strip_prefix(CONVERSATION_SEPARATOR));
        let second = self
            .0
            .strip_suffix(me)
            .and_then(|rest| rest.strip_suffix(CONVERSATION_SEPARATOR));
        first.or(second).filter(|other| !other.is_empty())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    /// Message `id` from `from` to `to`, timestamped `secs` after the epoch.
    pub fn message(id: &str, from: &str, to: &str, secs: i64) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            conversation: None,
            from_user: UserSummary::new(from),
            to_user: UserSummary::new(to),
            content: format!("message {id}"),
            timestamp: Utc.timestamp_opt(secs, 0).single().unwrap_or_default(),
            read: false,
        }
    }

    pub fn messages(prefix: &str, n: usize) -> Vec<MessageRecord> {
        (0..n)
            .map(|i| message(&format!("{prefix}{i}"), "alice", "bob", i as i64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_id_is_order_independent() {
        let a = ConversationId::between("bob", "alice");
        let b = ConversationId::between("alice", "bob");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "alice__bob");
    }

    #[test]
    fn test_conversation_id_other_participant() {
        let id = ConversationId::between("alice", "bob");
        assert_eq!(id.other_participant("alice"), Some("bob"));
        assert_eq!(id.other_participant("bob"), Some("alice"));
        assert_eq!(id.other_participant("carol"), None);

        let id = ConversationId::between("alice", "alice");
        assert_eq!(id.other_participant("alice"), Some("alice"));
    }

    #[test]
    fn test_other_participant_with_separator_in_username() {
        let id = ConversationId::between("alice", "bob__x");
        assert_eq!(id.as_str(), "alice__bob__x");
        assert_eq!(id.other_participant("alice"), Some("bob__x"));
        assert_eq!(id.other_participant("bob__x"), Some("alice"));

        let id = ConversationId::between("zed", "a__b");
        assert_eq!(id.other_participant("zed"), Some("a__b"));
        assert_eq!(id.other_participant("a__b"), Some("zed"));
    }

    #[test]
    fn test_conversation_id_parse() {
        assert_eq!(
            ConversationId::parse("bob__alice"),
            Some(ConversationId::between("alice", "bob"))
        );
        assert_eq!(ConversationId::parse("alice"), None);
        assert_eq!(ConversationId::parse("__bob"), None);
    }

    #[test]
    fn test_message_record_deserializes_server_shape() {
        let json = r#"{
            "id": "7f1c3c1e-4b0a-4c55-9d64-1a2b3c4d5e6f",
            "conversation": "12",
            "from_user": {"username": "alice", "name": "Alice", "url": "http://x/api/users/alice/"},
            "to_user": {"username": "bob"},
            "content": "hi",
            "timestamp": "2022-06-01T12:00:00.123456Z",
            "read": false
        }"#;
        let msg: MessageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(msg.from_user.username, "alice");
        assert_eq!(msg.from_user.name.as_deref(), Some("Alice"));
        assert_eq!(msg.to_user.name, None);
        assert_eq!(msg.content, "hi");
        assert!(!msg.read);
    }

    #[test]
    fn test_message_page_has_next() {
        let json = r#"{"count": 60, "next": "http://x/api/messages/?page=3", "previous": null, "results": []}"#;
        let page: MessagePage = serde_json::from_str(json).unwrap();
        assert!(page.has_next());

        let json = r#"{"count": 60, "next": null, "previous": null, "results": []}"#;
        let page: MessagePage = serde_json::from_str(json).unwrap();
        assert!(!page.has_next());
    }

    #[test]
    fn test_conversation_summary_without_last_message() {
        let json = r#"{"id": "1", "name": "alice__bob", "other_user": {"username": "bob"}, "last_message": null}"#;
        let summary: ConversationSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.other_user.username, "bob");
        assert!(summary.last_message.is_none());
    }
}
