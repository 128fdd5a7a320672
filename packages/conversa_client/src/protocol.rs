//! Socket envelope types
//!
//! Every frame on both sockets is a JSON object discriminated by `type`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::MessageRecord;

/// Frames the server pushes on a conversation socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// Initial (or re-delivered) newest-first batch of the conversation.
    #[serde(rename = "last_50_messages")]
    Last50Messages {
        messages: Vec<MessageRecord>,
        has_more: bool,
    },
    /// A message accepted by the server, broadcast to both participants.
    ChatMessageEcho { message: MessageRecord },
    UserJoin { user: String },
    UserLeave { user: String },
    OnlineUserList { users: Vec<String> },
    Typing { user: String, typing: bool },
    #[serde(other)]
    Unknown,
}

/// Frames the server pushes on the notification socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    UnreadCount { unread_count: u64 },
    NewMessageNotification {},
    #[serde(other)]
    Unknown,
}

/// Frames the client sends on a conversation socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    ChatMessage { message: String },
    Typing { typing: bool },
}

impl OutboundEnvelope {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// An inbound envelope family with a catch-all variant for unrecognized tags.
pub trait InboundEnvelope: DeserializeOwned {
    fn is_unknown(&self) -> bool;
}

impl InboundEnvelope for ConversationEvent {
    fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl InboundEnvelope for NotificationEvent {
    fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// Decode one text frame. Unknown tags and malformed payloads are logged
/// and yield `None`; they never reach the state containers.
pub fn decode_inbound<E: InboundEnvelope>(channel: &str, text: &str) -> Option<E> {
    match serde_json::from_str::<E>(text) {
        Ok(event) if event.is_unknown() => {
            warn!(
                channel,
                tag = %peek_tag(text).unwrap_or_default(),
                "Unknown message type, discarding"
            );
            None
        }
        Ok(event) => Some(event),
        Err(e) => {
            warn!(
                channel,
                tag = %peek_tag(text).unwrap_or_default(),
                "Malformed envelope, discarding: {}",
                e
            );
            None
        }
    }
}

/// Best-effort read of the `type` field for diagnostics.
fn peek_tag(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("type")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::message;

    #[test]
    fn test_last_50_messages_tag() {
        let json = r#"{"type":"last_50_messages","messages":[],"has_more":true}"#;
        let event: ConversationEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ConversationEvent::Last50Messages {
                messages: vec![],
                has_more: true
            }
        );
    }

    #[test]
    fn test_echo_ignores_extra_fields() {
        let msg = message("m1", "alice", "bob", 10);
        let json = serde_json::json!({
            "type": "chat_message_echo",
            "name": "alice",
            "message": msg,
        })
        .to_string();
        let event: ConversationEvent = serde_json::from_str(&json).unwrap();
        match event {
            ConversationEvent::ChatMessageEcho { message } => assert_eq!(message.id, "m1"),
            other => panic!("Expected ChatMessageEcho, got {:?}", other),
        }
    }

    #[test]
    fn test_presence_and_typing_tags() {
        let event: ConversationEvent =
            serde_json::from_str(r#"{"type":"user_join","user":"bob"}"#).unwrap();
        assert_eq!(
            event,
            ConversationEvent::UserJoin {
                user: "bob".to_string()
            }
        );

        let event: ConversationEvent =
            serde_json::from_str(r#"{"type":"online_user_list","users":["alice","bob"]}"#)
                .unwrap();
        assert!(matches!(event, ConversationEvent::OnlineUserList { users } if users.len() == 2));

        let event: ConversationEvent =
            serde_json::from_str(r#"{"type":"typing","user":"bob","typing":true}"#).unwrap();
        assert_eq!(
            event,
            ConversationEvent::Typing {
                user: "bob".to_string(),
                typing: true
            }
        );
    }

    #[test]
    fn test_unknown_tag_decodes_to_unknown() {
        let event: ConversationEvent =
            serde_json::from_str(r#"{"type":"read_receipt","id":"x"}"#).unwrap();
        assert_eq!(event, ConversationEvent::Unknown);
        assert!(decode_inbound::<ConversationEvent>("conversation", r#"{"type":"read_receipt"}"#).is_none());
    }

    #[test]
    fn test_malformed_payload_is_discarded() {
        assert!(decode_inbound::<ConversationEvent>("conversation", "not json").is_none());
        assert!(
            decode_inbound::<ConversationEvent>("conversation", r#"{"type":"user_join"}"#)
                .is_none()
        );
        assert!(decode_inbound::<ConversationEvent>("conversation", r#"{"user":"bob"}"#).is_none());
    }

    #[test]
    fn test_notification_tags() {
        let event: NotificationEvent =
            serde_json::from_str(r#"{"type":"unread_count","unread_count":4}"#).unwrap();
        assert_eq!(event, NotificationEvent::UnreadCount { unread_count: 4 });

        let event: NotificationEvent = serde_json::from_str(
            r#"{"type":"new_message_notification","name":"bob","message":{}}"#,
        )
        .unwrap();
        assert_eq!(event, NotificationEvent::NewMessageNotification {});
    }

    #[test]
    fn test_negative_unread_count_is_rejected() {
        assert!(
            decode_inbound::<NotificationEvent>(
                "notifications",
                r#"{"type":"unread_count","unread_count":-1}"#
            )
            .is_none()
        );
    }

    #[test]
    fn test_outbound_encoding() {
        let json = OutboundEnvelope::Typing { typing: true }.encode().unwrap();
        assert_eq!(json, r#"{"type":"typing","typing":true}"#);

        let json = OutboundEnvelope::ChatMessage {
            message: "hello".to_string(),
        }
        .encode()
        .unwrap();
        assert_eq!(json, r#"{"type":"chat_message","message":"hello"}"#);
    }
}
