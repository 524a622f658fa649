//! Chat, message and user models exchanged with the chat store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Guest,
    Regular,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub visibility: Visibility,
}

impl Chat {
    /// Whether `user_id` may read this chat (owner, or anyone when public).
    pub fn readable_by(&self, user_id: &str) -> bool {
        self.visibility == Visibility::Public || self.user_id == user_id
    }
}

/// Payload for creating a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChat {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePart {
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub chat_id: Uuid,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn assistant(chat_id: Uuid, id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            chat_id,
            role: MessageRole::Assistant,
            parts: vec![MessagePart::Text { text: text.into() }],
            attachments: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                MessagePart::Text { text } => text.as_str(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serializes_camel_case_with_typed_parts() {
        let chat_id = Uuid::new_v4();
        let message = StoredMessage::assistant(chat_id, "msg-1", "hello");
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["chatId"], chat_id.to_string());
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["parts"][0]["type"], "text");
        assert_eq!(value["parts"][0]["text"], "hello");
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn test_text_joins_parts_in_order() {
        let mut message = StoredMessage::assistant(Uuid::new_v4(), "msg-1", "Hello, ");
        message.parts.push(MessagePart::Text {
            text: "world".to_string(),
        });
        assert_eq!(message.text(), "Hello, world");
    }

    #[test]
    fn test_private_chat_only_readable_by_owner() {
        let chat = Chat {
            id: Uuid::new_v4(),
            user_id: "ada".to_string(),
            created_at: Utc::now(),
            title: "t".to_string(),
            visibility: Visibility::Private,
        };
        assert!(chat.readable_by("ada"));
        assert!(!chat.readable_by("babbage"));

        let public = Chat {
            visibility: Visibility::Public,
            ..chat
        };
        assert!(public.readable_by("babbage"));
    }
}
