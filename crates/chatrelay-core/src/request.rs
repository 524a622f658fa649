//! Start-generation request body and its validation.

use chatrelay_traits::{MessagePart, MessageRole, StoredMessage, Visibility};
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GatewayError;

pub const MAX_TEXT_LENGTH: usize = 2000;
pub const INVALID_BODY: &str = "Invalid request body";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatModel {
    #[serde(rename = "default-model")]
    Default,
    #[serde(rename = "large-model")]
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputRole {
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentType {
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/jpg")]
    Jpg,
    #[serde(rename = "image/jpeg")]
    Jpeg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub name: String,
    pub content_type: AttachmentType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessageInput {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub role: InputRole,
    pub parts: Vec<MessagePart>,
    #[serde(default, rename = "experimental_attachments")]
    pub attachments: Option<Vec<Attachment>>,
}

impl UserMessageInput {
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                MessagePart::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The message as stored, stamped with the time it was received.
    pub fn to_stored(&self, chat_id: Uuid) -> StoredMessage {
        StoredMessage {
            id: self.id.to_string(),
            chat_id,
            role: MessageRole::User,
            parts: self.parts.clone(),
            attachments: self
                .attachments
                .iter()
                .flatten()
                .filter_map(|attachment| serde_json::to_value(attachment).ok())
                .collect(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRequestBody {
    pub id: Uuid,
    pub message: UserMessageInput,
    pub selected_chat_model: ChatModel,
    pub selected_visibility_type: Visibility,
}

impl PostRequestBody {
    /// Parse and validate a raw body. Any failure is a 400.
    pub fn parse(bytes: &[u8]) -> Result<Self, GatewayError> {
        let body: Self =
            serde_json::from_slice(bytes).map_err(|_| GatewayError::bad_request(INVALID_BODY))?;
        body.validate()?;
        Ok(body)
    }

    fn validate(&self) -> Result<(), GatewayError> {
        let invalid = || GatewayError::bad_request(INVALID_BODY);

        if self.message.parts.is_empty() {
            return Err(invalid());
        }
        for part in &self.message.parts {
            let MessagePart::Text { text } = part;
            if !within_limit(text) {
                return Err(invalid());
            }
        }
        for attachment in self.message.attachments.iter().flatten() {
            if !within_limit(&attachment.name) || Url::parse(&attachment.url).is_err() {
                return Err(invalid());
            }
        }
        Ok(())
    }
}

fn within_limit(text: &str) -> bool {
    let len = text.chars().count();
    (1..=MAX_TEXT_LENGTH).contains(&len)
}
