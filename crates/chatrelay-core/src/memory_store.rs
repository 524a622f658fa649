//! In-memory `ChatStore` for tests and local development.

use async_trait::async_trait;
use chatrelay_traits::{Chat, ChatStore, MessageRole, NewChat, StoredMessage, TraitError};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryChatStore {
    chats: DashMap<Uuid, Chat>,
    messages: DashMap<Uuid, Vec<StoredMessage>>,
    streams: DashMap<Uuid, Vec<Uuid>>,
    // (user id, message) for quota accounting.
    authored: RwLock<Vec<(String, StoredMessage)>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chat with a fixed creation time.
    pub fn insert_chat(&self, chat: Chat) {
        self.chats.insert(chat.id, chat);
    }

    /// Snapshot of a chat's messages.
    pub fn messages(&self, chat_id: Uuid) -> Vec<StoredMessage> {
        self.messages
            .get(&chat_id)
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// Append a message as-is, keeping its timestamp.
    pub fn insert_message(&self, message: StoredMessage) {
        self.messages.entry(message.chat_id).or_default().push(message);
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn get_chat(&self, chat_id: Uuid) -> chatrelay_traits::Result<Option<Chat>> {
        Ok(self.chats.get(&chat_id).map(|chat| chat.clone()))
    }

    async fn save_chat(&self, chat: NewChat) -> chatrelay_traits::Result<()> {
        self.chats.insert(
            chat.id,
            Chat {
                id: chat.id,
                user_id: chat.user_id,
                created_at: Utc::now(),
                title: chat.title,
                visibility: chat.visibility,
            },
        );
        Ok(())
    }

    async fn get_messages(&self, chat_id: Uuid) -> chatrelay_traits::Result<Vec<StoredMessage>> {
        Ok(self.messages(chat_id))
    }

    async fn save_messages(
        &self,
        user_id: &str,
        messages: &[StoredMessage],
    ) -> chatrelay_traits::Result<()> {
        if messages.is_empty() {
            return Err(TraitError::Invalid("No messages provided".to_string()));
        }
        for message in messages {
            self.insert_message(message.clone());
            if message.role == MessageRole::User {
                self.authored
                    .write()
                    .push((user_id.to_string(), message.clone()));
            }
        }
        Ok(())
    }

    async fn create_stream_id(&self, chat_id: Uuid, stream_id: Uuid) -> chatrelay_traits::Result<()> {
        self.streams.entry(chat_id).or_default().push(stream_id);
        Ok(())
    }

    async fn get_latest_stream_ids(&self, chat_id: Uuid) -> chatrelay_traits::Result<Vec<Uuid>> {
        Ok(self
            .streams
            .get(&chat_id)
            .map(|ids| ids.clone())
            .unwrap_or_default())
    }

    async fn message_count(&self, user_id: &str, hours: u32) -> chatrelay_traits::Result<u64> {
        let since = Utc::now() - Duration::hours(i64::from(hours));
        let count = self
            .authored
            .read()
            .iter()
            .filter(|(author, message)| author == user_id && message.created_at >= since)
            .count();
        Ok(count as u64)
    }
}
