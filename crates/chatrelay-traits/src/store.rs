//! Chat store interface.
//!
//! Chat and message CRUD is owned by an external service; the gateway only
//! needs the handful of operations below.

use async_trait::async_trait;
use uuid::Uuid;

use crate::chat::{Chat, MessageRole, NewChat, StoredMessage};
use crate::error::Result;

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Look up a chat; `Ok(None)` when it does not exist.
    async fn get_chat(&self, chat_id: Uuid) -> Result<Option<Chat>>;

    async fn save_chat(&self, chat: NewChat) -> Result<()>;

    /// Messages of a chat in creation order.
    async fn get_messages(&self, chat_id: Uuid) -> Result<Vec<StoredMessage>>;

    async fn save_messages(&self, user_id: &str, messages: &[StoredMessage]) -> Result<()>;

    /// Record a stream id for a chat. Must be durably visible once this returns.
    async fn create_stream_id(&self, chat_id: Uuid, stream_id: Uuid) -> Result<()>;

    /// Stream ids of a chat, oldest first.
    async fn get_latest_stream_ids(&self, chat_id: Uuid) -> Result<Vec<Uuid>>;

    /// Number of messages `user_id` sent in the trailing `hours`.
    async fn message_count(&self, user_id: &str, hours: u32) -> Result<u64>;

    /// The chat's most recent message, if it was written by the assistant.
    async fn get_latest_assistant_message(&self, chat_id: Uuid) -> Result<Option<StoredMessage>> {
        let messages = self.get_messages(chat_id).await?;
        Ok(messages
            .into_iter()
            .last()
            .filter(|message| message.role == MessageRole::Assistant))
    }
}
