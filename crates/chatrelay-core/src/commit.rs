use async_trait::async_trait;
use chatrelay_traits::{ChatStore, CommitRequest, Committer, StoredMessage};
use std::sync::Arc;

/// Commits the assistant message through the chat store.
pub struct ChatStoreCommitter {
    store: Arc<dyn ChatStore>,
}

impl ChatStoreCommitter {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Committer for ChatStoreCommitter {
    async fn commit(&self, request: CommitRequest) -> chatrelay_traits::Result<()> {
        let message = StoredMessage::assistant(request.chat_id, request.message_id, request.text);
        self.store.save_messages(&request.user_id, &[message]).await
    }
}
