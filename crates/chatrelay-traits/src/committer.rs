//! Persistence committer interface.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// Final assistant message reconstructed from one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub chat_id: Uuid,
    pub user_id: String,
    pub message_id: String,
    pub text: String,
}

/// Stores the final assistant message of a stream.
///
/// Callers guarantee at most one call per stream; implementations do not
/// deduplicate.
#[async_trait]
pub trait Committer: Send + Sync {
    async fn commit(&self, request: CommitRequest) -> Result<()>;
}
