//! ChatRelay Traits - collaborator interfaces consumed by the streaming core.
//!
//! This crate provides the narrow interfaces the gateway talks to without
//! owning their implementation:
//! - `ChatStore`: chat, message and stream-id bookkeeping
//! - `Committer`: persists the final assistant message of a stream
//! - chat/message/user models shared by both

pub mod chat;
pub mod committer;
pub mod error;
pub mod store;

// ── Top-level re-exports ─────────────────────────────────────────────

pub use chat::{
    Chat, MessagePart, MessageRole, NewChat, StoredMessage, UserType, Visibility,
};
pub use committer::{CommitRequest, Committer};
pub use error::{Result, TraitError};
pub use store::ChatStore;
