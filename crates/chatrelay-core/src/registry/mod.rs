//! Resumable stream registry.
//!
//! A producer registers a stream id and publishes encoded protocol lines;
//! any number of readers attach to the same id and receive frames from their
//! attach point forward. Frames are append-only and never rewritten.
//!
//! ```text
//! Registered -> Live -> Completed
//!                   \-> Abandoned
//! ```
//!
//! Attaching to a finished or unknown stream yields `None`, which callers
//! treat as "fall back to the persisted message".

mod durable;
mod memory;
mod publisher;

pub use durable::{DEFAULT_POLL_INTERVAL, DurableRegistry};
pub use memory::MemoryRegistry;
pub use publisher::StreamPublisher;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Frames delivered to an attached reader. Ends when the stream finishes.
pub type FrameStream = BoxStream<'static, Bytes>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRegistration {
    pub stream_id: Uuid,
    pub chat_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl StreamRegistration {
    pub fn new(stream_id: Uuid, chat_id: Uuid) -> Self {
        Self {
            stream_id,
            chat_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Registered,
    Live,
    Completed,
    Abandoned,
}

impl StreamState {
    pub fn is_finished(&self) -> bool {
        matches!(self, StreamState::Completed | StreamState::Abandoned)
    }
}

/// How a producer left the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Abandoned,
}

impl From<StreamOutcome> for StreamState {
    fn from(outcome: StreamOutcome) -> Self {
        match outcome {
            StreamOutcome::Completed => StreamState::Completed,
            StreamOutcome::Abandoned => StreamState::Abandoned,
        }
    }
}

/// Where an attaching reader starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachPoint {
    /// From the first frame. Used by the request that started the stream.
    Start,
    /// From the next frame published after attaching.
    Tail,
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Stream {0} is already registered")]
    AlreadyRegistered(Uuid),

    #[error("Stream {0} is not registered")]
    NotRegistered(Uuid),

    #[error("Stream {0} has already finished")]
    Finished(Uuid),

    #[error("Registry storage error: {0}")]
    Storage(String),

    #[error("Registry record error: {0}")]
    Record(#[from] serde_json::Error),
}

impl From<anyhow::Error> for RegistryError {
    fn from(err: anyhow::Error) -> Self {
        RegistryError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Keyed, replay-capable pub/sub for encoded stream frames.
#[async_trait]
pub trait StreamRegistry: Send + Sync {
    async fn register(&self, registration: &StreamRegistration) -> Result<()>;

    /// Append one frame. The first publish moves the stream to `Live`.
    async fn publish(&self, stream_id: Uuid, frame: Bytes) -> Result<()>;

    async fn finish(&self, stream_id: Uuid, outcome: StreamOutcome) -> Result<()>;

    /// Subscribe to a registered or live stream.
    async fn attach(&self, stream_id: Uuid, from: AttachPoint) -> Result<Option<FrameStream>>;

    async fn state(&self, stream_id: Uuid) -> Result<Option<StreamState>>;
}
