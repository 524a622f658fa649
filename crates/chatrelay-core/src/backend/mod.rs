//! Client for the inference backend and its chat REST API.

mod chat_store;
mod client;
mod error;

pub use chat_store::BackendChatStore;
pub use client::{
    BackendClient, BackendConfig, BackendMessage, ByteStream, DEFAULT_TIMEOUT, FALLBACK_TITLE,
    GenerationBackend, GenerationRequest,
};
pub use error::{BackendError, BackendFailure};
