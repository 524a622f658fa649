pub mod backend;
pub mod commit;
pub mod context;
pub mod entitlements;
pub mod error;
pub mod memory_store;
pub mod protocol;
pub mod registry;
pub mod request;
pub mod resume;
pub mod service;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{RegistryBackend, StreamContext, StreamSettings};
pub use error::{GatewayError, Result};
pub use service::{ChatService, ResumeOutcome, SessionUser, StartedGeneration};

use backend::{BackendChatStore, BackendClient, BackendConfig, GenerationBackend};
use chatrelay_traits::{ChatStore, Committer};
use commit::ChatStoreCommitter;
use std::sync::Arc;
use tracing::info;

/// Wire a [`ChatService`] against the real backend.
///
/// The backend client serves both as inference endpoint and chat store.
pub fn build_service(backend: BackendConfig, streams: StreamSettings) -> ChatService {
    let client = BackendClient::new(backend);
    let store: Arc<dyn ChatStore> = Arc::new(BackendChatStore::new(client.clone()));
    let generator: Arc<dyn GenerationBackend> = Arc::new(client);
    let committer: Arc<dyn Committer> = Arc::new(ChatStoreCommitter::new(store.clone()));

    info!(registry = ?streams.registry, "Initializing chat relay");
    ChatService::new(store, generator, committer, Arc::new(StreamContext::new(streams)))
}
