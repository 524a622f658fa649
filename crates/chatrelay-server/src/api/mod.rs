pub mod chat;

use chatrelay_core::ChatService;
use std::sync::Arc;

use crate::auth::JwtVerifier;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub verifier: JwtVerifier,
}

impl AppState {
    pub fn new(service: Arc<ChatService>, verifier: JwtVerifier) -> Self {
        Self { service, verifier }
    }
}
