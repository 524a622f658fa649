use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::api::{AppState, chat};
use crate::auth::session_middleware;
use crate::middleware::build_cors_layer;

async fn health() -> &'static str {
    "OK"
}

pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/chat",
            post(chat::create_chat_stream).get(chat::resume_chat_stream),
        )
        .route_layer(middleware::from_fn_with_state(
            state.verifier.clone(),
            session_middleware,
        ))
        .layer(build_cors_layer(cors_origins))
        .with_state(state)
}
