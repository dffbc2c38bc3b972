pub mod auth;
mod handler;

pub use handler::{
    GatewayState, handle_chat_completions, handle_health, handle_metrics, handle_root,
};

use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/chat/completions", post(handle_chat_completions))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}
