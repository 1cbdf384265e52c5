pub mod chat;
pub mod meta;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::ax_state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/ask", post(chat::ask))
        .route("/api/health", get(meta::health))
        .route("/api/tables", get(meta::list_tables))
        .with_state(state)
}
