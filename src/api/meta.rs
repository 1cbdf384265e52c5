use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::ax_state::AppState;
use crate::models::context::TableInfo;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "known_entities": state.entities.len(),
    }))
}

/// 已注册的数据表及其字段
pub async fn list_tables(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tables: Vec<TableInfo> = state
        .schemas
        .tables()
        .map(|t| TableInfo {
            name: t.name,
            description: t.description,
            fields: t.fields.iter().map(|f| f.name).collect(),
        })
        .collect();
    Json(tables)
}
