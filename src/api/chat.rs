use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::ax_state::AppState;
use crate::models::context::AskRequest;

pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AskRequest>,
) -> impl IntoResponse {
    let question = payload.question.trim();
    if question.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "question must not be empty" })),
        )
            .into_response();
    }

    // 规划、执行与回答生成都在 agent 内部完成，失败以降级回答的形式返回
    let response = state.agent.answer(question).await;
    Json(response).into_response()
}
