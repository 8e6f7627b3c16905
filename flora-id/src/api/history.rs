//! GET /conversation-history/:session_id

use crate::error::{ApiError, ApiResult};
use crate::pipeline::ClientContext;
use crate::types::ChatTurn;
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub count: usize,
    /// Append order
    pub turns: Vec<ChatTurn>,
}

pub async fn conversation_history(
    State(state): State<AppState>,
    client: ClientContext,
    Path(session_id): Path<String>,
) -> ApiResult<Json<HistoryResponse>> {
    state.orchestrator.admit_standard(&client).await?;

    let turns = state
        .orchestrator
        .history(&session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session {}", session_id)))?;

    Ok(Json(HistoryResponse {
        session_id,
        count: turns.len(),
        turns,
    }))
}

pub fn history_routes() -> Router<AppState> {
    Router::new().route(
        "/conversation-history/:session_id",
        get(conversation_history),
    )
}
