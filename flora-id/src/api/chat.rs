//! Chat endpoints
//!
//! - POST /chat: text only, no image pipeline
//! - POST /chat-with-image: full identification pipeline plus an answer

use super::{read_image_form, run_guarded, PlantView};
use crate::error::ApiResult;
use crate::pipeline::{source_summary, ClientContext};
use crate::AppState;
use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Plants listed in an image chat response
pub const IDENTIFIED_PLANTS: usize = 3;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub response: String,
    /// Generator that produced `response`
    pub provider: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ImageChatResponse {
    pub session_id: String,
    pub response: String,
    pub provider: String,
    pub identified_plants: Vec<PlantView>,
    pub total_matches: usize,
    pub highest_confidence: f64,
    /// Entries per source plus `verified`
    pub sources: BTreeMap<String, usize>,
    pub image_hash: String,
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
}

/// POST /chat
pub async fn chat(
    State(state): State<AppState>,
    client: ClientContext,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let orchestrator = state.orchestrator.clone();
    let outcome = run_guarded(&state, |_cancel| async move {
        orchestrator
            .chat(&client, &request.message, request.session_id.as_deref())
            .await
    })
    .await?;

    Ok(Json(ChatResponse {
        session_id: outcome.session_id,
        response: outcome.response.text,
        provider: outcome.response.provider,
        timestamp: outcome.timestamp,
    }))
}

/// POST /chat-with-image
///
/// Multipart `file`, optional `message` and `session_id`.
pub async fn chat_with_image(
    State(state): State<AppState>,
    client: ClientContext,
    multipart: Multipart,
) -> ApiResult<Json<ImageChatResponse>> {
    let form = read_image_form(multipart, crate::body_limit(&state.settings)).await?;
    let orchestrator = state.orchestrator.clone();

    let outcome = run_guarded(&state, |cancel| async move {
        orchestrator
            .chat_with_image(
                &client,
                form.image,
                form.message.as_deref().unwrap_or_default(),
                form.session_id.as_deref(),
                &cancel,
            )
            .await
    })
    .await?;

    let ensemble = &outcome.ensemble;
    Ok(Json(ImageChatResponse {
        session_id: outcome.session_id.clone(),
        response: outcome.response.text.clone(),
        provider: outcome.response.provider.clone(),
        identified_plants: ensemble
            .entries
            .iter()
            .take(IDENTIFIED_PLANTS)
            .map(PlantView::from)
            .collect(),
        total_matches: ensemble.len(),
        highest_confidence: ensemble.highest_confidence(),
        sources: source_summary(ensemble),
        image_hash: outcome.fingerprint.short().to_string(),
        cached: outcome.cached,
        timestamp: outcome.timestamp,
    }))
}

pub fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat-with-image", post(chat_with_image))
}
