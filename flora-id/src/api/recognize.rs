//! POST /recognize

use super::{read_image_form, run_guarded, PlantView};
use crate::error::ApiResult;
use crate::pipeline::ClientContext;
use crate::types::SourceCandidates;
use crate::AppState;
use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    /// First 16 hex characters of the image fingerprint
    pub image_hash: String,
    /// Served from the fingerprint cache
    pub cached: bool,
    pub identified_plants: Vec<PlantView>,
    pub total_matches: usize,
    pub highest_confidence: f64,
    pub weights: BTreeMap<String, f64>,
    /// Candidate lists of every source that answered
    pub per_source: Vec<SourceCandidates>,
    /// `source_id → reason` for sources that did not
    pub failures: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// POST /recognize
///
/// Multipart `file`. Returns the ranked result plus the raw per-source
/// breakdown; no answer text is generated.
pub async fn recognize(
    State(state): State<AppState>,
    client: ClientContext,
    multipart: Multipart,
) -> ApiResult<Json<RecognizeResponse>> {
    let form = read_image_form(multipart, crate::body_limit(&state.settings)).await?;
    let orchestrator = state.orchestrator.clone();

    let outcome = run_guarded(&state, |cancel| async move {
        orchestrator.recognize(&client, form.image, &cancel).await
    })
    .await?;

    let ensemble = &outcome.recognition.ensemble;
    Ok(Json(RecognizeResponse {
        image_hash: outcome.fingerprint.short().to_string(),
        cached: outcome.cached,
        identified_plants: ensemble.entries.iter().map(PlantView::from).collect(),
        total_matches: ensemble.len(),
        highest_confidence: ensemble.highest_confidence(),
        weights: ensemble.weights.clone(),
        per_source: outcome.recognition.per_source,
        failures: outcome.recognition.failures,
        timestamp: Utc::now(),
    }))
}

pub fn recognize_routes() -> Router<AppState> {
    Router::new().route("/recognize", post(recognize))
}
