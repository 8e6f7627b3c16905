//! Health and status endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::cache::{CacheMode, FingerprintMode};
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded"
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub weight: f64,
    /// Credentials or endpoint configured
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct CacheStatus {
    pub mode: CacheMode,
    pub ttl_secs: u64,
    pub fingerprint_mode: FingerprintMode,
}

/// Dependency status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub module: String,
    pub version: String,
    pub git_hash: String,
    pub uptime_seconds: u64,
    pub cache: CacheStatus,
    pub sources: Vec<SourceStatus>,
    /// Generators in fallback order, template last
    pub generation_order: Vec<String>,
    /// Accepted taxa in the reference checklist, `None` when unreachable
    pub reference_taxa: Option<i64>,
    pub require_api_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

fn uptime_seconds(state: &AppState) -> u64 {
    Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0) as u64
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = match state.orchestrator.cache().mode() {
        CacheMode::Primary => "ok",
        CacheMode::Degraded => "degraded",
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "flora-id".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime_seconds(&state),
        last_error: state.last_error.read().await.clone(),
    })
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let orchestrator = &state.orchestrator;
    let weights = orchestrator.scorer().weights();

    let sources = orchestrator
        .aggregator()
        .source_status()
        .into_iter()
        .map(|(source_id, available)| SourceStatus {
            weight: weights.get(&source_id),
            source_id,
            available,
        })
        .collect();

    let reference_taxa = match orchestrator.verification().reference() {
        Some(reference) => match reference.count().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Reference dataset count failed: {:#}", e);
                None
            }
        },
        None => None,
    };

    Json(StatusResponse {
        module: "flora-id".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        uptime_seconds: uptime_seconds(&state),
        cache: CacheStatus {
            mode: orchestrator.cache().mode(),
            ttl_secs: orchestrator.cache().ttl().as_secs(),
            fingerprint_mode: state.settings.cache.fingerprint_mode,
        },
        sources,
        generation_order: orchestrator.generation().provider_names(),
        reference_taxa,
        require_api_key: state.settings.admission.require_api_key,
        last_error: state.last_error.read().await.clone(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
}
