//! flora-id library interface
//!
//! Plant identification service: fans an uploaded image out to several
//! recognition sources, merges their answers into one weighted ranking,
//! verifies it against a reference checklist and answers the user through
//! an LLM fallback chain.

pub mod admission;
pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod db;
pub mod ensemble;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod sessions;
pub mod sources;
pub mod types;
pub mod verification;

pub use crate::error::{ApiError, ApiResult};

use crate::config::Settings;
use crate::pipeline::Orchestrator;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Multipart overhead allowed on top of the image limit
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub settings: Arc<Settings>,
    pub db: SqlitePool,
    /// Parent of every per-request cancellation token
    pub shutdown: CancellationToken,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last server-side failure, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        db: SqlitePool,
        orchestrator: Arc<Orchestrator>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            settings,
            db,
            shutdown,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.server.request_timeout_ms)
    }

    /// Remember server-side failures; rejected requests are not recorded
    pub async fn record_error(&self, error: &ApiError) {
        if error.is_server_error() {
            *self.last_error.write().await = Some(error.to_string());
        }
    }
}

/// Request body limit of the image routes
///
/// Bodies cut off at this limit are still handed to the admission gate as
/// oversize uploads.
pub fn body_limit(settings: &Settings) -> usize {
    settings
        .admission
        .max_image_bytes
        .saturating_mul(2)
        .saturating_add(MULTIPART_OVERHEAD)
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = body_limit(&state.settings);

    Router::new()
        .merge(api::recognize_routes())
        .merge(api::chat_routes())
        .merge(api::history_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
