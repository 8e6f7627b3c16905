//! Error types for flora-id
//!
//! Two layers:
//! - [`PipelineError`]: closed taxonomy of everything that can go wrong while
//!   identifying a plant. Only four kinds are ever shown to a caller; the
//!   rest are absorbed by the stage that raised them and only logged.
//! - [`ApiError`]: HTTP boundary type implementing `IntoResponse`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Reason an upload or message failed admission
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    Oversize { size: usize, limit: usize },

    #[error("content type {0:?} is not an allowed image format")]
    UnsupportedType(String),

    #[error("file signature does not match declared type {declared}")]
    SignatureMismatch { declared: String },

    #[error("image failed sanitation: {0}")]
    Malformed(String),

    #[error("empty payload")]
    EmptyPayload,

    #[error("message of {chars} characters exceeds limit of {limit}")]
    MessageTooLong { chars: usize, limit: usize },
}

/// Tagged pipeline error taxonomy
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limit exceeded, retry after {}s", .retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("source {source_id} unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    #[error("identification unavailable: all sources failed")]
    AllSourcesUnavailable,

    #[error("verification unavailable: {0}")]
    VerificationUnavailable(String),

    #[error("enrichment unavailable: {0}")]
    EnrichmentUnavailable(String),

    #[error("generation provider {provider} failed: {reason}")]
    GenerationProvider { provider: String, reason: String },

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),
}

impl PipelineError {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Auth(_) => "AUTH_ERROR",
            PipelineError::RateLimited { .. } => "RATE_LIMIT_ERROR",
            PipelineError::Validation(_) => "VALIDATION_ERROR",
            PipelineError::SourceUnavailable { .. } => "SOURCE_UNAVAILABLE",
            PipelineError::AllSourcesUnavailable => "ALL_SOURCES_UNAVAILABLE",
            PipelineError::VerificationUnavailable(_) => "VERIFICATION_UNAVAILABLE",
            PipelineError::EnrichmentUnavailable(_) => "ENRICHMENT_UNAVAILABLE",
            PipelineError::GenerationProvider { .. } => "GENERATION_PROVIDER_ERROR",
            PipelineError::CacheUnavailable(_) => "CACHE_UNAVAILABLE",
        }
    }

    /// Whether this kind may terminate a request
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            PipelineError::Auth(_)
                | PipelineError::RateLimited { .. }
                | PipelineError::Validation(_)
                | PipelineError::AllSourcesUnavailable
        )
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Pipeline rejection (auth, rate limit, validation, all sources down)
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Request exceeded the server-side deadline (504)
    #[error("Request timed out")]
    Timeout,

    /// flora-common error
    #[error("Common error: {0}")]
    Common(#[from] flora_common::Error),
}

impl ApiError {
    /// Failure on our side rather than a rejected request
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ApiError::Pipeline(PipelineError::AllSourcesUnavailable)
                | ApiError::Internal(_)
                | ApiError::Timeout
                | ApiError::Common(_)
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut retry_after = None;
        let (status, error_code, message) = match self {
            ApiError::Pipeline(err) => {
                let status = match &err {
                    PipelineError::Auth(_) => StatusCode::UNAUTHORIZED,
                    PipelineError::RateLimited { retry_after: wait } => {
                        retry_after = Some(wait.as_secs().max(1));
                        StatusCode::TOO_MANY_REQUESTS
                    }
                    PipelineError::Validation(ValidationFailure::Oversize { .. }) => {
                        StatusCode::PAYLOAD_TOO_LARGE
                    }
                    PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
                    PipelineError::AllSourcesUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                    // Absorbed kinds never reach a caller; treat a leak as a server bug
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.kind(), err.to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                "Request timed out".to_string(),
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
