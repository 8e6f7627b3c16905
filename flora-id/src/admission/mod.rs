//! Admission gate
//!
//! Runs before any expensive work. Checks, first failure wins:
//!
//! 1. Credential (only when `admission.require_api_key` is set)
//! 2. Rate limit for the endpoint tier
//! 3. Payload size
//! 4. Declared content type against the allow-list
//! 5. Magic-byte signature against the declared type
//! 6. Sanitation re-decode (when `admission.sanitize` is set)
//! 7. Chat message cleanup and length limit
//!
//! Steps 3-6 only run when an image is attached. A request rejected after
//! step 2 gives its rate-limit slot back, so only admitted requests consume
//! budget.

pub mod image_guard;
pub mod rate_limiter;
pub mod text;

pub use image_guard::{normalize_content_type, ImageGuard, ImageUpload};
pub use rate_limiter::{RateLimiter, RatePermit, RateTier};

use crate::config::Settings;
use crate::error::{PipelineError, ValidationFailure};
use axum::http::HeaderMap;
use flora_common::auth::CredentialSet;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// Header carrying the client API key
pub const API_KEY_HEADER: &str = "x-api-key";
/// Header carrying an explicit user identifier
pub const USER_ID_HEADER: &str = "x-user-id";

/// Everything the gate looks at for one request
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    pub credential: Option<&'a str>,
    pub client_id: &'a str,
    pub tier: RateTier,
    pub image: Option<&'a ImageUpload>,
    pub message: Option<&'a str>,
}

/// Accepted verdict
#[derive(Debug, Clone)]
pub struct Admitted {
    pub client_id: String,
    pub tier: RateTier,
    /// Normalized MIME type of the admitted image
    pub content_type: Option<String>,
    /// Cleaned chat message
    pub message: Option<String>,
}

/// Client identity: explicit user id, first forwarded hop, peer address
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    if let Some(user) = header_value(USER_ID_HEADER) {
        return format!("user:{}", user);
    }
    if let Some(forwarded) = header_value("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Credential from `X-API-Key` or `Authorization: Bearer`
pub fn credential_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key.trim().to_string());
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

/// Process-wide admission state
#[derive(Debug)]
pub struct AdmissionGate {
    require_api_key: bool,
    credentials: CredentialSet,
    rate_limiter: RateLimiter,
    image_guard: ImageGuard,
    max_message_chars: usize,
}

impl AdmissionGate {
    pub fn new(settings: &Settings) -> Self {
        let admission = &settings.admission;
        let credentials = CredentialSet::from_keys(admission.api_keys.iter());
        if admission.require_api_key && credentials.is_empty() {
            warn!("API keys are required but none are configured; all requests will be rejected");
        } else if admission.require_api_key {
            debug!(keys = credentials.len(), "API key check enabled");
        }
        Self {
            require_api_key: admission.require_api_key,
            credentials,
            rate_limiter: RateLimiter::new(settings.rate_limit.clone()),
            image_guard: ImageGuard::new(admission),
            max_message_chars: admission.max_message_chars,
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Run every check in order
    ///
    /// # Returns
    /// * `Ok(Admitted)` - rate-limit slot consumed
    /// * `Err(PipelineError)` - `Auth`, `RateLimited` or `Validation`
    pub async fn admit(&self, request: AdmissionRequest<'_>) -> Result<Admitted, PipelineError> {
        if self.require_api_key {
            if let Err(e) = self.credentials.verify(request.credential) {
                info!(client = %request.client_id, "Rejected request: {}", e);
                return Err(PipelineError::Auth(e.to_string()));
            }
        }

        let permit = self
            .rate_limiter
            .try_acquire(request.client_id, request.tier)
            .map_err(|retry_after| {
                info!(
                    client = %request.client_id,
                    tier = %request.tier,
                    "Rejected request: rate limit exceeded"
                );
                PipelineError::RateLimited { retry_after }
            })?;

        let checked = self.check_payload(&request).await;
        let (content_type, message) = match checked {
            Ok(checked) => checked,
            Err(failure) => {
                self.rate_limiter.release(permit);
                info!(client = %request.client_id, "Rejected request: {}", failure);
                return Err(PipelineError::Validation(failure));
            }
        };

        debug!(client = %request.client_id, tier = %request.tier, "Request admitted");
        Ok(Admitted {
            client_id: request.client_id.to_string(),
            tier: request.tier,
            content_type,
            message,
        })
    }

    async fn check_payload(
        &self,
        request: &AdmissionRequest<'_>,
    ) -> Result<(Option<String>, Option<String>), ValidationFailure> {
        let content_type = match request.image {
            Some(upload) => Some(self.check_image(upload).await?),
            None => None,
        };
        let message = request
            .message
            .map(|raw| text::sanitize_message(raw, self.max_message_chars))
            .transpose()?;
        Ok((content_type, message))
    }

    async fn check_image(&self, upload: &ImageUpload) -> Result<String, ValidationFailure> {
        self.image_guard.check_size(upload.len())?;
        let mime = self
            .image_guard
            .check_content_type(upload.content_type.as_deref())?;
        self.image_guard.check_signature(&upload.bytes, &mime)?;

        if self.image_guard.sanitize_enabled() {
            let guard = self.image_guard.clone();
            let bytes = upload.bytes.clone();
            let declared = mime.clone();
            tokio::task::spawn_blocking(move || guard.sanitize(&bytes, &declared))
                .await
                .map_err(|e| ValidationFailure::Malformed(format!("sanitation aborted: {}", e)))??;
        }
        Ok(mime)
    }
}
