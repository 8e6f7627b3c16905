//! HTTP API handlers for flora-id
//!
//! Handlers stay thin: extract the client identity and payload, run one
//! orchestrator call under the request deadline, shape the JSON.

pub mod chat;
pub mod client;
pub mod health;
pub mod history;
pub mod recognize;

pub use chat::chat_routes;
pub use health::health_routes;
pub use history::history_routes;
pub use recognize::recognize_routes;

use crate::admission::ImageUpload;
use crate::error::{ApiError, ApiResult, PipelineError};
use crate::types::{EnsembleEntry, Enrichment};
use crate::AppState;
use axum::body::Bytes;
use axum::extract::Multipart;
use axum::http::StatusCode;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One ranked plant as returned to clients
#[derive(Debug, Clone, Serialize)]
pub struct PlantView {
    pub scientific_name: String,
    pub common_name: Option<String>,
    pub family: Option<String>,
    /// Weighted ensemble score
    pub confidence: f64,
    pub source_scores: BTreeMap<String, f64>,
    /// "plantclef", "plantnet" or "plantclef+plantnet"
    pub source: String,
    pub verified: bool,
    #[serde(flatten)]
    pub enrichment: Enrichment,
}

impl From<&EnsembleEntry> for PlantView {
    fn from(entry: &EnsembleEntry) -> Self {
        Self {
            scientific_name: entry.scientific_name.clone(),
            common_name: entry.common_name.clone(),
            family: entry.family.clone(),
            confidence: entry.weighted_score,
            source_scores: entry.source_scores.clone(),
            source: entry.source_label(),
            verified: entry.verified,
            enrichment: entry.enrichment.clone(),
        }
    }
}

/// Multipart form of the image endpoints
#[derive(Debug)]
pub struct ImageForm {
    pub image: ImageUpload,
    pub message: Option<String>,
    pub session_id: Option<String>,
}

/// Read `file` (or `image`), `message` and `session_id` fields
///
/// A missing file becomes an empty upload and a body cut off at
/// `body_limit` becomes a cut-off upload, so the admission gate reports
/// both after the credential and rate checks.
pub async fn read_image_form(mut multipart: Multipart, body_limit: usize) -> ApiResult<ImageForm> {
    let mut image = None;
    let mut message = None;
    let mut session_id = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                image = Some(cut_off(image, body_limit));
                break;
            }
            Err(e) => return Err(ApiError::BadRequest(format!("Malformed multipart body: {}", e))),
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "image" => {
                let content_type = field.content_type().map(str::to_string);
                let file_name = field.file_name().map(str::to_string);
                let bytes = match field.bytes().await {
                    Ok(bytes) => bytes,
                    Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                        debug!(limit = body_limit, "Upload cut off at body limit");
                        image = Some(ImageUpload::cut_off(body_limit, content_type));
                        break;
                    }
                    Err(e) => {
                        return Err(ApiError::BadRequest(format!("Failed to read upload: {}", e)))
                    }
                };
                let mut upload = ImageUpload::new(bytes, content_type);
                upload.file_name = file_name;
                image = Some(upload);
            }
            "message" | "session_id" => {
                let value = match field.text().await {
                    Ok(value) => value,
                    Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                        image = Some(cut_off(image, body_limit));
                        break;
                    }
                    Err(e) => {
                        return Err(ApiError::BadRequest(format!("Failed to read {}: {}", name, e)))
                    }
                };
                if name == "message" {
                    message = Some(value);
                } else {
                    session_id = Some(value);
                }
            }
            _ => {}
        }
    }

    Ok(ImageForm {
        image: image.unwrap_or_else(|| ImageUpload::new(Bytes::new(), None)),
        message,
        session_id,
    })
}

/// Cut-off upload keeping the declared type of a file part already read
fn cut_off(image: Option<ImageUpload>, body_limit: usize) -> ImageUpload {
    debug!(limit = body_limit, "Request body cut off at limit");
    ImageUpload::cut_off(body_limit, image.and_then(|upload| upload.content_type))
}

/// Run one pipeline call under the request deadline
///
/// The call gets a child of the shutdown token. The token is cancelled when
/// this future completes or is dropped (client disconnect), so no provider
/// call outlives its request.
pub async fn run_guarded<T, F, Fut>(state: &AppState, call: F) -> ApiResult<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();

    let result = match tokio::time::timeout(state.request_timeout(), call(cancel)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ApiError::from(e)),
        Err(_) => {
            warn!(
                "Request exceeded {} ms deadline",
                state.request_timeout().as_millis()
            );
            Err(ApiError::Timeout)
        }
    };

    if let Err(e) = &result {
        state.record_error(e).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_plant_view_flattens_enrichment() {
        let entry = EnsembleEntry {
            scientific_name: "Rosa damascena".to_string(),
            common_name: None,
            family: Some("Rosaceae".to_string()),
            weighted_score: 0.82,
            source_scores: BTreeMap::from([
                ("plantclef".to_string(), 0.9),
                ("plantnet".to_string(), 0.7),
            ]),
            contributing_sources: BTreeSet::from(["plantclef".to_string(), "plantnet".to_string()]),
            verified: true,
            enrichment: Enrichment {
                reference_symbol: Some("RODA".to_string()),
                ..Default::default()
            },
        };

        let json = serde_json::to_value(PlantView::from(&entry)).unwrap();
        assert_eq!(json["source"], "plantclef+plantnet");
        assert_eq!(json["reference_symbol"], "RODA");
        assert_eq!(json["confidence"], 0.82);
        assert!(json.get("description").is_none());
    }
}
