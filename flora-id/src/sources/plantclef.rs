//! PlantCLEF zero-shot classifier client
//!
//! The classifier is a remote label endpoint. The image goes up as a
//! base64 data URL in a JSON body; the reply is a label output in one of
//! these shapes:
//!
//! - `{"data": [{"label": .., "confidences": [{"label", "confidence"}]}]}`
//! - `{"label": .., "confidences": [..]}`
//! - `{"<species>": <probability>, ..}`
//!
//! A label starting with `Error:` is the classifier reporting a failure.

use super::{IdentificationSource, SourceImage, PLANTCLEF_SOURCE};
use crate::config::PlantClefSettings;
use crate::types::RecognitionCandidate;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use governor::{Quota, RateLimiter};
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct PlantClefClient {
    url: Option<String>,
    client: reqwest::Client,
    rate_limiter: DirectLimiter,
}

impl PlantClefClient {
    pub fn new(settings: &PlantClefSettings, timeout: Duration) -> Result<Self> {
        let per_second = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            url: settings
                .url
                .clone()
                .filter(|u| !u.trim().is_empty()),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .context("Failed to build PlantCLEF HTTP client")?,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }
}

#[async_trait]
impl IdentificationSource for PlantClefClient {
    fn source_id(&self) -> &str {
        PLANTCLEF_SOURCE
    }

    async fn identify(&self, image: &SourceImage) -> Result<Vec<RecognitionCandidate>> {
        let url = self
            .url
            .as_deref()
            .context("PlantCLEF endpoint not configured")?;

        let encoded = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
        let body = json!({
            "data": [format!("data:{};base64,{}", image.content_type, encoded)]
        });

        self.rate_limiter.until_ready().await;
        debug!(fingerprint = %image.fingerprint.short(), "Querying PlantCLEF classifier");

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("PlantCLEF request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("PlantCLEF returned error: {}", response.status());
        }

        let payload: Value = response
            .json()
            .await
            .context("Failed to parse PlantCLEF response")?;

        let labels = parse_label_output(&payload)?;
        Ok(labels
            .into_iter()
            .map(|(label, confidence)| {
                RecognitionCandidate::new(label.clone(), confidence, PLANTCLEF_SOURCE).with_payload(
                    json!({ "label": label, "confidence": confidence }),
                )
            })
            .collect())
    }

    fn is_available(&self) -> bool {
        self.url.is_some()
    }
}

/// Extract `(label, confidence)` pairs, highest confidence first
pub fn parse_label_output(payload: &Value) -> Result<Vec<(String, f64)>> {
    let output = match payload.get("data").and_then(Value::as_array) {
        Some(data) => data.first().context("PlantCLEF returned empty data array")?,
        None => payload,
    };

    let mut labels: Vec<(String, f64)> = if let Some(confidences) =
        output.get("confidences").and_then(Value::as_array)
    {
        confidences
            .iter()
            .filter_map(|entry| {
                let label = entry.get("label")?.as_str()?;
                let confidence = entry.get("confidence")?.as_f64()?;
                Some((label.to_string(), confidence))
            })
            .collect()
    } else if let Some(map) = output.as_object() {
        map.iter()
            .filter_map(|(label, value)| value.as_f64().map(|c| (label.clone(), c)))
            .collect()
    } else {
        anyhow::bail!("Unrecognized PlantCLEF response shape");
    };

    if let Some((error, _)) = labels.iter().find(|(label, _)| label.starts_with("Error:")) {
        anyhow::bail!("PlantCLEF classifier reported {}", error);
    }
    if let Some(top) = output.get("label").and_then(Value::as_str) {
        if top.starts_with("Error:") {
            anyhow::bail!("PlantCLEF classifier reported {}", top);
        }
    }

    labels.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(labels)
}
