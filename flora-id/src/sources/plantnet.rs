//! Pl@ntNet v2 identify client
//!
//! POST `{url}?api-key=..` with multipart `images` + `organs`. Pl@ntNet only
//! accepts JPEG reliably, so other formats are re-encoded first.

use super::{IdentificationSource, SourceImage, PLANTNET_SOURCE};
use crate::config::PlantNetSettings;
use crate::types::RecognitionCandidate;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use governor::{Quota, RateLimiter};
use image::ImageOutputFormat;
use serde::Deserialize;
use std::io::Cursor;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, warn};

const JPEG_QUALITY: u8 = 95;

#[derive(Debug, Deserialize)]
struct IdentifyResponse {
    /// Absent or `null` when nothing matched
    #[serde(default)]
    results: Option<Vec<IdentifyResult>>,
}

#[derive(Debug, Deserialize)]
struct IdentifyResult {
    #[serde(default)]
    score: f64,
    species: Species,
    #[serde(default)]
    gbif: Option<GbifRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Species {
    #[serde(default)]
    scientific_name_without_author: String,
    #[serde(default)]
    common_names: Vec<String>,
    #[serde(default)]
    family: Option<Taxon>,
    #[serde(default)]
    genus: Option<Taxon>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Taxon {
    #[serde(default)]
    scientific_name_without_author: String,
}

#[derive(Debug, Deserialize)]
struct GbifRef {
    id: Option<serde_json::Value>,
}

pub struct PlantNetClient {
    api_key: Option<String>,
    url: String,
    organ: String,
    client: reqwest::Client,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl PlantNetClient {
    pub fn new(settings: &PlantNetSettings, timeout: Duration) -> Result<Self> {
        let per_second = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            api_key: settings.api_key.clone().filter(|k| !k.trim().is_empty()),
            url: settings.url.clone(),
            organ: settings.organ.clone(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .context("Failed to build Pl@ntNet HTTP client")?,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }
}

#[async_trait]
impl IdentificationSource for PlantNetClient {
    fn source_id(&self) -> &str {
        PLANTNET_SOURCE
    }

    async fn identify(&self, image: &SourceImage) -> Result<Vec<RecognitionCandidate>> {
        let api_key = self
            .api_key
            .as_deref()
            .context("Pl@ntNet API key not configured")?;

        let jpeg = if image.content_type == "image/jpeg" {
            image.bytes.clone()
        } else {
            let bytes = image.bytes.clone();
            tokio::task::spawn_blocking(move || ensure_jpeg(bytes))
                .await
                .context("JPEG conversion task failed")?
        };

        let part = reqwest::multipart::Part::bytes(jpeg.to_vec())
            .file_name("plant.jpg")
            .mime_str("image/jpeg")
            .context("Invalid multipart MIME type")?;
        let form = reqwest::multipart::Form::new()
            .part("images", part)
            .text("organs", self.organ.clone());

        self.rate_limiter.until_ready().await;
        debug!(fingerprint = %image.fingerprint.short(), organ = %self.organ, "Querying Pl@ntNet");

        let response = self
            .client
            .post(&self.url)
            .query(&[("api-key", api_key)])
            .multipart(form)
            .send()
            .await
            .context("Pl@ntNet request failed")?;

        // 404 is Pl@ntNet's "species not found"
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("Pl@ntNet found no matching species");
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            anyhow::bail!("Pl@ntNet returned error: {}", response.status());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse Pl@ntNet response")?;
        parse_identify_response(body)
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Convert a Pl@ntNet identify body into candidates, provider order kept
pub fn parse_identify_response(body: serde_json::Value) -> Result<Vec<RecognitionCandidate>> {
    let results = body.get("results").cloned().unwrap_or_default();
    let parsed: IdentifyResponse =
        serde_json::from_value(serde_json::json!({ "results": results }))
            .context("Unexpected Pl@ntNet result structure")?;

    let raw_results = results.as_array().cloned().unwrap_or_default();
    Ok(parsed
        .results
        .unwrap_or_default()
        .into_iter()
        .zip(raw_results)
        .map(|(result, raw)| {
            let species = result.species;
            let family = species
                .family
                .map(|f| f.scientific_name_without_author);
            let genus = species.genus.map(|g| g.scientific_name_without_author);
            debug!(
                species = %species.scientific_name_without_author,
                genus = ?genus,
                gbif = ?result.gbif.and_then(|g| g.id),
                score = result.score,
                "Pl@ntNet candidate"
            );
            RecognitionCandidate::new(
                species.scientific_name_without_author,
                result.score,
                PLANTNET_SOURCE,
            )
            .with_common_name(species.common_names.into_iter().next())
            .with_family(family)
            .with_payload(raw)
        })
        .collect())
}

/// Re-encode as JPEG; the original bytes are returned when decoding fails
fn ensure_jpeg(bytes: Bytes) -> Bytes {
    let decoded = match image::load_from_memory(&bytes) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("JPEG conversion skipped, image not decodable: {}", e);
            return bytes;
        }
    };
    let rgb = image::DynamicImage::ImageRgb8(decoded.to_rgb8());
    let mut out = Vec::new();
    match rgb.write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Jpeg(JPEG_QUALITY)) {
        Ok(()) => Bytes::from(out),
        Err(e) => {
            warn!("JPEG conversion failed: {}", e);
            bytes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::image_guard::fixtures::png;
    use serde_json::json;

    #[test]
    fn test_parse_results_keeps_order() {
        let body = json!({
            "query": {"organs": ["auto"]},
            "results": [
                {
                    "score": 0.71,
                    "species": {
                        "scientificNameWithoutAuthor": "Rosa damascena",
                        "scientificName": "Rosa damascena Mill.",
                        "commonNames": ["Damask rose", "Şam gülü"],
                        "family": {"scientificNameWithoutAuthor": "Rosaceae"},
                        "genus": {"scientificNameWithoutAuthor": "Rosa"}
                    },
                    "gbif": {"id": "3003918"}
                },
                {
                    "score": 0.12,
                    "species": {"scientificNameWithoutAuthor": "Rosa canina", "commonNames": []}
                }
            ]
        });
        let candidates = parse_identify_response(body).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].scientific_name, "Rosa damascena");
        assert_eq!(candidates[0].common_name.as_deref(), Some("Damask rose"));
        assert_eq!(candidates[0].family.as_deref(), Some("Rosaceae"));
        assert_eq!(candidates[0].raw_payload["gbif"]["id"], "3003918");
        assert_eq!(candidates[1].common_name, None);
        assert_eq!(candidates[1].source_id, "plantnet");
    }

    #[test]
    fn test_missing_results_is_empty() {
        assert!(parse_identify_response(json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_null_results_is_empty() {
        let body = json!({"query": {"organs": ["auto"]}, "results": null});
        assert!(parse_identify_response(body).unwrap().is_empty());
    }

    #[test]
    fn test_png_is_converted_to_jpeg() {
        let converted = ensure_jpeg(Bytes::from(png([200, 10, 10])));
        assert_eq!(infer::get(&converted).unwrap().mime_type(), "image/jpeg");
    }

    #[test]
    fn test_undecodable_bytes_pass_through() {
        let raw = Bytes::from_static(b"garbage");
        assert_eq!(ensure_jpeg(raw.clone()), raw);
    }
}
