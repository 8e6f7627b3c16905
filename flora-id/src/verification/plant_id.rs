//! Plant.id knowledge-base client
//!
//! Two calls per species: `GET /kb/plants/name_search?q=..&limit=1` for an
//! access token, then `GET /kb/plants/{access_token}?details=..`.

use super::KnowledgeBase;
use crate::config::PlantIdSettings;
use crate::types::Enrichment;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const DETAIL_FIELDS: &str = "common_names,url,description,taxonomy,image";

#[derive(Debug, Deserialize)]
struct NameSearchResponse {
    #[serde(default)]
    entities: Vec<NameSearchEntity>,
}

#[derive(Debug, Deserialize)]
struct NameSearchEntity {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValueField {
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlantDetails {
    #[serde(default)]
    common_names: Option<Vec<String>>,
    #[serde(default)]
    description: Option<ValueField>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    image: Option<ValueField>,
}

pub struct PlantIdClient {
    api_key: Option<String>,
    base_url: String,
    language: String,
    client: reqwest::Client,
}

impl PlantIdClient {
    pub fn new(settings: &PlantIdSettings, language: &str) -> Result<Self> {
        Ok(Self {
            api_key: settings.api_key.clone().filter(|k| !k.trim().is_empty()),
            base_url: settings.url.trim_end_matches('/').to_string(),
            language: language.to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(settings.timeout_ms))
                .build()
                .context("Failed to build Plant.id HTTP client")?,
        })
    }

    async fn access_token(&self, api_key: &str, scientific_name: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(format!("{}/kb/plants/name_search", self.base_url))
            .query(&[("q", scientific_name), ("limit", "1")])
            .header("Api-Key", api_key)
            .send()
            .await
            .context("Plant.id name search failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Plant.id name search returned {}", response.status());
        }
        let search: NameSearchResponse = response
            .json()
            .await
            .context("Failed to parse Plant.id name search")?;
        Ok(search.entities.into_iter().find_map(|e| e.access_token))
    }
}

#[async_trait]
impl KnowledgeBase for PlantIdClient {
    fn name(&self) -> &str {
        "plant.id"
    }

    async fn describe(&self, scientific_name: &str) -> Result<Option<Enrichment>> {
        let api_key = self
            .api_key
            .as_deref()
            .context("Plant.id API key not configured")?;

        let Some(token) = self.access_token(api_key, scientific_name).await? else {
            debug!(species = %scientific_name, "Plant.id has no entry");
            return Ok(None);
        };

        let response = self
            .client
            .get(format!("{}/kb/plants/{}", self.base_url, token))
            .query(&[("details", DETAIL_FIELDS), ("language", self.language.as_str())])
            .header("Api-Key", api_key)
            .send()
            .await
            .context("Plant.id detail request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Plant.id details returned {}", response.status());
        }
        let details: PlantDetails = response
            .json()
            .await
            .context("Failed to parse Plant.id details")?;
        Ok(Some(details_to_enrichment(details)))
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

fn details_to_enrichment(details: PlantDetails) -> Enrichment {
    let non_blank = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
    Enrichment {
        reference_symbol: None,
        description: non_blank(details.description.and_then(|d| d.value)),
        common_names: details
            .common_names
            .unwrap_or_default()
            .into_iter()
            .filter(|n| !n.trim().is_empty())
            .collect(),
        url: non_blank(details.url),
        image_url: non_blank(details.image.and_then(|i| i.value)),
    }
}
