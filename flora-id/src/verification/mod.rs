//! Verification and enrichment
//!
//! Every ranked entry is checked against the reference checklist; a hit
//! marks it verified and fills missing taxonomy. The top entries are then
//! enriched from the external knowledge base. Neither step can fail the
//! pipeline: lookup errors leave entries unverified or unenriched.

pub mod plant_id;
pub mod reference;

pub use plant_id::PlantIdClient;
pub use reference::{ReferenceLookup, ReferencePlant, SqliteReferenceDataset};

use crate::error::PipelineError;
use crate::types::{EnsembleEntry, EnsembleResult, Enrichment};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Descriptive lookup by scientific name
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when the knowledge base has no entry
    async fn describe(&self, scientific_name: &str) -> Result<Option<Enrichment>>;

    fn is_available(&self) -> bool {
        true
    }
}

pub struct VerificationService {
    reference: Option<Arc<dyn ReferenceLookup>>,
    knowledge_base: Option<Arc<dyn KnowledgeBase>>,
    enrich_top_n: usize,
}

impl VerificationService {
    pub fn new(
        reference: Option<Arc<dyn ReferenceLookup>>,
        knowledge_base: Option<Arc<dyn KnowledgeBase>>,
        enrich_top_n: usize,
    ) -> Self {
        Self {
            reference,
            knowledge_base,
            enrich_top_n,
        }
    }

    /// Service that changes nothing
    pub fn disabled() -> Self {
        Self::new(None, None, 0)
    }

    pub fn reference(&self) -> Option<&Arc<dyn ReferenceLookup>> {
        self.reference.as_ref()
    }

    /// Verify every entry, then enrich the top `enrich_top_n`
    ///
    /// Order and scores are never changed.
    pub async fn verify_and_enrich(&self, result: &mut EnsembleResult) {
        if let Some(reference) = &self.reference {
            for entry in result.entries.iter_mut() {
                verify_entry(reference.as_ref(), entry).await;
            }
        }

        let Some(kb) = self.knowledge_base.as_ref().filter(|kb| kb.is_available()) else {
            return;
        };
        let n = self.enrich_top_n.min(result.entries.len());
        let lookups = result.entries[..n]
            .iter()
            .map(|entry| kb.describe(&entry.scientific_name));
        let outcomes = join_all(lookups).await;

        for (entry, outcome) in result.entries.iter_mut().zip(outcomes) {
            match outcome {
                Ok(Some(enrichment)) => apply_enrichment(entry, enrichment),
                Ok(None) => {}
                Err(e) => {
                    let err = PipelineError::EnrichmentUnavailable(format!(
                        "{} for {}: {:#}",
                        kb.name(),
                        entry.scientific_name,
                        e
                    ));
                    warn!("{}", err);
                }
            }
        }
    }
}

async fn verify_entry(reference: &dyn ReferenceLookup, entry: &mut EnsembleEntry) {
    match reference.lookup(&entry.scientific_name).await {
        Ok(Some(plant)) => {
            entry.verified = true;
            entry.enrichment.reference_symbol = Some(plant.symbol);
            if entry.family.is_none() {
                entry.family = plant.family;
            }
            if entry.common_name.is_none() {
                entry.common_name = plant.common_name;
            }
            debug!(species = %entry.scientific_name, "Reference match");
        }
        Ok(None) => debug!(species = %entry.scientific_name, "Not in reference dataset"),
        Err(e) => {
            let err = PipelineError::VerificationUnavailable(format!("{:#}", e));
            warn!(species = %entry.scientific_name, "{}", err);
        }
    }
}

fn apply_enrichment(entry: &mut EnsembleEntry, enrichment: Enrichment) {
    if entry.common_name.is_none() {
        entry.common_name = enrichment.common_names.first().cloned();
    }
    let target = &mut entry.enrichment;
    target.description = enrichment.description.or(target.description.take());
    if !enrichment.common_names.is_empty() {
        target.common_names = enrichment.common_names;
    }
    target.url = enrichment.url.or(target.url.take());
    target.image_url = enrichment.image_url.or(target.image_url.take());
}
