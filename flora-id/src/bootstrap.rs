//! Startup wiring
//!
//! Turns validated [`Settings`] and the database pool into live components.
//! Only sources with a configured weight are registered; a registered source
//! without credentials reports itself unavailable instead of failing startup.

use crate::admission::AdmissionGate;
use crate::cache::{FingerprintCache, SqliteCacheStore};
use crate::config::Settings;
use crate::ensemble::EnsembleScorer;
use crate::generation::{GenerationChain, OpenAiCompatibleGenerator};
use crate::pipeline::{Components, Orchestrator};
use crate::sessions::SqliteSessionStore;
use crate::sources::{
    IdentificationSource, PlantClefClient, PlantNetClient, SourceAggregator, PLANTCLEF_SOURCE,
    PLANTNET_SOURCE,
};
use crate::verification::{
    KnowledgeBase, PlantIdClient, ReferenceLookup, SqliteReferenceDataset, VerificationService,
};
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Build the orchestrator from settings
pub async fn build_orchestrator(settings: &Settings, pool: &SqlitePool) -> Result<Orchestrator> {
    let components = build_components(settings, pool).await?;
    Ok(Orchestrator::new(settings, components))
}

pub async fn build_components(settings: &Settings, pool: &SqlitePool) -> Result<Components> {
    let weights = settings.source_weights()?;

    let cache = FingerprintCache::new(
        Some(Arc::new(SqliteCacheStore::new(pool.clone()))),
        Duration::from_secs(settings.cache.ttl_secs),
    );

    Ok(Components {
        admission: Arc::new(AdmissionGate::new(settings)),
        cache: Arc::new(cache),
        aggregator: build_aggregator(settings)?,
        scorer: EnsembleScorer::new(weights, settings.ensemble.top_k),
        verification: build_verification(settings, pool).await?,
        generation: build_generation(settings)?,
        sessions: Arc::new(SqliteSessionStore::new(pool.clone())),
    })
}

fn build_aggregator(settings: &Settings) -> Result<SourceAggregator> {
    let sources = &settings.sources;
    let mut aggregator = SourceAggregator::new(sources.top_k_per_source);

    for source_id in settings.source_weights()?.sources() {
        let timeout = sources.timeout_for(source_id);
        let source: Arc<dyn IdentificationSource> = match source_id.as_str() {
            PLANTCLEF_SOURCE => Arc::new(PlantClefClient::new(&sources.plantclef, timeout)?),
            PLANTNET_SOURCE => Arc::new(PlantNetClient::new(&sources.plantnet, timeout)?),
            other => anyhow::bail!("No adapter for identification source '{}'", other),
        };
        info!(
            source = %source_id,
            available = source.is_available(),
            timeout_ms = timeout.as_millis() as u64,
            "Identification source registered"
        );
        aggregator = aggregator.with_source(source, timeout);
    }
    Ok(aggregator)
}

async fn build_verification(settings: &Settings, pool: &SqlitePool) -> Result<VerificationService> {
    let verification = &settings.verification;
    let dataset = SqliteReferenceDataset::new(pool.clone());

    if let Some(path) = &verification.reference_csv {
        if let Err(e) = dataset.import_csv(path).await {
            warn!("Reference checklist {} not imported: {:#}", path.display(), e);
        }
    }
    let taxa = dataset.count().await.unwrap_or(0);
    if taxa == 0 {
        warn!("Reference dataset is empty; every candidate will be unverified");
    }

    let plant_id = PlantIdClient::new(&verification.plant_id, &settings.generation.language)?;
    let knowledge_base: Option<Arc<dyn KnowledgeBase>> = if plant_id.is_available() {
        Some(Arc::new(plant_id))
    } else {
        info!("Plant.id API key not configured, enrichment disabled");
        None
    };

    let reference: Arc<dyn ReferenceLookup> = Arc::new(dataset);
    Ok(VerificationService::new(
        Some(reference),
        knowledge_base,
        verification.enrich_top_n,
    ))
}

fn build_generation(settings: &Settings) -> Result<GenerationChain> {
    let generation = &settings.generation;
    let mut chain = GenerationChain::new();

    for name in generation.remote_order() {
        let provider = generation
            .providers
            .get(&name)
            .with_context(|| format!("Generation provider '{}' is not configured", name))?;
        let timeout = generation.timeout_for(&name);
        let generator = OpenAiCompatibleGenerator::new(&name, provider, timeout)?;
        chain = chain.with_provider(Arc::new(generator), timeout);
    }

    info!("Generation chain: {}", chain.provider_names().join(" → "));
    Ok(chain)
}
