//! Shared fixtures for flora-id integration tests
//!
//! Fake identification sources and generators, image fixtures and an
//! in-memory `AppState` that never touches the network.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use flora_id::admission::AdmissionGate;
use flora_id::cache::{FingerprintCache, SqliteCacheStore};
use flora_id::config::Settings;
use flora_id::db::init_memory_pool;
use flora_id::ensemble::EnsembleScorer;
use flora_id::generation::{GenerationChain, Prompt, TextGenerator};
use flora_id::pipeline::{Components, Orchestrator};
use flora_id::sessions::SqliteSessionStore;
use flora_id::sources::{IdentificationSource, SourceAggregator, SourceImage};
use flora_id::types::RecognitionCandidate;
use flora_id::verification::VerificationService;
use flora_id::AppState;
use image::{ImageOutputFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const BOUNDARY: &str = "flora-test-boundary";

/// 8×8 solid-colour PNG
pub fn png(color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(8, 8, Rgb(color));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .unwrap();
    buf
}

/// Multipart body with an optional file part and text fields
pub fn multipart_body(file: Option<(&[u8], &str)>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some((bytes, content_type)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"leaf.png\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

// ============================================================================
// Fake sources
// ============================================================================

/// Source answering with a fixed candidate list
pub struct FixedSource {
    pub id: &'static str,
    pub answer: Vec<(&'static str, f64)>,
    pub calls: AtomicUsize,
}

impl FixedSource {
    pub fn new(id: &'static str, answer: Vec<(&'static str, f64)>) -> Arc<Self> {
        Arc::new(Self {
            id,
            answer,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentificationSource for FixedSource {
    fn source_id(&self) -> &str {
        self.id
    }

    async fn identify(&self, _image: &SourceImage) -> Result<Vec<RecognitionCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .answer
            .iter()
            .map(|(name, confidence)| RecognitionCandidate::new(*name, *confidence, self.id))
            .collect())
    }
}

/// Source that never answers within any sane timeout
pub struct StalledSource(pub &'static str);

#[async_trait]
impl IdentificationSource for StalledSource {
    fn source_id(&self) -> &str {
        self.0
    }

    async fn identify(&self, _image: &SourceImage) -> Result<Vec<RecognitionCandidate>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

/// Source whose provider always errors
pub struct BrokenSource(pub &'static str);

#[async_trait]
impl IdentificationSource for BrokenSource {
    fn source_id(&self) -> &str {
        self.0
    }

    async fn identify(&self, _image: &SourceImage) -> Result<Vec<RecognitionCandidate>> {
        anyhow::bail!("HTTP 502 from upstream")
    }
}

/// The two-source rose scenario: clef {damascena 0.9}, net {damascena 0.7, canina 0.3}
pub fn rose_sources() -> (Arc<FixedSource>, Arc<FixedSource>) {
    (
        FixedSource::new("plantclef", vec![("Rosa damascena", 0.9)]),
        FixedSource::new("plantnet", vec![("Rosa damascena", 0.7), ("Rosa canina", 0.3)]),
    )
}

// ============================================================================
// Fake generators
// ============================================================================

/// Generator that always fails
pub struct BrokenGenerator(pub &'static str);

#[async_trait]
impl TextGenerator for BrokenGenerator {
    fn name(&self) -> &str {
        self.0
    }

    async fn generate(&self, _prompt: &Prompt) -> Result<String> {
        anyhow::bail!("503 Service Unavailable")
    }
}

/// Generator returning a canned answer
pub struct CannedGenerator {
    pub name: &'static str,
    pub text: &'static str,
    pub calls: AtomicUsize,
}

impl CannedGenerator {
    pub fn new(name: &'static str, text: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            text,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for CannedGenerator {
    fn name(&self) -> &str {
        self.name
    }

    async fn generate(&self, _prompt: &Prompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.to_string())
    }
}

// ============================================================================
// State
// ============================================================================

/// Settings for tests: small limits, no network providers
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.admission.max_image_bytes = 64 * 1024;
    settings.server.request_timeout_ms = 5_000;
    settings
}

/// Orchestrator over fake sources and an in-memory database
pub async fn orchestrator(
    settings: &Settings,
    sources: Vec<Arc<dyn IdentificationSource>>,
    generation: GenerationChain,
) -> Orchestrator {
    let pool = init_memory_pool().await.unwrap();
    let mut aggregator = SourceAggregator::new(settings.sources.top_k_per_source);
    for source in sources {
        aggregator = aggregator.with_source(source, Duration::from_millis(200));
    }

    Orchestrator::new(
        settings,
        Components {
            admission: Arc::new(AdmissionGate::new(settings)),
            cache: Arc::new(FingerprintCache::new(
                Some(Arc::new(SqliteCacheStore::new(pool.clone()))),
                Duration::from_secs(settings.cache.ttl_secs),
            )),
            aggregator,
            scorer: EnsembleScorer::new(settings.source_weights().unwrap(), settings.ensemble.top_k),
            verification: VerificationService::disabled(),
            generation,
            sessions: Arc::new(SqliteSessionStore::new(pool)),
        },
    )
}

/// Full application state for router tests
pub async fn test_state(
    settings: Settings,
    sources: Vec<Arc<dyn IdentificationSource>>,
    generation: GenerationChain,
) -> AppState {
    let orchestrator = orchestrator(&settings, sources, generation).await;
    let db = init_memory_pool().await.unwrap();
    AppState::new(
        Arc::new(settings),
        db,
        Arc::new(orchestrator),
        CancellationToken::new(),
    )
}
