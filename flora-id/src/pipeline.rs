//! Request orchestrator
//!
//! Drives one request through the components in order:
//!
//! ```text
//! Admission → Fingerprint Cache ─hit──────────────────────┐
//!                   └─miss→ Aggregating → Scoring → Verifying → Generating → Session append
//! ```
//!
//! Only admission rejections and [`PipelineError::AllSourcesUnavailable`]
//! end a request early. Every other stage failure is absorbed where it
//! happens and logged.
//!
//! The orchestrator owns no global state: cache, limiter and session store
//! are built at startup and handed in through [`Components`].

use crate::admission::{AdmissionGate, AdmissionRequest, Admitted, ImageUpload, RateTier};
use crate::cache::{
    fingerprint_image, request_key, CacheKey, CachedPayload, CachedRecognition, FingerprintCache,
    FingerprintMode,
};
use crate::config::Settings;
use crate::ensemble::EnsembleScorer;
use crate::error::PipelineError;
use crate::generation::{GeneratedResponse, GenerationChain, GenerationContext};
use crate::sessions::{resolve_session_id, SessionStore};
use crate::sources::{SourceAggregator, SourceImage};
use crate::types::{ChatTurn, EnsembleResult, ImageFingerprint};
use crate::verification::VerificationService;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Stage of an image request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validated,
    CachedHit,
    Aggregating,
    Scoring,
    Verifying,
    Generating,
    Delivered,
}

/// Caller identity as seen by the admission gate
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub client_id: String,
    pub credential: Option<String>,
}

impl ClientContext {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }
}

/// Everything the orchestrator is built from
pub struct Components {
    pub admission: Arc<AdmissionGate>,
    pub cache: Arc<FingerprintCache>,
    pub aggregator: SourceAggregator,
    pub scorer: EnsembleScorer,
    pub verification: VerificationService,
    pub generation: GenerationChain,
    pub sessions: Arc<dyn SessionStore>,
}

/// Result of `POST /recognize`
#[derive(Debug, Clone)]
pub struct RecognizeOutcome {
    pub fingerprint: ImageFingerprint,
    pub recognition: CachedRecognition,
    pub cached: bool,
}

/// Result of `POST /chat`
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub session_id: String,
    pub response: GeneratedResponse,
    pub timestamp: DateTime<Utc>,
}

/// Result of `POST /chat-with-image`
#[derive(Debug, Clone)]
pub struct ImageChatOutcome {
    pub session_id: String,
    pub response: GeneratedResponse,
    pub ensemble: EnsembleResult,
    pub fingerprint: ImageFingerprint,
    pub cached: bool,
    pub stages: Vec<Stage>,
    pub timestamp: DateTime<Utc>,
}

pub struct Orchestrator {
    admission: Arc<AdmissionGate>,
    cache: Arc<FingerprintCache>,
    aggregator: SourceAggregator,
    scorer: EnsembleScorer,
    verification: VerificationService,
    generation: GenerationChain,
    sessions: Arc<dyn SessionStore>,
    fingerprint_mode: FingerprintMode,
    language: String,
}

impl Orchestrator {
    pub fn new(settings: &Settings, components: Components) -> Self {
        Self {
            admission: components.admission,
            cache: components.cache,
            aggregator: components.aggregator,
            scorer: components.scorer,
            verification: components.verification,
            generation: components.generation,
            sessions: components.sessions,
            fingerprint_mode: settings.cache.fingerprint_mode,
            language: settings.generation.language.clone(),
        }
    }

    pub fn admission(&self) -> &AdmissionGate {
        &self.admission
    }

    pub fn cache(&self) -> &Arc<FingerprintCache> {
        &self.cache
    }

    pub fn aggregator(&self) -> &SourceAggregator {
        &self.aggregator
    }

    pub fn scorer(&self) -> &EnsembleScorer {
        &self.scorer
    }

    pub fn verification(&self) -> &VerificationService {
        &self.verification
    }

    pub fn generation(&self) -> &GenerationChain {
        &self.generation
    }

    /// Admission for cheap endpoints without a payload
    pub async fn admit_standard(&self, client: &ClientContext) -> Result<Admitted, PipelineError> {
        self.admit(client, RateTier::Standard, None, None).await
    }

    async fn admit(
        &self,
        client: &ClientContext,
        tier: RateTier,
        image: Option<&ImageUpload>,
        message: Option<&str>,
    ) -> Result<Admitted, PipelineError> {
        self.admission
            .admit(AdmissionRequest {
                credential: client.credential.as_deref(),
                client_id: &client.client_id,
                tier,
                image,
                message,
            })
            .await
    }

    /// Identify an image without generating an answer
    pub async fn recognize(
        &self,
        client: &ClientContext,
        upload: ImageUpload,
        cancel: &CancellationToken,
    ) -> Result<RecognizeOutcome, PipelineError> {
        let admitted = self.admit(client, RateTier::Strict, Some(&upload), None).await?;
        let image = self.source_image(upload, &admitted).await;
        let mut stages = Vec::new();
        let (recognition, cached) = self.identify(&image, cancel, &mut stages).await?;

        Ok(RecognizeOutcome {
            fingerprint: image.fingerprint,
            recognition,
            cached,
        })
    }

    /// Text-only chat turn
    ///
    /// Uses the most recent identification in the session as context. First
    /// turns are answered from the request cache when possible.
    pub async fn chat(
        &self,
        client: &ClientContext,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<ChatOutcome, PipelineError> {
        let admitted = self
            .admit(client, RateTier::Standard, None, Some(message))
            .await?;
        let question = admitted.message.unwrap_or_default();
        let session_id = resolve_session_id(session_id);
        let history = self.read_history(&session_id).await;
        let ensemble = latest_ensemble(&history);

        let first_turn = history.is_empty();
        let cache_key = CacheKey::Request(request_key(&question, &self.language));
        let cached = if first_turn {
            match self.cache.lookup(&cache_key).await {
                Some(CachedPayload::Generated { text, provider }) => {
                    debug!(session_id = %session_id, "Chat answer served from cache");
                    Some(GeneratedResponse { text, provider })
                }
                _ => None,
            }
        } else {
            None
        };

        let response = match cached {
            Some(response) => response,
            None => {
                let context = GenerationContext {
                    question: question.clone(),
                    ensemble: ensemble.clone(),
                    history: history.clone(),
                    language: self.language.clone(),
                };
                let response = self.generation.generate(&context).await;
                if first_turn && !response.is_template() {
                    self.cache
                        .store(
                            &cache_key,
                            &CachedPayload::Generated {
                                text: response.text.clone(),
                                provider: response.provider.clone(),
                            },
                        )
                        .await;
                }
                response
            }
        };

        self.append_turns(&session_id, &question, &response.text, None)
            .await;

        Ok(ChatOutcome {
            session_id,
            response,
            timestamp: Utc::now(),
        })
    }

    /// Full pipeline: identify the image, then answer the message about it
    pub async fn chat_with_image(
        &self,
        client: &ClientContext,
        upload: ImageUpload,
        message: &str,
        session_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ImageChatOutcome, PipelineError> {
        let admitted = self
            .admit(client, RateTier::Strict, Some(&upload), Some(message))
            .await?;
        let question = admitted.message.clone().unwrap_or_default();
        let session_id = resolve_session_id(session_id);
        let mut stages = vec![Stage::Validated];

        let image = self.source_image(upload, &admitted).await;
        let (recognition, cached) = match self.identify(&image, cancel, &mut stages).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session_id = %session_id, stages = ?stages, "Request failed: {}", e);
                return Err(e);
            }
        };
        let ensemble = recognition.ensemble;

        stages.push(Stage::Generating);
        let history = self.read_history(&session_id).await;
        let context = GenerationContext {
            question: question.clone(),
            ensemble: Some(ensemble.clone()),
            history,
            language: self.language.clone(),
        };
        let response = self.generation.generate(&context).await;

        self.append_turns(&session_id, &question, &response.text, Some(&ensemble))
            .await;
        stages.push(Stage::Delivered);

        info!(
            session_id = %session_id,
            fingerprint = %image.fingerprint.short(),
            matches = ensemble.len(),
            provider = %response.provider,
            cached,
            "Image chat delivered"
        );

        Ok(ImageChatOutcome {
            session_id,
            response,
            ensemble,
            fingerprint: image.fingerprint,
            cached,
            stages,
            timestamp: Utc::now(),
        })
    }

    /// Turns of a session, `None` when the session has never been written
    pub async fn history(&self, session_id: &str) -> flora_common::Result<Option<Vec<ChatTurn>>> {
        let turns = self.sessions.read(session_id).await?;
        if turns.is_empty() {
            Ok(None)
        } else {
            Ok(Some(turns))
        }
    }

    async fn source_image(&self, upload: ImageUpload, admitted: &Admitted) -> SourceImage {
        let mode = self.fingerprint_mode;
        let bytes = upload.bytes;
        let digest_input = bytes.clone();
        let fingerprint = match tokio::task::spawn_blocking(move || {
            fingerprint_image(&digest_input, mode)
        })
        .await
        {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                warn!("Fingerprint task failed ({}), hashing raw bytes inline", e);
                fingerprint_image(&bytes, FingerprintMode::Raw)
            }
        };

        SourceImage {
            bytes,
            content_type: admitted
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            fingerprint,
        }
    }

    /// Cache lookup, or aggregate → score → verify and populate the cache
    async fn identify(
        &self,
        image: &SourceImage,
        cancel: &CancellationToken,
        stages: &mut Vec<Stage>,
    ) -> Result<(CachedRecognition, bool), PipelineError> {
        let key = CacheKey::Image(image.fingerprint.clone());
        if let Some(CachedPayload::Recognition(hit)) = self.cache.lookup(&key).await {
            debug!(fingerprint = %image.fingerprint.short(), "Recognition served from cache");
            stages.push(Stage::CachedHit);
            return Ok((hit, true));
        }

        stages.push(Stage::Aggregating);
        let aggregated = self.aggregator.aggregate(image, cancel).await?;

        stages.push(Stage::Scoring);
        let mut ensemble = self.scorer.score(&aggregated.lists);

        stages.push(Stage::Verifying);
        self.verification.verify_and_enrich(&mut ensemble).await;

        let recognition = CachedRecognition {
            ensemble,
            per_source: aggregated.lists,
            failures: aggregated.failures,
        };
        self.cache
            .store(&key, &CachedPayload::Recognition(recognition.clone()))
            .await;
        Ok((recognition, false))
    }

    async fn read_history(&self, session_id: &str) -> Vec<ChatTurn> {
        match self.sessions.read(session_id).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!(session_id = %session_id, "Session history unavailable: {}", e);
                Vec::new()
            }
        }
    }

    async fn append_turns(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
        ensemble: Option<&EnsembleResult>,
    ) {
        let turns = [
            ChatTurn::user(question),
            ChatTurn::assistant(answer, ensemble.cloned()),
        ];
        if let Err(e) = self.sessions.append(session_id, &turns).await {
            warn!(session_id = %session_id, "Failed to record chat turns: {}", e);
        }
    }
}

/// Periodic sweep of expired cache entries and rate-limit buckets
///
/// Returns when `shutdown` is cancelled. A zero interval disables it.
pub async fn run_housekeeping(
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    if interval.is_zero() {
        debug!("Housekeeping disabled");
        return;
    }
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Housekeeping stopping");
                return;
            }
            _ = ticker.tick() => {
                let entries = orchestrator.cache.sweep().await;
                let buckets = orchestrator.admission.rate_limiter().sweep();
                if entries > 0 || buckets > 0 {
                    debug!(entries, buckets, "Expired cache entries and rate buckets removed");
                }
            }
        }
    }
}

/// Ensemble attached to the most recent assistant turn
fn latest_ensemble(history: &[ChatTurn]) -> Option<EnsembleResult> {
    history.iter().rev().find_map(|turn| turn.ensemble.clone())
}

/// `source_id → contributing entry count`, plus the verified count
pub fn source_summary(ensemble: &EnsembleResult) -> BTreeMap<String, usize> {
    let mut summary = ensemble.source_counts();
    summary.insert("verified".to_string(), ensemble.verified_count());
    summary
}
