//! Parallel fan-out over identification sources
//!
//! Every source runs concurrently under its own timeout. A slow or failing
//! source never cancels its siblings; cancelling the request token aborts
//! all of them. Results are keyed by source id so the outcome does not
//! depend on completion order.

use super::{IdentificationSource, SourceImage};
use crate::error::PipelineError;
use crate::types::{RecognitionCandidate, SourceCandidates};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-source outcome of one fan-out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedCandidates {
    /// Successful sources, sorted by source id
    pub lists: Vec<SourceCandidates>,
    /// `source_id → reason` for sources that contributed nothing
    pub failures: BTreeMap<String, String>,
}

impl AggregatedCandidates {
    pub fn candidate_count(&self) -> usize {
        self.lists.iter().map(|l| l.candidates.len()).sum()
    }
}

struct RegisteredSource {
    source: Arc<dyn IdentificationSource>,
    timeout: Duration,
}

pub struct SourceAggregator {
    sources: Vec<RegisteredSource>,
    top_k_per_source: usize,
}

impl SourceAggregator {
    pub fn new(top_k_per_source: usize) -> Self {
        Self {
            sources: Vec::new(),
            top_k_per_source,
        }
    }

    /// Register a source with its timeout
    pub fn with_source(mut self, source: Arc<dyn IdentificationSource>, timeout: Duration) -> Self {
        self.sources.push(RegisteredSource { source, timeout });
        self
    }

    /// `(source_id, available)` for every registered source
    pub fn source_status(&self) -> Vec<(String, bool)> {
        self.sources
            .iter()
            .map(|r| (r.source.source_id().to_string(), r.source.is_available()))
            .collect()
    }

    /// Call every source concurrently
    ///
    /// # Returns
    /// * `Ok(AggregatedCandidates)` - at least one source succeeded
    /// * `Err(PipelineError::AllSourcesUnavailable)` - none did
    pub async fn aggregate(
        &self,
        image: &SourceImage,
        cancel: &CancellationToken,
    ) -> Result<AggregatedCandidates, PipelineError> {
        let calls = self.sources.iter().map(|registered| async move {
            let source_id = registered.source.source_id().to_string();
            let outcome = self.call_source(registered, image, cancel).await;
            (source_id, outcome)
        });
        let outcomes = join_all(calls).await;

        let mut aggregated = AggregatedCandidates::default();
        for (source_id, outcome) in outcomes {
            match outcome {
                Ok(candidates) => aggregated.lists.push(SourceCandidates {
                    source_id,
                    candidates,
                }),
                Err(PipelineError::SourceUnavailable { reason, .. }) => {
                    aggregated.failures.insert(source_id, reason);
                }
                Err(other) => {
                    aggregated.failures.insert(source_id, other.to_string());
                }
            }
        }
        aggregated.lists.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        if aggregated.lists.is_empty() {
            warn!(
                failures = ?aggregated.failures,
                "All identification sources failed"
            );
            return Err(PipelineError::AllSourcesUnavailable);
        }

        info!(
            fingerprint = %image.fingerprint.short(),
            succeeded = aggregated.lists.len(),
            failed = aggregated.failures.len(),
            candidates = aggregated.candidate_count(),
            "Source fan-out complete"
        );
        Ok(aggregated)
    }

    async fn call_source(
        &self,
        registered: &RegisteredSource,
        image: &SourceImage,
        cancel: &CancellationToken,
    ) -> Result<Vec<RecognitionCandidate>, PipelineError> {
        let source_id = registered.source.source_id();
        let unavailable = |reason: String| {
            let err = PipelineError::SourceUnavailable {
                source_id: source_id.to_string(),
                reason,
            };
            warn!(source = %source_id, "{}", err);
            err
        };

        if !registered.source.is_available() {
            debug!(source = %source_id, "Source not configured, skipping");
            return Err(PipelineError::SourceUnavailable {
                source_id: source_id.to_string(),
                reason: "not configured".to_string(),
            });
        }

        let started = tokio::time::Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(unavailable("request cancelled".to_string()));
            }
            result = tokio::time::timeout(registered.timeout, registered.source.identify(image)) => result,
        };

        match result {
            Err(_) => Err(unavailable(format!(
                "timed out after {} ms",
                registered.timeout.as_millis()
            ))),
            Ok(Err(e)) => Err(unavailable(format!("{:#}", e))),
            Ok(Ok(candidates)) => {
                let candidates = self.normalize(source_id, candidates);
                debug!(
                    source = %source_id,
                    count = candidates.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Source responded"
                );
                Ok(candidates)
            }
        }
    }

    /// Drop blank names, force the source tag, keep the provider's top K
    fn normalize(&self, source_id: &str, candidates: Vec<RecognitionCandidate>) -> Vec<RecognitionCandidate> {
        candidates
            .into_iter()
            .filter(|c| !c.scientific_name.trim().is_empty())
            .map(|mut c| {
                c.scientific_name = c.scientific_name.trim().to_string();
                c.source_id = source_id.to_string();
                c
            })
            .take(self.top_k_per_source)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageFingerprint;
    use anyhow::Result;
    use async_trait::async_trait;

    enum Behaviour {
        Reply(Vec<(&'static str, f64)>),
        Fail,
        Hang,
    }

    struct FakeSource {
        id: &'static str,
        behaviour: Behaviour,
        configured: bool,
    }

    impl FakeSource {
        fn arc(id: &'static str, behaviour: Behaviour) -> Arc<dyn IdentificationSource> {
            Arc::new(Self {
                id,
                behaviour,
                configured: true,
            })
        }
    }

    #[async_trait]
    impl IdentificationSource for FakeSource {
        fn source_id(&self) -> &str {
            self.id
        }

        async fn identify(&self, _image: &SourceImage) -> Result<Vec<RecognitionCandidate>> {
            match &self.behaviour {
                Behaviour::Reply(list) => Ok(list
                    .iter()
                    .map(|(name, conf)| RecognitionCandidate::new(*name, *conf, "spoofed"))
                    .collect()),
                Behaviour::Fail => anyhow::bail!("HTTP 502"),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }

        fn is_available(&self) -> bool {
            self.configured
        }
    }

    fn image() -> SourceImage {
        SourceImage {
            bytes: vec![1, 2, 3].into(),
            content_type: "image/jpeg".to_string(),
            fingerprint: ImageFingerprint::from_hex("00ff"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_is_isolated() {
        let aggregator = SourceAggregator::new(5)
            .with_source(FakeSource::arc("plantnet", Behaviour::Fail), Duration::from_secs(1))
            .with_source(
                FakeSource::arc("plantclef", Behaviour::Reply(vec![("Rosa canina", 0.8)])),
                Duration::from_secs(1),
            );
        let result = aggregator
            .aggregate(&image(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.lists.len(), 1);
        assert_eq!(result.lists[0].source_id, "plantclef");
        assert_eq!(result.lists[0].candidates[0].source_id, "plantclef");
        assert!(result.failures["plantnet"].contains("502"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_timeouts_fail_the_aggregate() {
        let aggregator = SourceAggregator::new(5)
            .with_source(FakeSource::arc("a", Behaviour::Hang), Duration::from_secs(2))
            .with_source(FakeSource::arc("b", Behaviour::Hang), Duration::from_secs(3));
        let err = aggregator
            .aggregate(&image(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AllSourcesUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_does_not_cancel_sibling() {
        let aggregator = SourceAggregator::new(5)
            .with_source(FakeSource::arc("slow", Behaviour::Hang), Duration::from_millis(100))
            .with_source(
                FakeSource::arc("fast", Behaviour::Reply(vec![("Ficus elastica", 0.5)])),
                Duration::from_secs(1),
            );
        let result = aggregator
            .aggregate(&image(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.lists[0].source_id, "fast");
        assert!(result.failures["slow"].contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_request_aborts_calls() {
        let aggregator = SourceAggregator::new(5)
            .with_source(FakeSource::arc("a", Behaviour::Hang), Duration::from_secs(3600));
        let token = CancellationToken::new();
        token.cancel();
        let err = aggregator.aggregate(&image(), &token).await.unwrap_err();
        assert!(matches!(err, PipelineError::AllSourcesUnavailable));
    }

    #[tokio::test]
    async fn test_unconfigured_source_is_not_called() {
        let unconfigured: Arc<dyn IdentificationSource> = Arc::new(FakeSource {
            id: "plantnet",
            behaviour: Behaviour::Reply(vec![("Never", 1.0)]),
            configured: false,
        });
        let aggregator = SourceAggregator::new(5)
            .with_source(unconfigured, Duration::from_secs(1))
            .with_source(
                FakeSource::arc("plantclef", Behaviour::Reply(vec![("Rosa", 0.5)])),
                Duration::from_secs(1),
            );
        let result = aggregator
            .aggregate(&image(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.failures["plantnet"], "not configured");
        assert_eq!(result.candidate_count(), 1);
    }

    #[tokio::test]
    async fn test_top_k_and_blank_names() {
        let aggregator = SourceAggregator::new(2).with_source(
            FakeSource::arc(
                "s",
                Behaviour::Reply(vec![("  ", 0.9), ("A a", 0.8), ("B b", 0.7), ("C c", 0.6)]),
            ),
            Duration::from_secs(1),
        );
        let result = aggregator
            .aggregate(&image(), &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<_> = result.lists[0]
            .candidates
            .iter()
            .map(|c| c.scientific_name.as_str())
            .collect();
        assert_eq!(names, vec!["A a", "B b"]);
    }
}
