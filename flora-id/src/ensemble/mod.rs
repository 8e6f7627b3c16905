//! Ensemble scorer
//!
//! Merges per-source candidate lists into one ranked result. Pure and
//! deterministic: no I/O, and the output depends only on the set of input
//! lists, never on their order.
//!
//! - Names are reconciled case- and whitespace-insensitively
//! - A source naming the same species twice counts with its best confidence
//! - `weighted_score = Σ confidence(source) × weight(source)`, clamped to [0, 1]
//! - Order: score desc, contributing source count desc, name asc
//! - Truncated to `top_k`

use crate::config::SourceWeights;
use crate::types::{EnsembleEntry, EnsembleResult, RecognitionCandidate, SourceCandidates, SourceId};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Reconciliation key: whitespace collapsed, lowercase
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Source spelling with whitespace collapsed; case is kept for cultivar
/// quotes and hybrid markers
fn display_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Best candidate of one source for one logical species
struct Report<'a> {
    confidence: f64,
    candidate: &'a RecognitionCandidate,
}

#[derive(Debug, Clone)]
pub struct EnsembleScorer {
    weights: SourceWeights,
    top_k: usize,
}

impl EnsembleScorer {
    pub fn new(weights: SourceWeights, top_k: usize) -> Self {
        Self { weights, top_k }
    }

    pub fn weights(&self) -> &SourceWeights {
        &self.weights
    }

    /// Merge candidate lists into a ranked result
    pub fn score(&self, lists: &[SourceCandidates]) -> EnsembleResult {
        // species key → source id → best report
        let mut reports: BTreeMap<String, BTreeMap<SourceId, Report<'_>>> = BTreeMap::new();

        for list in lists {
            for candidate in &list.candidates {
                let key = normalize_name(&candidate.scientific_name);
                if key.is_empty() {
                    continue;
                }
                let report = Report {
                    confidence: candidate.confidence,
                    candidate,
                };
                reports
                    .entry(key)
                    .or_default()
                    .entry(list.source_id.clone())
                    .and_modify(|existing| {
                        if candidate.confidence > existing.confidence {
                            *existing = Report {
                                confidence: candidate.confidence,
                                candidate,
                            };
                        }
                    })
                    .or_insert(report);
            }
        }

        let mut entries: Vec<EnsembleEntry> = reports
            .into_iter()
            .map(|(_, by_source)| self.merge(&by_source))
            .collect();

        entries.sort_by(rank_order);
        entries.truncate(self.top_k);

        EnsembleResult {
            entries,
            weights: self.weights.as_map().clone(),
        }
    }

    fn merge(&self, by_source: &BTreeMap<SourceId, Report<'_>>) -> EnsembleEntry {
        let weighted: f64 = by_source
            .iter()
            .map(|(source, report)| report.confidence * self.weights.get(source))
            .sum();

        // Spelling and descriptive fields come from the most trusted source
        let mut by_trust: Vec<(&SourceId, &Report<'_>)> = by_source.iter().collect();
        by_trust.sort_by(|(a, _), (b, _)| {
            self.weights
                .get(b)
                .total_cmp(&self.weights.get(a))
                .then_with(|| a.cmp(b))
        });
        let common_name = by_trust
            .iter()
            .find_map(|(_, r)| r.candidate.common_name.clone());
        let family = by_trust.iter().find_map(|(_, r)| r.candidate.family.clone());
        let scientific_name = by_trust
            .first()
            .map(|(_, r)| display_name(&r.candidate.scientific_name))
            .unwrap_or_default();

        EnsembleEntry {
            scientific_name,
            common_name,
            family,
            weighted_score: weighted.clamp(0.0, 1.0),
            source_scores: by_source
                .iter()
                .map(|(source, r)| (source.clone(), r.confidence))
                .collect(),
            contributing_sources: by_source.keys().cloned().collect::<BTreeSet<_>>(),
            verified: false,
            enrichment: Default::default(),
        }
    }
}

fn rank_order(a: &EnsembleEntry, b: &EnsembleEntry) -> Ordering {
    b.weighted_score
        .total_cmp(&a.weighted_score)
        .then_with(|| b.contributing_sources.len().cmp(&a.contributing_sources.len()))
        .then_with(|| a.scientific_name.cmp(&b.scientific_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(&str, f64)]) -> SourceWeights {
        SourceWeights::new(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()).unwrap()
    }

    fn list(source: &str, items: &[(&str, f64)]) -> SourceCandidates {
        SourceCandidates {
            source_id: source.to_string(),
            candidates: items
                .iter()
                .map(|(name, conf)| RecognitionCandidate::new(*name, *conf, source))
                .collect(),
        }
    }

    #[test]
    fn test_names_reconcile_across_case_and_whitespace() {
        let scorer = EnsembleScorer::new(weights(&[("a", 0.4), ("b", 0.6)]), 5);
        let result = scorer.score(&[
            list("a", &[("ROSA  CANINA", 0.8)]),
            list("b", &[(" Rosa   canina ", 0.6)]),
        ]);
        assert_eq!(result.len(), 1);
        assert_eq!(result.entries[0].scientific_name, "Rosa canina");
        assert!((result.entries[0].weighted_score - 0.68).abs() < 1e-9);
        assert_eq!(result.entries[0].source_label(), "a+b");
    }

    #[test]
    fn test_source_spelling_is_kept() {
        let scorer = EnsembleScorer::new(weights(&[("a", 0.7), ("b", 0.3)]), 5);
        let result = scorer.score(&[
            list("b", &[("rosa 'peace'", 0.9), ("platanus x acerifolia", 0.2)]),
            list("a", &[("Rosa 'Peace'", 0.5), ("Platanus X acerifolia", 0.4)]),
        ]);
        let names: Vec<_> = result.entries.iter().map(|e| e.scientific_name.as_str()).collect();
        assert_eq!(names, vec!["Rosa 'Peace'", "Platanus X acerifolia"]);
    }

    #[test]
    fn test_duplicate_within_source_uses_max() {
        let scorer = EnsembleScorer::new(weights(&[("a", 1.0)]), 5);
        let result = scorer.score(&[list("a", &[("Ficus", 0.3), ("ficus", 0.9)])]);
        assert!((result.entries[0].weighted_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_tie_breaks_by_source_count_then_name() {
        let scorer = EnsembleScorer::new(weights(&[("a", 0.5), ("b", 0.5)]), 5);
        let result = scorer.score(&[
            list("a", &[("Zinnia elegans", 0.4), ("Bellis perennis", 0.8), ("Aster alpinus", 0.8)]),
            list("b", &[("Zinnia elegans", 0.4)]),
        ]);
        let names: Vec<_> = result.entries.iter().map(|e| e.scientific_name.as_str()).collect();
        assert_eq!(names, vec!["Zinnia elegans", "Aster alpinus", "Bellis perennis"]);
    }

    #[test]
    fn test_truncates_to_top_k() {
        let scorer = EnsembleScorer::new(weights(&[("a", 1.0)]), 2);
        let result = scorer.score(&[list("a", &[("A a", 0.9), ("B b", 0.8), ("C c", 0.7)])]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_descriptive_fields_from_heaviest_source() {
        let scorer = EnsembleScorer::new(weights(&[("light", 0.3), ("heavy", 0.7)]), 5);
        let mut light = list("light", &[("Rosa canina", 0.9)]);
        light.candidates[0] = light.candidates[0]
            .clone()
            .with_common_name(Some("Dog rose".into()))
            .with_family(Some("Rosaceae".into()));
        let mut heavy = list("heavy", &[("Rosa canina", 0.5)]);
        heavy.candidates[0] = heavy.candidates[0]
            .clone()
            .with_common_name(Some("Kuşburnu".into()));

        let result = scorer.score(&[light, heavy]);
        assert_eq!(result.entries[0].common_name.as_deref(), Some("Kuşburnu"));
        assert_eq!(result.entries[0].family.as_deref(), Some("Rosaceae"));
    }

    #[test]
    fn test_merge_ignores_source_order() {
        let scorer = EnsembleScorer::new(weights(&[("plantclef", 0.6), ("plantnet", 0.4)]), 5);
        let clef = list("plantclef", &[("Rosa damascena", 0.9), ("Rosa gallica", 0.2)]);
        let net = list("plantnet", &[("Rosa damascena", 0.7), ("Rosa canina", 0.3)]);

        let forward = scorer.score(&[clef.clone(), net.clone()]);
        let reverse = scorer.score(&[net, clef]);
        assert_eq!(forward, reverse);

        let scores: Vec<f64> = forward.entries.iter().map(|e| e.weighted_score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_empty_input_gives_empty_result() {
        let scorer = EnsembleScorer::new(weights(&[("a", 1.0)]), 3);
        let result = scorer.score(&[list("a", &[])]);
        assert!(result.is_empty());
        assert_eq!(result.highest_confidence(), 0.0);
    }
}
