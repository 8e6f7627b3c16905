//! Core data model for plant identification
//!
//! Every type here is request-scoped except [`ChatTurn`], which is persisted
//! by the session store. Candidates are produced once by a single source and
//! never mutated; the ensemble scorer builds fresh [`EnsembleEntry`] values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identifier of an identification source (e.g. "plantclef", "plantnet")
pub type SourceId = String;

/// Confidence or score in [0.0, 1.0]
pub type Confidence = f64;

// ============================================================================
// Fingerprints
// ============================================================================

/// Content digest of an uploaded image (SHA-256, 64 lowercase hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageFingerprint(String);

impl ImageFingerprint {
    /// Wrap an already computed hex digest
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 16 hex characters, as reported to clients
    pub fn short(&self) -> &str {
        let end = self.0.len().min(16);
        &self.0[..end]
    }
}

impl std::fmt::Display for ImageFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// One species suggestion from exactly one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionCandidate {
    pub scientific_name: String,
    pub common_name: Option<String>,
    pub family: Option<String>,
    /// Source-reported confidence, clamped to [0.0, 1.0]
    pub confidence: Confidence,
    pub source_id: SourceId,
    /// Provider payload for this suggestion, kept for the per-source breakdown
    pub raw_payload: serde_json::Value,
}

impl RecognitionCandidate {
    /// Create candidate with clamped confidence
    pub fn new(
        scientific_name: impl Into<String>,
        confidence: Confidence,
        source_id: impl Into<String>,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            scientific_name: scientific_name.into(),
            common_name: None,
            family: None,
            confidence,
            source_id: source_id.into(),
            raw_payload: serde_json::Value::Null,
        }
    }

    pub fn with_common_name(mut self, name: Option<String>) -> Self {
        self.common_name = name.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn with_family(mut self, family: Option<String>) -> Self {
        self.family = family.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.raw_payload = payload;
        self
    }
}

/// Candidate list of one source, in the source's own ranking order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCandidates {
    pub source_id: SourceId,
    pub candidates: Vec<RecognitionCandidate>,
}

// ============================================================================
// Ensemble
// ============================================================================

/// Fields attached by verification and enrichment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    /// Reference dataset symbol (e.g. USDA "ROCA3")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub common_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// One merged, ranked species
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleEntry {
    pub scientific_name: String,
    pub common_name: Option<String>,
    pub family: Option<String>,
    /// Σ(source confidence × source weight), in [0.0, 1.0]
    pub weighted_score: Confidence,
    /// Confidence each contributing source reported
    pub source_scores: BTreeMap<SourceId, Confidence>,
    pub contributing_sources: BTreeSet<SourceId>,
    pub verified: bool,
    #[serde(default)]
    pub enrichment: Enrichment,
}

impl EnsembleEntry {
    /// "plantclef+plantnet" style provenance label
    pub fn source_label(&self) -> String {
        self.contributing_sources
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("+")
    }
}

/// Ranked, de-duplicated identification result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    /// Sorted by weighted score descending
    pub entries: Vec<EnsembleEntry>,
    /// Weights in effect when the result was scored
    pub weights: BTreeMap<SourceId, f64>,
}

impl EnsembleResult {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Score of the best entry, 0.0 when empty
    pub fn highest_confidence(&self) -> Confidence {
        self.entries
            .first()
            .map(|e| e.weighted_score)
            .unwrap_or(0.0)
    }

    /// Number of entries each source contributed to
    pub fn source_counts(&self) -> BTreeMap<SourceId, usize> {
        let mut counts: BTreeMap<SourceId, usize> =
            self.weights.keys().map(|k| (k.clone(), 0)).collect();
        for entry in &self.entries {
            for source in &entry.contributing_sources {
                *counts.entry(source.clone()).or_default() += 1;
            }
        }
        counts
    }

    pub fn verified_count(&self) -> usize {
        self.entries.iter().filter(|e| e.verified).count()
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// Speaker of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One immutable conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ensemble: Option<EnsembleResult>,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            ensemble: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>, ensemble: Option<EnsembleResult>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            ensemble,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_confidence_clamped() {
        assert_eq!(RecognitionCandidate::new("A b", 1.7, "s").confidence, 1.0);
        assert_eq!(RecognitionCandidate::new("A b", -0.2, "s").confidence, 0.0);
        assert_eq!(RecognitionCandidate::new("A b", f64::NAN, "s").confidence, 0.0);
    }

    #[test]
    fn test_blank_optional_names_dropped() {
        let c = RecognitionCandidate::new("A b", 0.5, "s")
            .with_common_name(Some("  ".to_string()))
            .with_family(Some("Rosaceae".to_string()));
        assert!(c.common_name.is_none());
        assert_eq!(c.family.as_deref(), Some("Rosaceae"));
    }

    #[test]
    fn test_fingerprint_short() {
        let fp = ImageFingerprint::from_hex("0123456789abcdef0123456789abcdef");
        assert_eq!(fp.short(), "0123456789abcdef");
    }

    #[test]
    fn test_source_counts_include_idle_sources() {
        let mut weights = BTreeMap::new();
        weights.insert("plantclef".to_string(), 0.6);
        weights.insert("plantnet".to_string(), 0.4);
        let entry = EnsembleEntry {
            scientific_name: "Rosa canina".to_string(),
            common_name: None,
            family: None,
            weighted_score: 0.12,
            source_scores: BTreeMap::from([("plantnet".to_string(), 0.3)]),
            contributing_sources: BTreeSet::from(["plantnet".to_string()]),
            verified: true,
            enrichment: Enrichment::default(),
        };
        let result = EnsembleResult {
            entries: vec![entry],
            weights,
        };

        let counts = result.source_counts();
        assert_eq!(counts.get("plantclef"), Some(&0));
        assert_eq!(counts.get("plantnet"), Some(&1));
        assert_eq!(result.verified_count(), 1);
        assert_eq!(result.entries[0].source_label(), "plantnet");
    }
}
