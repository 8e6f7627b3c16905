//! Identification sources
//!
//! Each source wraps one remote recognition provider. The aggregator calls
//! every configured source in parallel and isolates their failures.

pub mod aggregator;
pub mod plantclef;
pub mod plantnet;

pub use aggregator::{AggregatedCandidates, SourceAggregator};
pub use plantclef::PlantClefClient;
pub use plantnet::PlantNetClient;

use crate::types::{ImageFingerprint, RecognitionCandidate};
use anyhow::Result;
use async_trait::async_trait;
use axum::body::Bytes;

pub const PLANTCLEF_SOURCE: &str = "plantclef";
pub const PLANTNET_SOURCE: &str = "plantnet";

/// Admitted image handed to every source
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub bytes: Bytes,
    /// Normalized MIME type confirmed by the admission gate
    pub content_type: String,
    pub fingerprint: ImageFingerprint,
}

/// Source trait - every identification provider implements this
#[async_trait]
pub trait IdentificationSource: Send + Sync {
    /// Identifier used in weights, logs and provenance labels
    fn source_id(&self) -> &str;

    /// Identify the plant in `image`
    ///
    /// # Returns
    /// * `Ok(candidates)` - in the provider's own ranking order (may be empty)
    /// * `Err(_)` - provider failed (logged, contributes no candidates)
    async fn identify(&self, image: &SourceImage) -> Result<Vec<RecognitionCandidate>>;

    /// Whether the source is configured (API key, endpoint)
    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_default() {
        struct Dummy;

        #[async_trait]
        impl IdentificationSource for Dummy {
            fn source_id(&self) -> &str {
                "dummy"
            }

            async fn identify(&self, _image: &SourceImage) -> Result<Vec<RecognitionCandidate>> {
                Ok(Vec::new())
            }
        }

        assert!(Dummy.is_available());
    }
}
