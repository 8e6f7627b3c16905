//! Content digests used as cache keys

use crate::types::ImageFingerprint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// What the image digest covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// SHA-256 over the uploaded bytes
    #[default]
    Raw,
    /// SHA-256 over decoded RGBA8 pixels and dimensions, so the same picture
    /// in another container format maps to the same key
    Normalized,
}

impl std::fmt::Display for FingerprintMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FingerprintMode::Raw => write!(f, "raw"),
            FingerprintMode::Normalized => write!(f, "normalized"),
        }
    }
}

/// Compute the fingerprint of an admitted image
///
/// Normalized mode falls back to the raw digest when the image cannot be
/// decoded. CPU-bound in normalized mode.
pub fn fingerprint_image(bytes: &[u8], mode: FingerprintMode) -> ImageFingerprint {
    match mode {
        FingerprintMode::Raw => raw_digest(bytes),
        FingerprintMode::Normalized => match image::load_from_memory(bytes) {
            Ok(decoded) => {
                let rgba = decoded.to_rgba8();
                let mut hasher = Sha256::new();
                hasher.update(b"rgba8");
                hasher.update(rgba.width().to_be_bytes());
                hasher.update(rgba.height().to_be_bytes());
                hasher.update(rgba.as_raw());
                ImageFingerprint::from_hex(format!("{:x}", hasher.finalize()))
            }
            Err(e) => {
                debug!("Pixel fingerprint unavailable ({}), using raw digest", e);
                raw_digest(bytes)
            }
        },
    }
}

fn raw_digest(bytes: &[u8]) -> ImageFingerprint {
    ImageFingerprint::from_hex(format!("{:x}", Sha256::digest(bytes)))
}

/// Semantic key for a text-only request
///
/// Messages differing only in case or whitespace share a key.
pub fn request_key(message: &str, language: &str) -> String {
    let normalized = message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(language.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}
