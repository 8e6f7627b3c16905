//! API key authentication via SHA-256 credential digests
//!
//! # Architecture
//!
//! - Accepted keys are never kept in plaintext after startup: each key is
//!   reduced to its SHA-256 hex digest when the [`CredentialSet`] is built.
//! - A presented key is digested the same way and compared against every
//!   stored digest without early exit on the first differing byte.
//! - An empty set means no key can ever be accepted; whether a key is
//!   required at all is decided by the caller's configuration.
//!
//! # Pure Functions
//!
//! No HTTP framework dependencies. Header extraction lives in the service.

use sha2::{Digest, Sha256};

// ========================================
// Error Types
// ========================================

/// Authentication error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No credential was presented
    Missing,

    /// A credential was presented but matched no accepted key
    Invalid,
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialError::Missing => write!(f, "Missing API key"),
            CredentialError::Invalid => write!(f, "Invalid API key"),
        }
    }
}

impl std::error::Error for CredentialError {}

// ========================================
// Digests
// ========================================

/// Calculate the SHA-256 digest of a credential as 64 hex characters
///
/// Surrounding whitespace is ignored so keys pasted from config files with a
/// trailing newline still match.
///
/// # Examples
///
/// ```
/// use flora_common::auth::digest_credential;
///
/// let digest = digest_credential("secret-key");
/// assert_eq!(digest.len(), 64);
/// assert_eq!(digest, digest_credential("  secret-key\n"));
/// ```
pub fn digest_credential(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compare two strings without short-circuiting on the first mismatch
fn digests_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

// ========================================
// Credential Set
// ========================================

/// Set of accepted API key digests
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    digests: Vec<String>,
}

impl CredentialSet {
    /// Build from plaintext keys; blank entries are dropped
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let digests = keys
            .into_iter()
            .filter(|k| !k.as_ref().trim().is_empty())
            .map(|k| digest_credential(k.as_ref()))
            .collect();
        Self { digests }
    }

    /// Number of accepted keys
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Verify a presented credential
    ///
    /// # Examples
    ///
    /// ```
    /// use flora_common::auth::{CredentialError, CredentialSet};
    ///
    /// let set = CredentialSet::from_keys(["alpha", "beta"]);
    /// assert!(set.verify(Some("beta")).is_ok());
    /// assert_eq!(set.verify(Some("gamma")), Err(CredentialError::Invalid));
    /// assert_eq!(set.verify(None), Err(CredentialError::Missing));
    /// ```
    pub fn verify(&self, presented: Option<&str>) -> Result<(), CredentialError> {
        let presented = presented
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(CredentialError::Missing)?;

        let digest = digest_credential(presented);
        let mut matched = false;
        for accepted in &self.digests {
            matched |= digests_equal(accepted, &digest);
        }

        if matched {
            Ok(())
        } else {
            Err(CredentialError::Invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_hex() {
        let digest = digest_credential("abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_blank_keys_are_dropped() {
        let set = CredentialSet::from_keys(["", "   ", "real"]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_empty_set_rejects_everything() {
        let set = CredentialSet::default();
        assert!(set.is_empty());
        assert_eq!(set.verify(Some("anything")), Err(CredentialError::Invalid));
    }

    #[test]
    fn test_blank_presented_key_is_missing() {
        let set = CredentialSet::from_keys(["k"]);
        assert_eq!(set.verify(Some("   ")), Err(CredentialError::Missing));
    }

    #[test]
    fn test_digests_equal_length_mismatch() {
        assert!(!digests_equal("ab", "abc"));
        assert!(digests_equal("abc", "abc"));
    }
}
