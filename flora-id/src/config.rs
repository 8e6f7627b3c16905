//! Service settings for flora-id
//!
//! Resolution: TOML file (see `flora_common::config::locate_config_file`)
//! → `FLORA_*` environment variables for secrets → [`Settings::validate`].
//! The validated struct is shared as `Arc<Settings>` and never re-read while
//! the process runs.

use crate::cache::FingerprintMode;
use flora_common::config::{load_toml_or_default, LoggingConfig};
use flora_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Allowed deviation of the weight sum from 1.0
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Source identifiers with a built-in adapter
pub const KNOWN_SOURCES: &[&str] = &["plantclef", "plantnet"];

/// Name of the offline generator that always terminates the fallback chain
pub const TEMPLATE_PROVIDER: &str = "template";

// ============================================================================
// Source weights
// ============================================================================

/// Validated per-source ensemble weights (sum to 1.0)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SourceWeights(BTreeMap<String, f64>);

impl SourceWeights {
    /// Validate and wrap a weight table
    ///
    /// # Examples
    ///
    /// ```
    /// use flora_id::config::SourceWeights;
    /// use std::collections::BTreeMap;
    ///
    /// let ok = BTreeMap::from([("a".to_string(), 0.6), ("b".to_string(), 0.4)]);
    /// assert!(SourceWeights::new(ok).is_ok());
    ///
    /// let bad = BTreeMap::from([("a".to_string(), 0.6), ("b".to_string(), 0.6)]);
    /// assert!(SourceWeights::new(bad).is_err());
    /// ```
    pub fn new(weights: BTreeMap<String, f64>) -> Result<Self> {
        if weights.is_empty() {
            return Err(Error::Config("At least one source weight is required".to_string()));
        }
        for (source, weight) in &weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(Error::Config(format!(
                    "Weight for source '{}' must be a non-negative number, got {}",
                    source, weight
                )));
            }
        }
        let sum: f64 = weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(Error::Config(format!(
                "Source weights must sum to 1.0, got {:.6}",
                sum
            )));
        }
        Ok(Self(weights))
    }

    /// Weight for a source; unknown sources weigh 0.0
    pub fn get(&self, source_id: &str) -> f64 {
        self.0.get(source_id).copied().unwrap_or(0.0)
    }

    pub fn sources(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.0
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    /// Upper bound for a whole request, provider calls included
    pub request_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5740".to_string(),
            request_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    pub require_api_key: bool,
    /// Accepted API keys (plaintext here, digested at startup)
    pub api_keys: Vec<String>,
    pub max_image_bytes: usize,
    pub allowed_types: Vec<String>,
    /// Re-decode every upload before it reaches a provider
    pub sanitize: bool,
    /// Largest accepted width or height after decode
    pub max_image_dimension: u32,
    pub max_message_chars: usize,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            require_api_key: false,
            api_keys: Vec::new(),
            max_image_bytes: 10 * 1024 * 1024,
            allowed_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
            sanitize: true,
            max_image_dimension: 8192,
            max_message_chars: 2000,
        }
    }
}

/// Request budget of one rate-limit tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimit {
    pub requests: u32,
    pub window_secs: u64,
}

impl TierLimit {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Cheap endpoints (text chat, history)
    pub standard: TierLimit,
    /// Endpoints that fan out to identification sources
    pub strict: TierLimit,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            standard: TierLimit {
                requests: 60,
                window_secs: 60,
            },
            strict: TierLimit {
                requests: 10,
                window_secs: 60,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub fingerprint_mode: FingerprintMode,
    /// Active sweep period; 0 disables the sweeper
    pub sweep_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            fingerprint_mode: FingerprintMode::Raw,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantClefSettings {
    /// Classifier endpoint; the source is skipped when unset
    pub url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub requests_per_second: u32,
}

impl Default for PlantClefSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: None,
            requests_per_second: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantNetSettings {
    /// Pl@ntNet API key; the source is skipped when unset
    pub api_key: Option<String>,
    pub url: String,
    /// Organ hint ("auto", "leaf", "flower", "fruit", "bark")
    pub organ: String,
    pub timeout_ms: Option<u64>,
    pub requests_per_second: u32,
}

impl Default for PlantNetSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            url: "https://my-api.plantnet.org/v2/identify/all".to_string(),
            organ: "auto".to_string(),
            timeout_ms: None,
            requests_per_second: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub weights: BTreeMap<String, f64>,
    /// Default per-source timeout
    pub timeout_ms: u64,
    pub top_k_per_source: usize,
    pub plantclef: PlantClefSettings,
    pub plantnet: PlantNetSettings,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            weights: BTreeMap::from([
                ("plantclef".to_string(), 0.6),
                ("plantnet".to_string(), 0.4),
            ]),
            timeout_ms: 15_000,
            top_k_per_source: 5,
            plantclef: PlantClefSettings::default(),
            plantnet: PlantNetSettings::default(),
        }
    }
}

impl SourceSettings {
    /// Effective timeout for one source
    pub fn timeout_for(&self, source_id: &str) -> Duration {
        let specific = match source_id {
            "plantclef" => self.plantclef.timeout_ms,
            "plantnet" => self.plantnet.timeout_ms,
            _ => None,
        };
        Duration::from_millis(specific.unwrap_or(self.timeout_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleSettings {
    pub top_k: usize,
}

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantIdSettings {
    /// Plant.id key; enrichment is skipped when unset
    pub api_key: Option<String>,
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for PlantIdSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            url: "https://plant.id/api/v3".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSettings {
    /// USDA PLANTS checklist CSV imported at startup when set
    pub reference_csv: Option<PathBuf>,
    /// Only this many top entries are enriched
    pub enrich_top_n: usize,
    pub plant_id: PlantIdSettings,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            reference_csv: None,
            enrich_top_n: 3,
            plant_id: PlantIdSettings::default(),
        }
    }
}

/// One OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderSettings {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Provider names tried in order; the template generator always runs last
    pub order: Vec<String>,
    pub providers: BTreeMap<String, LlmProviderSettings>,
    pub timeout_ms: u64,
    /// ISO 639-1 code of the answer language
    pub language: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            providers: BTreeMap::new(),
            timeout_ms: 30_000,
            language: "tr".to_string(),
        }
    }
}

impl GenerationSettings {
    /// Remote providers in fallback order (template excluded)
    pub fn remote_order(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| name.as_str() != TEMPLATE_PROVIDER)
            .cloned()
            .collect()
    }

    pub fn timeout_for(&self, provider: &str) -> Duration {
        let specific = self.providers.get(provider).and_then(|p| p.timeout_ms);
        Duration::from_millis(specific.unwrap_or(self.timeout_ms))
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Complete flora-id configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub server: ServerSettings,
    pub admission: AdmissionSettings,
    pub rate_limit: RateLimitSettings,
    pub cache: CacheSettings,
    pub sources: SourceSettings,
    pub ensemble: EnsembleSettings,
    pub verification: VerificationSettings,
    pub generation: GenerationSettings,
}

impl Settings {
    /// Load TOML (or defaults), overlay environment secrets, validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings: Settings = load_toml_or_default(path)?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Overlay secrets from `FLORA_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Some(key) = env_value("FLORA_PLANTNET_API_KEY") {
            info!("Pl@ntNet API key loaded from environment variable");
            self.sources.plantnet.api_key = Some(key);
        }
        if let Some(url) = env_value("FLORA_PLANTCLEF_URL") {
            info!("PlantCLEF classifier URL loaded from environment variable");
            self.sources.plantclef.url = Some(url);
        }
        if let Some(key) = env_value("FLORA_PLANT_ID_KEY") {
            info!("Plant.id API key loaded from environment variable");
            self.verification.plant_id.api_key = Some(key);
        }
        if let Some(keys) = env_value("FLORA_API_KEYS") {
            self.admission.api_keys = keys
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            info!(
                "{} client API key(s) loaded from environment variable",
                self.admission.api_keys.len()
            );
        }
        for (name, provider) in self.generation.providers.iter_mut() {
            let var = format!("FLORA_LLM_{}_API_KEY", name.to_uppercase().replace('-', "_"));
            if let Some(key) = env_value(&var) {
                info!("API key for generation provider '{}' loaded from {}", name, var);
                provider.api_key = Some(key);
            }
        }
    }

    /// Startup invariants; any failure aborts startup
    pub fn validate(&self) -> Result<()> {
        let weights = self.source_weights()?;
        for source in weights.sources() {
            if !KNOWN_SOURCES.contains(&source.as_str()) {
                return Err(Error::Config(format!(
                    "Weight configured for unknown source '{}' (known: {})",
                    source,
                    KNOWN_SOURCES.join(", ")
                )));
            }
        }

        if self.ensemble.top_k == 0 {
            return Err(Error::Config("ensemble.top_k must be at least 1".to_string()));
        }
        if self.sources.top_k_per_source == 0 {
            return Err(Error::Config(
                "sources.top_k_per_source must be at least 1".to_string(),
            ));
        }
        for (tier, limit) in [
            ("standard", self.rate_limit.standard),
            ("strict", self.rate_limit.strict),
        ] {
            if limit.requests == 0 || limit.window_secs == 0 {
                return Err(Error::Config(format!(
                    "rate_limit.{} needs non-zero requests and window_secs",
                    tier
                )));
            }
        }
        if self.admission.max_image_bytes == 0 {
            return Err(Error::Config(
                "admission.max_image_bytes must be positive".to_string(),
            ));
        }
        if self.admission.allowed_types.is_empty() {
            return Err(Error::Config(
                "admission.allowed_types must list at least one image type".to_string(),
            ));
        }
        if self.admission.require_api_key && self.admission.api_keys.is_empty() {
            return Err(Error::Config(
                "admission.require_api_key is set but no API keys are configured".to_string(),
            ));
        }
        for name in self.generation.remote_order() {
            if !self.generation.providers.contains_key(&name) {
                return Err(Error::Config(format!(
                    "generation.order names unknown provider '{}'",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Validated weight table
    pub fn source_weights(&self) -> Result<SourceWeights> {
        SourceWeights::new(self.sources.weights.clone())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut settings = Settings::default();
        settings.sources.weights.insert("plantnet".to_string(), 0.5);
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_weight_sum_tolerates_float_noise() {
        let weights = BTreeMap::from([
            ("a".to_string(), 0.1),
            ("b".to_string(), 0.2),
            ("c".to_string(), 0.7),
        ]);
        assert!(SourceWeights::new(weights).is_ok());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let weights = BTreeMap::from([("a".to_string(), 1.5), ("b".to_string(), -0.5)]);
        assert!(SourceWeights::new(weights).is_err());
    }

    #[test]
    fn test_unknown_source_weight_rejected() {
        let mut settings = Settings::default();
        settings.sources.weights = BTreeMap::from([
            ("plantclef".to_string(), 0.5),
            ("inaturalist".to_string(), 0.5),
        ]);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_unknown_generation_provider_rejected() {
        let mut settings = Settings::default();
        settings.generation.order = vec!["primary".to_string(), "template".to_string()];
        assert!(settings.validate().is_err());

        settings.generation.providers.insert(
            "primary".to_string(),
            LlmProviderSettings {
                base_url: "http://localhost:1234/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key: None,
                timeout_ms: None,
            },
        );
        settings.validate().unwrap();
        assert_eq!(settings.generation.remote_order(), vec!["primary".to_string()]);
    }

    #[test]
    fn test_required_api_key_needs_keys() {
        let mut settings = Settings::default();
        settings.admission.require_api_key = true;
        assert!(settings.validate().is_err());
        settings.admission.api_keys = vec!["k".to_string()];
        settings.validate().unwrap();
    }

    #[test]
    fn test_source_timeout_override() {
        let mut sources = SourceSettings::default();
        sources.plantnet.timeout_ms = Some(500);
        assert_eq!(sources.timeout_for("plantnet"), Duration::from_millis(500));
        assert_eq!(sources.timeout_for("plantclef"), Duration::from_millis(15_000));
    }

    #[test]
    fn test_parse_toml_sections() {
        let settings: Settings = toml::from_str(
            r#"
            [sources.weights]
            plantclef = 0.7
            plantnet = 0.3

            [rate_limit.strict]
            requests = 3
            window_secs = 10

            [cache]
            fingerprint_mode = "normalized"
            "#,
        )
        .unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.rate_limit.strict.requests, 3);
        assert_eq!(settings.cache.fingerprint_mode, FingerprintMode::Normalized);
        assert_eq!(settings.rate_limit.standard.requests, 60);
    }
}
