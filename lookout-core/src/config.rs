//! Pipeline configuration
//!
//! Loaded from a TOML file; every numeric knob has a serde default so a
//! config may be as small as a list of sources.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::{
    default_sources, SourceConfig, DEFAULT_BATCH_SIZE, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_ERROR_THRESHOLD, DEFAULT_MIN_DELAY_SECS, DEFAULT_WARNING_THRESHOLD,
};

/// Upper bound on the per-origin delay (one hour)
pub const MAX_MIN_DELAY_SECS: f64 = 3600.0;

/// Errors from loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sources: Vec<SourceConfig>,
    pub politeness: PolitenessConfig,
    pub fetch: FetchSettings,
    pub rate_gate: RateGateConfig,
    pub extraction: ExtractionConfig,
    pub quality: QualityThresholds,
    pub relevance: RelevanceConfig,
    pub run: RunConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolitenessConfig {
    /// Minimum seconds between two requests to the same origin
    pub min_delay_secs: f64,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: DEFAULT_MIN_DELAY_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Sources fetched concurrently within one tier
    pub max_concurrent: usize,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Optional proxy (e.g. `socks5h://127.0.0.1:9050`)
    pub proxy: Option<String>,
    /// Retrieve each article page for body text
    pub fetch_full_text: bool,
    /// Body text cap in characters
    pub max_content_chars: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            timeout_secs: 30,
            proxy: None,
            fetch_full_text: true,
            max_content_chars: 6000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateGateConfig {
    /// Bucket capacity in request units
    pub capacity: f64,
    /// Units restored per second
    pub refill_per_sec: f64,
}

impl Default for RateGateConfig {
    fn default() -> Self {
        Self {
            capacity: 5.0,
            refill_per_sec: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub batch_size: usize,
    /// Retries after the first attempt on rate-limit/transient faults
    pub max_retries: u32,
    /// First backoff delay; doubled on every retry
    pub backoff_base_ms: u64,
    pub confidence_threshold: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: 3,
            backoff_base_ms: 2000,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl ExtractionConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Success-rate thresholds for health classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Below this rate a stage is `warning`
    pub warning: f64,
    /// Below this rate a stage is `error`
    pub error: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            warning: DEFAULT_WARNING_THRESHOLD,
            error: DEFAULT_ERROR_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    /// Additional strong keywords for the relevance classifier
    pub extra_keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Run-level timeout (0 or absent = none)
    pub timeout_secs: Option<u64>,
}

impl RunConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub seen_guids: PathBuf,
    pub events: PathBuf,
    /// Optional gazetteer override; the embedded table is used otherwise
    pub gazetteer: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            seen_guids: PathBuf::from("data/seen_guids.json"),
            events: PathBuf::from("data/events.json"),
            gazetteer: None,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a TOML config file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Configured sources, or the built-in registry when none are listed
    pub fn effective_sources(&self) -> Vec<SourceConfig> {
        if self.sources.is_empty() {
            default_sources()
        } else {
            self.sources.clone()
        }
    }

    /// Per-origin delay, clamped to `[0, MAX_MIN_DELAY_SECS]` for unvalidated configs
    pub fn min_delay(&self) -> Duration {
        let secs = self.politeness.min_delay_secs.clamp(0.0, MAX_MIN_DELAY_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !(0.0..=MAX_MIN_DELAY_SECS).contains(&self.politeness.min_delay_secs) {
            return invalid(format!(
                "politeness.min_delay_secs must be within [0, {}]",
                MAX_MIN_DELAY_SECS
            ));
        }
        if self.fetch.max_concurrent == 0 {
            return invalid("fetch.max_concurrent must be at least 1".into());
        }
        if !(self.rate_gate.capacity >= 1.0) {
            return invalid("rate_gate.capacity must be at least 1".into());
        }
        if !(self.rate_gate.refill_per_sec > 0.0) || !self.rate_gate.refill_per_sec.is_finite() {
            return invalid("rate_gate.refill_per_sec must be positive".into());
        }
        if self.extraction.batch_size == 0 {
            return invalid("extraction.batch_size must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.extraction.confidence_threshold) {
            return invalid("extraction.confidence_threshold must be within [0, 1]".into());
        }
        let q = &self.quality;
        if !(0.0..=1.0).contains(&q.error) || !(0.0..=1.0).contains(&q.warning) {
            return invalid("quality thresholds must be within [0, 1]".into());
        }
        if q.error > q.warning {
            return invalid(format!(
                "quality.error ({}) must not exceed quality.warning ({})",
                q.error, q.warning
            ));
        }
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return invalid("every source needs a name".into());
            }
            if !source.url.starts_with("http://") && !source.url.starts_with("https://") {
                return invalid(format!("source {} has a non-http url: {}", source.name, source.url));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tier;

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.extraction.batch_size, 3);
        assert!(!config.effective_sources().is_empty());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            [[sources]]
            name = "Premium Times"
            tier = "fast"
            url = "https://www.premiumtimesng.com/feed"

            [extraction]
            batch_size = 5
            confidence_threshold = 0.7

            [quality]
            warning = 0.9
            error = 0.4
        "#;

        let config = PipelineConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].tier, Tier::Fast);
        assert!(config.sources[0].active);
        assert_eq!(config.extraction.batch_size, 5);
        assert_eq!(config.extraction.max_retries, 3);
        assert_eq!(config.quality.warning, 0.9);
        assert_eq!(config.politeness.min_delay_secs, 3.0);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let toml_str = r#"
            [quality]
            warning = 0.3
            error = 0.6
        "#;
        assert!(matches!(
            PipelineConfig::from_toml(toml_str),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_zero_batch_and_refill() {
        let mut config = PipelineConfig::default();
        config.extraction.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.rate_gate.refill_per_sec = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unbounded_min_delay() {
        let toml_str = r#"
            [politeness]
            min_delay_secs = 1e300
        "#;
        assert!(matches!(
            PipelineConfig::from_toml(toml_str),
            Err(ConfigError::Invalid(_))
        ));

        let mut config = PipelineConfig::default();
        config.politeness.min_delay_secs = f64::NAN;
        assert!(config.validate().is_err());
        assert_eq!(config.min_delay(), Duration::ZERO);

        config.politeness.min_delay_secs = 1e300;
        assert_eq!(config.min_delay(), Duration::from_secs(3600));
    }

    #[test]
    fn test_shipped_sample_config_parses() {
        let config = PipelineConfig::from_toml(include_str!("../../config/lookout.toml")).unwrap();
        assert_eq!(config.sources.len(), 4);
        assert_eq!(config.sources[3].kind, crate::SourceKind::Page);
        assert_eq!(config.relevance.extra_keywords.len(), 2);
        assert_eq!(config.run.timeout(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_run_timeout_zero_means_none() {
        let run = RunConfig { timeout_secs: Some(0) };
        assert!(run.timeout().is_none());
        let run = RunConfig { timeout_secs: Some(90) };
        assert_eq!(run.timeout(), Some(Duration::from_secs(90)));
    }
}
