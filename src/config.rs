use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use serde::Deserialize;

use crate::kernel::correlator::RuleBook;
use crate::kernel::matcher::{CosineSimilarity, GaussianSimilarity, PatternTemplate, Similarity, TemplateError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid `{section}`: {reason}")]
    Invalid { section: &'static str, reason: String },
    #[error(transparent)]
    Template(#[from] TemplateError),
}

fn invalid(section: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        section,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub buffer: BufferConfig,
    pub matcher: MatcherConfig,
    pub biometrics: BiometricConfig,
    pub correlation: RuleBook,
    pub dispatch: DispatchConfig,
    pub catalog: CatalogConfig,
    /// Upper bound on waiting for a closing event's tasks to wind down.
    pub shutdown_grace_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            matcher: MatcherConfig::default(),
            biometrics: BiometricConfig::default(),
            correlation: RuleBook::default(),
            dispatch: DispatchConfig::default(),
            catalog: CatalogConfig::default(),
            shutdown_grace_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Per-stream record count before the oldest is evicted.
    pub capacity: usize,
    /// Per-stream time horizon; older records expire silently.
    pub horizon_ms: u64,
    /// How far behind a stream's last-seen timestamp a record may be.
    pub skew_tolerance_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            horizon_ms: 10_000,
            skew_tolerance_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimilarityConfig {
    Gaussian { sharpness: f32 },
    Cosine,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        SimilarityConfig::Gaussian { sharpness: 1.5 }
    }
}

impl SimilarityConfig {
    pub fn build(&self) -> Arc<dyn Similarity> {
        match self {
            SimilarityConfig::Gaussian { sharpness } => Arc::new(GaussianSimilarity { sharpness: *sharpness }),
            SimilarityConfig::Cosine => Arc::new(CosineSimilarity),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub similarity: SimilarityConfig,
    /// Pending evaluations per event before new ones are skipped.
    pub queue_depth: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity: SimilarityConfig::default(),
            queue_depth: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BiometricConfig {
    /// EWMA smoothing factor in (0, 1].
    pub alpha: f32,
    pub freshness_ms: u64,
    pub resting_heart_rate: f32,
    pub peak_heart_rate: f32,
    pub gsr_ceiling: f32,
}

impl Default for BiometricConfig {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            freshness_ms: 5_000,
            resting_heart_rate: 60.0,
            peak_heart_rate: 180.0,
            gsr_ceiling: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub ack_timeout_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub queue_depth: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 500,
            max_attempts: 4,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            queue_depth: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub poll_interval_ms: u64,
    pub fetch_timeout_ms: u64,
    /// Remote catalog endpoint. Inline `templates` are used when unset.
    pub url: Option<String>,
    pub templates: Vec<PatternTemplate>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            fetch_timeout_ms: 2_000,
            url: None,
            templates: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer.capacity == 0 {
            return Err(invalid("buffer", "capacity must be at least 1"));
        }
        if self.buffer.horizon_ms == 0 {
            return Err(invalid("buffer", "horizon_ms must be positive"));
        }

        if let SimilarityConfig::Gaussian { sharpness } = self.matcher.similarity {
            if !sharpness.is_finite() || sharpness <= 0.0 {
                return Err(invalid("matcher", "gaussian sharpness must be positive"));
            }
        }
        if self.matcher.queue_depth == 0 {
            return Err(invalid("matcher", "queue_depth must be at least 1"));
        }

        let bio = &self.biometrics;
        if !(bio.alpha > 0.0 && bio.alpha <= 1.0) {
            return Err(invalid("biometrics", format!("alpha {} outside (0, 1]", bio.alpha)));
        }
        if bio.freshness_ms == 0 {
            return Err(invalid("biometrics", "freshness_ms must be positive"));
        }
        if bio.peak_heart_rate <= bio.resting_heart_rate {
            return Err(invalid("biometrics", "peak_heart_rate must exceed resting_heart_rate"));
        }
        if bio.gsr_ceiling <= 0.0 {
            return Err(invalid("biometrics", "gsr_ceiling must be positive"));
        }

        let mut seen = HashSet::new();
        for rule in &self.correlation.rules {
            if !seen.insert(&rule.template) {
                return Err(invalid("correlation", format!("duplicate rule for template {}", rule.template)));
            }
            let mut kinds = HashSet::new();
            for trigger in &rule.triggers {
                if !kinds.insert(trigger.kind()) {
                    return Err(invalid(
                        "correlation",
                        format!("rule {} declares more than one {} trigger", rule.template, trigger.kind()),
                    ));
                }
            }
        }
        if let Some(crossing) = &self.correlation.crossing {
            if !(crossing.threshold > 0.0 && crossing.threshold <= 1.0) {
                return Err(invalid("correlation", "crossing threshold outside (0, 1]"));
            }
            if crossing.hysteresis < 0.0 {
                return Err(invalid("correlation", "crossing hysteresis must not be negative"));
            }
        }

        let d = &self.dispatch;
        if d.max_attempts == 0 {
            return Err(invalid("dispatch", "max_attempts must be at least 1"));
        }
        if d.ack_timeout_ms == 0 {
            return Err(invalid("dispatch", "ack_timeout_ms must be positive"));
        }
        if d.initial_backoff_ms > d.max_backoff_ms {
            return Err(invalid("dispatch", "initial_backoff_ms exceeds max_backoff_ms"));
        }
        if d.queue_depth == 0 {
            return Err(invalid("dispatch", "queue_depth must be at least 1"));
        }

        if self.catalog.poll_interval_ms == 0 || self.catalog.fetch_timeout_ms == 0 {
            return Err(invalid("catalog", "poll_interval_ms and fetch_timeout_ms must be positive"));
        }
        for template in &self.catalog.templates {
            template.validate()?;
        }

        Ok(())
    }
}
