use crate::error::{Result, TargetingError};
use crate::services::aggregation::MatchPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment prefix for every engine setting, e.g. `TARGETING_MATCH_THRESHOLD`.
pub const ENV_PREFIX: &str = "TARGETING_";

/// Engine tuning knobs.
///
/// Loaded from `TARGETING_*` environment variables (and `.env` when present);
/// any variable left unset falls back to its default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Minimum overall score for a candidate to match
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,

    /// Per-evaluator time budget
    #[serde(default = "default_evaluator_timeout_ms")]
    pub evaluator_timeout_ms: u64,

    /// Criteria slower than this are reported as optimization targets
    #[serde(default = "default_slow_criterion_ms")]
    pub slow_criterion_ms: u64,

    #[serde(default)]
    pub match_policy: MatchPolicy,

    /// Attach a `MatchConfidence` to every aggregated result
    #[serde(default = "default_compute_confidence")]
    pub compute_confidence: bool,

    /// Upper bound on candidates accepted by a single batch evaluation
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_match_threshold() -> f64 {
    0.5
}

fn default_evaluator_timeout_ms() -> u64 {
    50
}

fn default_slow_criterion_ms() -> u64 {
    10
}

fn default_compute_confidence() -> bool {
    true
}

fn default_max_batch_size() -> usize {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            evaluator_timeout_ms: default_evaluator_timeout_ms(),
            slow_criterion_ms: default_slow_criterion_ms(),
            match_policy: MatchPolicy::default(),
            compute_confidence: default_compute_confidence(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config: EngineConfig = envy::prefixed(ENV_PREFIX).from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from explicit key/value pairs (keys carry the `TARGETING_` prefix).
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: EngineConfig = envy::prefixed(ENV_PREFIX).from_iter(pairs)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.match_threshold.is_finite() || !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(TargetingError::InvalidConfig(format!(
                "match_threshold must be within [0, 1], got {}",
                self.match_threshold
            )));
        }
        if self.evaluator_timeout_ms == 0 {
            return Err(TargetingError::InvalidConfig(
                "evaluator_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(TargetingError::InvalidConfig(
                "max_batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn evaluator_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluator_timeout_ms)
    }

    pub fn slow_criterion_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_criterion_ms)
    }
}
