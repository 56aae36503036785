// ============================================
// Confidence Estimator
// ============================================
//
// Statistical reliability descriptor over a sample of match scores:
//
//   mean     = Σ s / n
//   variance = Σ (s - mean)² / n          (population)
//   CI       = z * sqrt(variance) / sqrt(n),   z = 1.96 (95%, two-sided)
//
// The normal approximation is acceptable because scores live in [0, 1].
// Folding new samples uses the pooled-variance merge, so a running
// confidence never needs the raw history.

use crate::error::{Result, TargetingError};
use crate::models::PropertyCell;
use crate::utils::mean_and_variance;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// z-score for a 95% two-sided interval
pub const Z_95: f64 = 1.96;
/// Minimum confidence score for a reliable estimate
pub const RELIABLE_MIN_SCORE: f64 = 0.6;
/// Minimum sample size for a reliable estimate
pub const RELIABLE_MIN_SAMPLES: usize = 10;

pub const METHOD_SAMPLE: &str = "sample_statistics";
pub const METHOD_EXPLICIT_SCORE: &str = "explicit_score";
pub const METHOD_INCREMENTAL: &str = "incremental_update";
pub const METHOD_DEFAULT: &str = "default";

const METRICS_CATEGORY: &str = "statistics";
const METRICS_SOURCE: &str = "confidence_estimator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ConfidenceLevel::VeryHigh
        } else if score >= 0.6 {
            ConfidenceLevel::High
        } else if score >= 0.4 {
            ConfidenceLevel::Medium
        } else if score >= 0.2 {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::VeryLow => "very_low",
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
            ConfidenceLevel::VeryHigh => "very_high",
        }
    }
}

pub fn is_reliable(confidence_score: f64, sample_size: usize) -> bool {
    confidence_score >= RELIABLE_MIN_SCORE && sample_size >= RELIABLE_MIN_SAMPLES
}

/// 95% half-width of the interval around the mean
pub fn confidence_interval(standard_deviation: f64, sample_size: usize) -> f64 {
    if sample_size <= 1 {
        return 0.0;
    }
    Z_95 * standard_deviation / (sample_size as f64).sqrt()
}

/// Immutable confidence descriptor; every update yields a new instance.
///
/// Deserialization rebuilds the descriptor from its sample summary, so level,
/// reliability, spread and interval always follow from the stored score and
/// sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMatchConfidence")]
pub struct MatchConfidence {
    confidence_score: f64,
    sample_size: usize,
    mean: f64,
    variance: f64,
    standard_deviation: f64,
    confidence_interval: f64,
    level: ConfidenceLevel,
    is_reliable: bool,
    calculation_method: String,
    statistical_metrics: Vec<PropertyCell>,
}

struct SampleSummary {
    n: usize,
    mean: f64,
    variance: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl MatchConfidence {
    /// Confidence over a score sample; the confidence score is the sample mean
    pub fn from_scores(samples: &[f64]) -> Result<Self> {
        let summary = summarize(samples)?;
        let score = summary.mean;
        Self::from_summary(score, summary, METHOD_SAMPLE)
    }

    /// Confidence over a score sample with an externally chosen confidence score
    pub fn with_score(confidence_score: f64, samples: &[f64]) -> Result<Self> {
        validate_score(confidence_score, "confidence score")?;
        let summary = summarize(samples)?;
        Self::from_summary(confidence_score, summary, METHOD_EXPLICIT_SCORE)
    }

    /// Fallback used before any sample exists
    pub fn create_default() -> Self {
        Self {
            confidence_score: 0.5,
            sample_size: 1,
            mean: 0.5,
            variance: 0.0,
            standard_deviation: 0.0,
            confidence_interval: 0.0,
            level: ConfidenceLevel::from_score(0.5),
            is_reliable: false,
            calculation_method: METHOD_DEFAULT.to_string(),
            statistical_metrics: Vec::new(),
        }
    }

    /// Fold `new_samples` into this estimate and return the merged estimate.
    ///
    /// The prior sample is carried as `(n, mean, variance)`; the merge is the
    /// pooled-variance combination, equal to recomputing over the prior
    /// sample concatenated with `new_samples`.
    ///
    /// The merged confidence score is the pooled mean. A score chosen through
    /// [`with_score`](Self::with_score) does not survive the fold.
    pub fn update_statistics(&self, new_samples: &[f64]) -> Result<Self> {
        if new_samples.is_empty() {
            return Ok(self.clone());
        }

        let incoming = summarize(new_samples)?;
        let n1 = self.sample_size as f64;
        let n2 = incoming.n as f64;
        let n = n1 + n2;

        let delta = incoming.mean - self.mean;
        let mean = self.mean + delta * n2 / n;
        let m2 = self.variance * n1 + incoming.variance * n2 + delta * delta * n1 * n2 / n;
        // Guard against tiny negative values from cancellation
        let variance = (m2 / n).max(0.0);

        let prior_min = self.metric("min").or(Some(self.mean));
        let prior_max = self.metric("max").or(Some(self.mean));

        let merged = SampleSummary {
            n: self.sample_size + incoming.n,
            mean: mean.clamp(0.0, 1.0),
            variance,
            min: min_of(prior_min, incoming.min),
            max: max_of(prior_max, incoming.max),
        };

        debug!(
            prior_samples = self.sample_size,
            new_samples = incoming.n,
            mean = merged.mean,
            "Folded samples into confidence estimate"
        );

        let score = merged.mean;
        Self::from_summary(score, merged, METHOD_INCREMENTAL)
    }

    fn from_summary(confidence_score: f64, summary: SampleSummary, method: &str) -> Result<Self> {
        let standard_deviation = summary.variance.sqrt();
        let interval = confidence_interval(standard_deviation, summary.n);

        let mut metrics = vec![
            metric_cell("mean", summary.mean)?,
            metric_cell("variance", summary.variance)?,
            metric_cell("standard_deviation", standard_deviation)?,
            metric_cell("confidence_interval", interval)?,
            metric_cell("lower_bound", (summary.mean - interval).max(0.0))?,
            metric_cell("upper_bound", (summary.mean + interval).min(1.0))?,
        ];
        if let Some(min) = summary.min {
            metrics.push(metric_cell("min", min)?);
        }
        if let Some(max) = summary.max {
            metrics.push(metric_cell("max", max)?);
        }
        metrics.sort_by(|a, b| a.key().cmp(b.key()));

        Ok(Self {
            confidence_score,
            sample_size: summary.n,
            mean: summary.mean,
            variance: summary.variance,
            standard_deviation,
            confidence_interval: interval,
            level: ConfidenceLevel::from_score(confidence_score),
            is_reliable: is_reliable(confidence_score, summary.n),
            calculation_method: method.to_string(),
            statistical_metrics: metrics,
        })
    }

    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    pub fn standard_deviation(&self) -> f64 {
        self.standard_deviation
    }

    pub fn confidence_interval(&self) -> f64 {
        self.confidence_interval
    }

    pub fn level(&self) -> ConfidenceLevel {
        self.level
    }

    pub fn is_reliable(&self) -> bool {
        self.is_reliable
    }

    pub fn calculation_method(&self) -> &str {
        &self.calculation_method
    }

    /// Metrics sorted by key
    pub fn statistical_metrics(&self) -> &[PropertyCell] {
        &self.statistical_metrics
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        crate::models::find_sorted(&self.statistical_metrics, key).and_then(|m| m.as_f64())
    }

    /// `mean ± CI`, clipped to the score domain
    pub fn bounds(&self) -> (f64, f64) {
        (
            (self.mean - self.confidence_interval).max(0.0),
            (self.mean + self.confidence_interval).min(1.0),
        )
    }
}

#[derive(Deserialize)]
struct RawMatchConfidence {
    confidence_score: f64,
    sample_size: usize,
    mean: f64,
    variance: f64,
    calculation_method: String,
    #[serde(default)]
    statistical_metrics: Vec<PropertyCell>,
}

impl TryFrom<RawMatchConfidence> for MatchConfidence {
    type Error = TargetingError;

    fn try_from(raw: RawMatchConfidence) -> Result<Self> {
        validate_score(raw.confidence_score, "confidence score")?;
        validate_score(raw.mean, "mean")?;
        if raw.sample_size == 0 {
            return Err(TargetingError::InvalidConfidence(
                "sample size must be at least 1".to_string(),
            ));
        }
        if !raw.variance.is_finite() || raw.variance < 0.0 {
            return Err(TargetingError::InvalidConfidence(format!(
                "variance must be a finite non-negative number, got {}",
                raw.variance
            )));
        }

        let bound = |key: &str| -> Result<Option<f64>> {
            let Some(cell) = raw.statistical_metrics.iter().find(|m| m.key() == key) else {
                return Ok(None);
            };
            let value = cell.as_f64().ok_or_else(|| {
                TargetingError::InvalidConfidence(format!("metric {} is not a number", key))
            })?;
            validate_score(value, key)?;
            Ok(Some(value))
        };

        let summary = SampleSummary {
            n: raw.sample_size,
            mean: raw.mean,
            variance: raw.variance,
            min: bound("min")?,
            max: bound("max")?,
        };
        let mut confidence =
            Self::from_summary(raw.confidence_score, summary, &raw.calculation_method)?;
        // Default estimates carry no metrics
        if raw.statistical_metrics.is_empty() {
            confidence.statistical_metrics.clear();
        }
        Ok(confidence)
    }
}

fn validate_score(score: f64, what: &str) -> Result<()> {
    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(TargetingError::InvalidConfidence(format!(
            "{} must be within [0, 1], got {}",
            what, score
        )));
    }
    Ok(())
}

fn summarize(samples: &[f64]) -> Result<SampleSummary> {
    for &s in samples {
        validate_score(s, "sample")?;
    }
    let (mean, variance) = mean_and_variance(samples).ok_or_else(|| {
        TargetingError::InvalidConfidence("sample must not be empty".to_string())
    })?;

    Ok(SampleSummary {
        n: samples.len(),
        mean,
        variance,
        min: samples.iter().copied().reduce(f64::min),
        max: samples.iter().copied().reduce(f64::max),
    })
}

fn metric_cell(key: &str, value: f64) -> Result<PropertyCell> {
    Ok(PropertyCell::float(key, value)?
        .with_category(METRICS_CATEGORY)
        .with_source(METRICS_SOURCE))
}

fn min_of(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn max_of(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}
