use super::property::{find_sorted, upsert_sorted, PropertyCell};
use super::CriteriaType;
use crate::error::{Result, TargetingError};
use crate::utils::duration_ms;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Machine-readable reason codes
pub mod reason {
    pub const MATCH_SUCCESS: &str = "MATCH_SUCCESS";
    pub const NO_CRITERIA: &str = "NO_CRITERIA";
    pub const INVALID_WEIGHTS: &str = "INVALID_WEIGHTS";
    pub const SCORE_BELOW_THRESHOLD: &str = "SCORE_BELOW_THRESHOLD";
    pub const REQUIRED_CRITERIA_FAILED: &str = "REQUIRED_CRITERIA_FAILED";
    pub const CRITERIA_FAILED: &str = "CRITERIA_FAILED";

    pub const MISSING_CONTEXT: &str = "MISSING_CONTEXT";
    pub const NO_CONTEXT_NEUTRAL: &str = "NO_CONTEXT_NEUTRAL";
    pub const EVALUATOR_ERROR: &str = "EVALUATOR_ERROR";
    pub const TIMEOUT: &str = "TIMEOUT";
}

/// Result of evaluating one targeting criterion against one request context.
///
/// Built through [`CriterionOutcomeBuilder`], which rejects out-of-range
/// scores and weights instead of clamping them. A non-matching outcome may
/// report a partial score for diagnostics, but [`effective_score`] is what
/// aggregation uses and it is always 0 for non-matches.
///
/// Equality and hashing cover the decision only; `execution_time` is left
/// out so repeated evaluations of the same request compare equal.
///
/// [`effective_score`]: CriterionOutcome::effective_score
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawCriterionOutcome")]
pub struct CriterionOutcome {
    criteria_type: CriteriaType,
    criteria_id: String,
    is_match: bool,
    match_score: f64,
    weight: f64,
    is_required: bool,
    priority: i32,
    reason: String,
    #[serde(serialize_with = "duration_ms::serialize")]
    execution_time: Duration,
    details: Vec<PropertyCell>,
}

impl CriterionOutcome {
    pub fn matched(
        criteria_type: CriteriaType,
        criteria_id: impl Into<String>,
        score: f64,
        reason: impl Into<String>,
    ) -> CriterionOutcomeBuilder {
        CriterionOutcomeBuilder::new(criteria_type, criteria_id.into(), true, score, reason.into())
    }

    pub fn not_matched(
        criteria_type: CriteriaType,
        criteria_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> CriterionOutcomeBuilder {
        CriterionOutcomeBuilder::new(criteria_type, criteria_id.into(), false, 0.0, reason.into())
    }

    /// Always-valid non-match for a criterion whose own settings could not
    /// be carried over (e.g. a custom evaluator reporting a bad weight)
    pub(crate) fn fallback(criteria_type: CriteriaType, is_required: bool, reason: &str) -> Self {
        Self {
            criteria_type,
            criteria_id: criteria_type.as_str().to_string(),
            is_match: false,
            match_score: 0.0,
            weight: 1.0,
            is_required,
            priority: 0,
            reason: reason.to_string(),
            execution_time: Duration::ZERO,
            details: Vec::new(),
        }
    }

    pub fn criteria_type(&self) -> CriteriaType {
        self.criteria_type
    }

    pub fn criteria_id(&self) -> &str {
        &self.criteria_id
    }

    pub fn is_match(&self) -> bool {
        self.is_match
    }

    /// Score as reported by the evaluator
    pub fn match_score(&self) -> f64 {
        self.match_score
    }

    /// Score used for aggregation
    pub fn effective_score(&self) -> f64 {
        if self.is_match {
            self.match_score
        } else {
            0.0
        }
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn is_required(&self) -> bool {
        self.is_required
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn match_reason(&self) -> Option<&str> {
        self.is_match.then_some(self.reason.as_str())
    }

    pub fn not_match_reason(&self) -> Option<&str> {
        (!self.is_match).then_some(self.reason.as_str())
    }

    pub fn execution_time(&self) -> Duration {
        self.execution_time
    }

    /// Details sorted by key
    pub fn details(&self) -> &[PropertyCell] {
        &self.details
    }

    pub fn detail(&self, key: &str) -> Option<&PropertyCell> {
        find_sorted(&self.details, key)
    }

    pub fn is_required_failure(&self) -> bool {
        self.is_required && !self.is_match
    }

    /// Canonical ordering key used before aggregation and hashing
    pub fn sort_key(&self) -> (CriteriaType, &str) {
        (self.criteria_type, self.criteria_id.as_str())
    }

    pub fn with_execution_time(mut self, execution_time: Duration) -> Self {
        self.execution_time = execution_time;
        self
    }

    pub fn with_detail(mut self, detail: PropertyCell) -> Self {
        upsert_sorted(&mut self.details, detail);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.criteria_id.trim().is_empty() {
            return Err(TargetingError::InvalidOutcome(format!(
                "{} outcome has an empty criteria id",
                self.criteria_type
            )));
        }
        if !self.match_score.is_finite() || !(0.0..=1.0).contains(&self.match_score) {
            return Err(TargetingError::InvalidOutcome(format!(
                "{}/{}: match score must be within [0, 1], got {}",
                self.criteria_type, self.criteria_id, self.match_score
            )));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(TargetingError::InvalidOutcome(format!(
                "{}/{}: weight must be a finite non-negative number, got {}",
                self.criteria_type, self.criteria_id, self.weight
            )));
        }
        if self.is_required && self.weight == 0.0 {
            return Err(TargetingError::InvalidOutcome(format!(
                "{}/{}: required criterion must carry a positive weight",
                self.criteria_type, self.criteria_id
            )));
        }
        Ok(())
    }
}

impl PartialEq for CriterionOutcome {
    fn eq(&self, other: &Self) -> bool {
        self.criteria_type == other.criteria_type
            && self.criteria_id == other.criteria_id
            && self.is_match == other.is_match
            && self.match_score.to_bits() == other.match_score.to_bits()
            && self.weight.to_bits() == other.weight.to_bits()
            && self.is_required == other.is_required
            && self.priority == other.priority
            && self.reason == other.reason
            && self.details == other.details
    }
}

impl Eq for CriterionOutcome {}

impl Hash for CriterionOutcome {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.criteria_type.hash(state);
        self.criteria_id.hash(state);
        self.is_match.hash(state);
        self.match_score.to_bits().hash(state);
        self.weight.to_bits().hash(state);
        self.is_required.hash(state);
        self.priority.hash(state);
        self.reason.hash(state);
        self.details.hash(state);
    }
}

/// Builder for [`CriterionOutcome`]; `build` validates every invariant.
#[derive(Debug, Clone)]
pub struct CriterionOutcomeBuilder {
    outcome: CriterionOutcome,
}

impl CriterionOutcomeBuilder {
    fn new(
        criteria_type: CriteriaType,
        criteria_id: String,
        is_match: bool,
        match_score: f64,
        reason: String,
    ) -> Self {
        Self {
            outcome: CriterionOutcome {
                criteria_type,
                criteria_id,
                is_match,
                match_score,
                weight: 1.0,
                is_required: false,
                priority: 0,
                reason,
                execution_time: Duration::ZERO,
                details: Vec::new(),
            },
        }
    }

    /// Override the reported score (e.g. partial credit on a non-match)
    pub fn score(mut self, score: f64) -> Self {
        self.outcome.match_score = score;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.outcome.weight = weight;
        self
    }

    pub fn required(mut self, is_required: bool) -> Self {
        self.outcome.is_required = is_required;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.outcome.priority = priority;
        self
    }

    pub fn execution_time(mut self, execution_time: Duration) -> Self {
        self.outcome.execution_time = execution_time;
        self
    }

    pub fn detail(mut self, detail: PropertyCell) -> Self {
        upsert_sorted(&mut self.outcome.details, detail);
        self
    }

    pub fn build(self) -> Result<CriterionOutcome> {
        let mut outcome = self.outcome;
        // -0.0 and 0.0 must hash the same
        outcome.match_score += 0.0;
        outcome.weight += 0.0;
        outcome.validate()?;
        Ok(outcome)
    }
}

#[derive(Deserialize)]
struct RawCriterionOutcome {
    criteria_type: CriteriaType,
    criteria_id: String,
    is_match: bool,
    match_score: f64,
    weight: f64,
    is_required: bool,
    #[serde(default)]
    priority: i32,
    reason: String,
    #[serde(with = "duration_ms", default)]
    execution_time: Duration,
    #[serde(default)]
    details: Vec<PropertyCell>,
}

impl TryFrom<RawCriterionOutcome> for CriterionOutcome {
    type Error = TargetingError;

    fn try_from(raw: RawCriterionOutcome) -> Result<Self> {
        let mut builder = CriterionOutcomeBuilder::new(
            raw.criteria_type,
            raw.criteria_id,
            raw.is_match,
            raw.match_score,
            raw.reason,
        )
        .weight(raw.weight)
        .required(raw.is_required)
        .priority(raw.priority)
        .execution_time(raw.execution_time);

        for detail in raw.details {
            builder = builder.detail(detail);
        }

        builder.build()
    }
}
