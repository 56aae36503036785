// ============================================
// Match Aggregator
// ============================================
//
// Combines per-criterion outcomes into one decision:
//
//   w_i'   = w_i / Σ w
//   score  = Σ effective_score_i * w_i'
//   match  = no required criterion failed  AND  score >= threshold
//
// Outcomes are sorted by (criteria_type, criteria_id) before anything is
// summed, so the result is bit-identical for any evaluator completion order.
// Degenerate inputs (no outcomes, zero total weight) produce defined
// non-matching results rather than errors.

use crate::config::EngineConfig;
use crate::error::{Result, TargetingError};
use crate::metrics::TargetingMetrics;
use crate::models::{
    reason, CandidateId, ContextId, CriteriaType, CriterionOutcome, OverallMatchResult,
};
use crate::services::confidence::MatchConfidence;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.5;
pub const DEFAULT_SLOW_CRITERION: Duration = Duration::from_millis(10);

/// Which failing criteria veto a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Only required criteria veto; optional ones just lower the score
    #[default]
    RequiredOnly,
    /// Any non-matching criterion vetoes
    AllCriteria,
}

#[derive(Debug, Clone)]
pub struct MatchAggregator {
    match_threshold: f64,
    policy: MatchPolicy,
    compute_confidence: bool,
    slow_criterion_threshold: Duration,
}

impl Default for MatchAggregator {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            policy: MatchPolicy::default(),
            compute_confidence: true,
            slow_criterion_threshold: DEFAULT_SLOW_CRITERION,
        }
    }
}

impl MatchAggregator {
    pub fn new(match_threshold: f64) -> Result<Self> {
        if !match_threshold.is_finite() || !(0.0..=1.0).contains(&match_threshold) {
            return Err(TargetingError::InvalidConfig(format!(
                "match threshold must be within [0, 1], got {}",
                match_threshold
            )));
        }
        Ok(Self {
            match_threshold,
            ..Default::default()
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self::new(config.match_threshold)?
            .with_policy(config.match_policy)
            .with_confidence(config.compute_confidence)
            .with_slow_criterion_threshold(config.slow_criterion_threshold()))
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_confidence(mut self, compute_confidence: bool) -> Self {
        self.compute_confidence = compute_confidence;
        self
    }

    pub fn with_slow_criterion_threshold(mut self, threshold: Duration) -> Self {
        self.slow_criterion_threshold = threshold;
        self
    }

    pub fn match_threshold(&self) -> f64 {
        self.match_threshold
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Aggregate a finished set of outcomes. Never fails: outcomes were
    /// validated when they were built.
    pub fn aggregate(
        &self,
        candidate_id: CandidateId,
        context_id: ContextId,
        mut outcomes: Vec<CriterionOutcome>,
    ) -> OverallMatchResult {
        outcomes.sort_by(canonical_order);

        if outcomes.is_empty() {
            debug!(candidate_id = %candidate_id, "No criteria to aggregate");
            return self.finish(
                candidate_id,
                context_id,
                0.0,
                false,
                outcomes,
                BTreeMap::new(),
                reason::NO_CRITERIA.to_string(),
            );
        }

        self.report_slow_criteria(&candidate_id, &outcomes);

        let total_weight: f64 = outcomes.iter().map(CriterionOutcome::weight).sum();
        if total_weight <= 0.0 {
            warn!(
                candidate_id = %candidate_id,
                criteria_count = outcomes.len(),
                "Total criterion weight is zero"
            );
            let weighted_scores = outcomes
                .iter()
                .map(|o| (o.criteria_type(), 0.0))
                .collect();
            return self.finish(
                candidate_id,
                context_id,
                0.0,
                false,
                outcomes,
                weighted_scores,
                reason::INVALID_WEIGHTS.to_string(),
            );
        }

        let mut weighted_scores: BTreeMap<CriteriaType, f64> = BTreeMap::new();
        let mut overall_score = 0.0;
        for outcome in &outcomes {
            let contribution = outcome.effective_score() * (outcome.weight() / total_weight);
            *weighted_scores.entry(outcome.criteria_type()).or_insert(0.0) += contribution;
            overall_score += contribution;
        }
        // Rounding can push a perfect score a hair above 1
        let overall_score = overall_score.min(1.0);

        let failed_required = failed_types(outcomes.iter().filter(|o| o.is_required_failure()));
        let failed_any = failed_types(outcomes.iter().filter(|o| !o.is_match()));

        let vetoed = match self.policy {
            MatchPolicy::RequiredOnly => !failed_required.is_empty(),
            MatchPolicy::AllCriteria => !failed_any.is_empty(),
        };
        let is_match = !vetoed && overall_score >= self.match_threshold;

        let reason_code = if is_match {
            reason::MATCH_SUCCESS.to_string()
        } else if !failed_required.is_empty() {
            format!(
                "{}: {}",
                reason::REQUIRED_CRITERIA_FAILED,
                join_types(&failed_required)
            )
        } else if vetoed {
            format!("{}: {}", reason::CRITERIA_FAILED, join_types(&failed_any))
        } else {
            reason::SCORE_BELOW_THRESHOLD.to_string()
        };

        debug!(
            candidate_id = %candidate_id,
            overall_score = overall_score,
            is_match = is_match,
            reason_code = %reason_code,
            "Aggregated criteria"
        );

        self.finish(
            candidate_id,
            context_id,
            overall_score,
            is_match,
            outcomes,
            weighted_scores,
            reason_code,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        candidate_id: CandidateId,
        context_id: ContextId,
        overall_score: f64,
        is_match: bool,
        outcomes: Vec<CriterionOutcome>,
        weighted_scores: BTreeMap<CriteriaType, f64>,
        reason_code: String,
    ) -> OverallMatchResult {
        let confidence = if self.compute_confidence {
            Some(confidence_for(&outcomes))
        } else {
            None
        };

        TargetingMetrics::record_evaluation(if is_match { "match" } else { "no_match" });

        OverallMatchResult::new(
            candidate_id,
            context_id,
            overall_score,
            is_match,
            outcomes,
            weighted_scores,
            reason_code,
            confidence,
        )
    }

    fn report_slow_criteria(&self, candidate_id: &CandidateId, outcomes: &[CriterionOutcome]) {
        for outcome in outcomes {
            let elapsed = outcome.execution_time();
            TargetingMetrics::record_criterion_duration(
                outcome.criteria_type().as_str(),
                elapsed.as_secs_f64(),
            );
            if elapsed > self.slow_criterion_threshold {
                warn!(
                    candidate_id = %candidate_id,
                    criteria_type = %outcome.criteria_type(),
                    criteria_id = outcome.criteria_id(),
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    threshold_ms = self.slow_criterion_threshold.as_secs_f64() * 1000.0,
                    "Slow criterion"
                );
                TargetingMetrics::record_slow_criterion(outcome.criteria_type().as_str());
            }
        }
    }
}

/// Confidence over the effective scores; default when there is no sample
fn confidence_for(outcomes: &[CriterionOutcome]) -> MatchConfidence {
    let samples: Vec<f64> = outcomes.iter().map(CriterionOutcome::effective_score).collect();
    MatchConfidence::from_scores(&samples).unwrap_or_else(|_| MatchConfidence::create_default())
}

/// Total order over outcomes: key first, then the remaining fields, so that
/// even duplicate keys sum in a fixed order.
fn canonical_order(a: &CriterionOutcome, b: &CriterionOutcome) -> Ordering {
    a.sort_key()
        .cmp(&b.sort_key())
        .then_with(|| a.weight().total_cmp(&b.weight()))
        .then_with(|| a.match_score().total_cmp(&b.match_score()))
        .then_with(|| a.is_match().cmp(&b.is_match()))
        .then_with(|| a.is_required().cmp(&b.is_required()))
        .then_with(|| a.priority().cmp(&b.priority()))
        .then_with(|| a.reason().cmp(b.reason()))
}

fn failed_types<'a>(outcomes: impl Iterator<Item = &'a CriterionOutcome>) -> Vec<CriteriaType> {
    let mut types: Vec<CriteriaType> = outcomes.map(CriterionOutcome::criteria_type).collect();
    types.sort();
    types.dedup();
    types
}

fn join_types(types: &[CriteriaType]) -> String {
    types
        .iter()
        .map(CriteriaType::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
