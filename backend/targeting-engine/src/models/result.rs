use super::outcome::CriterionOutcome;
use super::{CandidateId, ContextId, CriteriaType};
use crate::services::aggregation::MatchAggregator;
use crate::services::confidence::MatchConfidence;
use crate::error::{Result, TargetingError};
use crate::utils::duration_ms;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Aggregated accept/reject decision for one (candidate, context) pair.
///
/// Only [`MatchAggregator`] builds these. Outcomes are kept in canonical
/// `(criteria_type, criteria_id)` order so equality does not depend on the
/// order evaluators finished in. Deserialization re-checks the score range
/// and the required veto, and restores canonical order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawOverallMatchResult")]
pub struct OverallMatchResult {
    ad_candidate_id: CandidateId,
    ad_context_id: ContextId,
    overall_score: f64,
    is_overall_match: bool,
    individual_results: Vec<CriterionOutcome>,
    weighted_scores: BTreeMap<CriteriaType, f64>,
    reason_code: String,
    confidence: Option<MatchConfidence>,
    calculated_at: DateTime<Utc>,
    #[serde(serialize_with = "duration_ms::serialize")]
    total_execution_time: Duration,
}

#[derive(Deserialize)]
struct RawOverallMatchResult {
    ad_candidate_id: CandidateId,
    ad_context_id: ContextId,
    overall_score: f64,
    is_overall_match: bool,
    #[serde(default)]
    individual_results: Vec<CriterionOutcome>,
    #[serde(default)]
    weighted_scores: BTreeMap<CriteriaType, f64>,
    reason_code: String,
    #[serde(default)]
    confidence: Option<MatchConfidence>,
    calculated_at: DateTime<Utc>,
}

impl TryFrom<RawOverallMatchResult> for OverallMatchResult {
    type Error = TargetingError;

    fn try_from(raw: RawOverallMatchResult) -> Result<Self> {
        let in_unit_range = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);

        if !in_unit_range(raw.overall_score) {
            return Err(TargetingError::InvalidResult(format!(
                "overall score must be within [0, 1], got {}",
                raw.overall_score
            )));
        }
        if let Some((criteria_type, score)) =
            raw.weighted_scores.iter().find(|(_, s)| !in_unit_range(**s))
        {
            return Err(TargetingError::InvalidResult(format!(
                "weighted score for {} must be within [0, 1], got {}",
                criteria_type, score
            )));
        }
        if raw.reason_code.trim().is_empty() {
            return Err(TargetingError::InvalidResult(
                "reason code must not be empty".to_string(),
            ));
        }

        let mut outcomes = raw.individual_results;
        outcomes.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        if let Some(pair) = outcomes.windows(2).find(|w| w[0].sort_key() == w[1].sort_key()) {
            return Err(TargetingError::InvalidResult(format!(
                "duplicate outcome for {}/{}",
                pair[0].criteria_type(),
                pair[0].criteria_id()
            )));
        }
        if raw.is_overall_match && outcomes.iter().any(CriterionOutcome::is_required_failure) {
            return Err(TargetingError::InvalidResult(
                "a failed required criterion cannot yield an overall match".to_string(),
            ));
        }

        let mut result = Self::new(
            raw.ad_candidate_id,
            raw.ad_context_id,
            raw.overall_score,
            raw.is_overall_match,
            outcomes,
            raw.weighted_scores,
            raw.reason_code,
            raw.confidence,
        );
        result.calculated_at = raw.calculated_at;
        Ok(result)
    }
}

impl OverallMatchResult {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        ad_candidate_id: CandidateId,
        ad_context_id: ContextId,
        overall_score: f64,
        is_overall_match: bool,
        individual_results: Vec<CriterionOutcome>,
        weighted_scores: BTreeMap<CriteriaType, f64>,
        reason_code: String,
        confidence: Option<MatchConfidence>,
    ) -> Self {
        let total_execution_time = individual_results
            .iter()
            .map(CriterionOutcome::execution_time)
            .sum();

        Self {
            ad_candidate_id,
            ad_context_id,
            overall_score,
            is_overall_match,
            individual_results,
            weighted_scores,
            reason_code,
            confidence,
            calculated_at: Utc::now(),
            total_execution_time,
        }
    }

    pub fn ad_candidate_id(&self) -> &CandidateId {
        &self.ad_candidate_id
    }

    pub fn ad_context_id(&self) -> &ContextId {
        &self.ad_context_id
    }

    pub fn overall_score(&self) -> f64 {
        self.overall_score
    }

    pub fn is_overall_match(&self) -> bool {
        self.is_overall_match
    }

    /// Outcomes in canonical order
    pub fn individual_results(&self) -> &[CriterionOutcome] {
        &self.individual_results
    }

    pub fn weighted_scores(&self) -> &BTreeMap<CriteriaType, f64> {
        &self.weighted_scores
    }

    pub fn reason_code(&self) -> &str {
        &self.reason_code
    }

    pub fn confidence(&self) -> Option<&MatchConfidence> {
        self.confidence.as_ref()
    }

    pub fn calculated_at(&self) -> DateTime<Utc> {
        self.calculated_at
    }

    /// Sum of the evaluators' reported execution times
    pub fn total_execution_time(&self) -> Duration {
        self.total_execution_time
    }

    pub fn outcome(&self, criteria_type: CriteriaType) -> Option<&CriterionOutcome> {
        self.individual_results
            .iter()
            .find(|o| o.criteria_type() == criteria_type)
    }

    /// Required criteria that did not match, sorted and de-duplicated
    pub fn failed_required_criteria(&self) -> Vec<CriteriaType> {
        let mut failed: Vec<CriteriaType> = self
            .individual_results
            .iter()
            .filter(|o| o.is_required_failure())
            .map(CriterionOutcome::criteria_type)
            .collect();
        failed.dedup();
        failed
    }

    /// Criteria slower than `threshold`, slowest first
    pub fn slow_criteria(&self, threshold: Duration) -> Vec<&CriterionOutcome> {
        let mut slow: Vec<&CriterionOutcome> = self
            .individual_results
            .iter()
            .filter(|o| o.execution_time() > threshold)
            .collect();
        slow.sort_by(|a, b| b.execution_time().cmp(&a.execution_time()));
        slow
    }
}

/// Equality over the decision projection; `calculated_at` and execution
/// timing are not part of it.
impl PartialEq for OverallMatchResult {
    fn eq(&self, other: &Self) -> bool {
        self.ad_candidate_id == other.ad_candidate_id
            && self.ad_context_id == other.ad_context_id
            && self.overall_score.to_bits() == other.overall_score.to_bits()
            && self.is_overall_match == other.is_overall_match
            && self.reason_code == other.reason_code
            && self.weighted_scores == other.weighted_scores
            && self.confidence == other.confidence
            && self.individual_results == other.individual_results
    }
}

/// Persisted read-model of a match result with its own identity.
///
/// Appending an outcome re-runs aggregation over the full outcome list, so
/// derived fields are never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResultRecord {
    id: Uuid,
    version: u64,
    result: OverallMatchResult,
}

impl MatchResultRecord {
    pub fn new(result: OverallMatchResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: 1,
            result,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn result(&self) -> &OverallMatchResult {
        &self.result
    }

    /// Add an outcome and recompute. An outcome with the same
    /// `(criteria_type, criteria_id)` as an existing one replaces it.
    pub fn append_outcome(&self, outcome: CriterionOutcome, aggregator: &MatchAggregator) -> Self {
        let mut outcomes: Vec<CriterionOutcome> = self
            .result
            .individual_results
            .iter()
            .filter(|existing| existing.sort_key() != outcome.sort_key())
            .cloned()
            .collect();
        outcomes.push(outcome);

        let result = aggregator.aggregate(
            self.result.ad_candidate_id.clone(),
            self.result.ad_context_id.clone(),
            outcomes,
        );

        Self {
            id: self.id,
            version: self.version + 1,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::reason;

    fn outcome(criteria_type: CriteriaType, is_match: bool, required: bool) -> CriterionOutcome {
        let builder = if is_match {
            CriterionOutcome::matched(criteria_type, criteria_type.as_str(), 1.0, "OK")
        } else {
            CriterionOutcome::not_matched(criteria_type, criteria_type.as_str(), "NO")
        };
        builder.required(required).build().unwrap()
    }

    fn aggregate(outcomes: Vec<CriterionOutcome>) -> OverallMatchResult {
        MatchAggregator::default().aggregate(
            CandidateId::new("ad-7").unwrap(),
            ContextId::new("req-7").unwrap(),
            outcomes,
        )
    }

    #[test]
    fn test_equality_ignores_timing() {
        let fast = aggregate(vec![
            outcome(CriteriaType::Geo, true, false),
            outcome(CriteriaType::Device, true, false),
        ]);
        let slow = aggregate(vec![
            outcome(CriteriaType::Device, true, false).with_execution_time(Duration::from_millis(40)),
            outcome(CriteriaType::Geo, true, false),
        ]);

        assert_ne!(fast.total_execution_time(), slow.total_execution_time());
        assert_eq!(fast, slow);
    }

    #[test]
    fn test_total_execution_time_sums_outcomes() {
        let result = aggregate(vec![
            outcome(CriteriaType::Geo, true, false).with_execution_time(Duration::from_millis(3)),
            outcome(CriteriaType::Time, true, false).with_execution_time(Duration::from_millis(4)),
        ]);
        assert_eq!(result.total_execution_time(), Duration::from_millis(7));
    }

    #[test]
    fn test_slow_criteria_sorted_slowest_first() {
        let result = aggregate(vec![
            outcome(CriteriaType::Geo, true, false).with_execution_time(Duration::from_millis(12)),
            outcome(CriteriaType::Time, true, false).with_execution_time(Duration::from_millis(30)),
            outcome(CriteriaType::Device, true, false).with_execution_time(Duration::from_millis(2)),
        ]);

        let slow: Vec<CriteriaType> = result
            .slow_criteria(Duration::from_millis(10))
            .iter()
            .map(|o| o.criteria_type())
            .collect();
        assert_eq!(slow, vec![CriteriaType::Time, CriteriaType::Geo]);
    }

    #[test]
    fn test_failed_required_criteria() {
        let result = aggregate(vec![
            outcome(CriteriaType::Keyword, false, true),
            outcome(CriteriaType::Geo, false, true),
            outcome(CriteriaType::Device, false, false),
        ]);
        assert_eq!(
            result.failed_required_criteria(),
            vec![CriteriaType::Geo, CriteriaType::Keyword]
        );
    }

    #[test]
    fn test_record_append_reaggregates() {
        let aggregator = MatchAggregator::default();
        let record = MatchResultRecord::new(aggregate(vec![outcome(CriteriaType::Geo, true, false)]));
        assert_eq!(record.version(), 1);
        assert!(record.result().is_overall_match());

        let updated = record.append_outcome(outcome(CriteriaType::Device, false, true), &aggregator);

        assert_eq!(updated.id(), record.id());
        assert_eq!(updated.version(), 2);
        assert_eq!(updated.result().individual_results().len(), 2);
        assert!(!updated.result().is_overall_match());
        assert_eq!(updated.result().reason_code(), "REQUIRED_CRITERIA_FAILED: device");
        // the original is untouched
        assert_eq!(record.result().individual_results().len(), 1);
    }

    #[test]
    fn test_record_append_replaces_same_key() {
        let aggregator = MatchAggregator::default();
        let record = MatchResultRecord::new(aggregate(vec![
            outcome(CriteriaType::Geo, true, false),
            outcome(CriteriaType::Device, false, true),
        ]));
        assert!(!record.result().is_overall_match());

        let fixed = record.append_outcome(outcome(CriteriaType::Device, true, true), &aggregator);

        assert_eq!(fixed.result().individual_results().len(), 2);
        assert!(fixed.result().is_overall_match());
        assert_eq!(fixed.result().reason_code(), reason::MATCH_SUCCESS);
    }

    #[test]
    fn test_record_serde_round_trip() {
        let record = MatchResultRecord::new(aggregate(vec![outcome(CriteriaType::Geo, true, false)]));
        let json = serde_json::to_string(&record).unwrap();
        let back: MatchResultRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(back, record);
    }

    #[test]
    fn test_deserialization_restores_canonical_order() {
        let result = aggregate(vec![
            outcome(CriteriaType::Keyword, true, false),
            outcome(CriteriaType::Geo, true, false),
        ]);
        let mut json = serde_json::to_value(&result).unwrap();
        json["individual_results"]
            .as_array_mut()
            .unwrap()
            .reverse();

        let back: OverallMatchResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.individual_results()[0].criteria_type(), CriteriaType::Geo);
        assert_eq!(back, result);
        assert_eq!(back.calculated_at(), result.calculated_at());
    }

    #[test]
    fn test_deserialization_rejects_broken_results() {
        let result = aggregate(vec![
            outcome(CriteriaType::Geo, true, false),
            outcome(CriteriaType::Device, false, false),
        ]);
        let valid = serde_json::to_value(&result).unwrap();

        let mut out_of_range = valid.clone();
        out_of_range["overall_score"] = serde_json::json!(1.7);
        assert!(serde_json::from_value::<OverallMatchResult>(out_of_range).is_err());

        let mut bad_weighted = valid.clone();
        bad_weighted["weighted_scores"]["geo"] = serde_json::json!(-0.2);
        assert!(serde_json::from_value::<OverallMatchResult>(bad_weighted).is_err());

        let mut duplicated = valid.clone();
        let first = duplicated["individual_results"][0].clone();
        duplicated["individual_results"]
            .as_array_mut()
            .unwrap()
            .push(first);
        assert!(serde_json::from_value::<OverallMatchResult>(duplicated).is_err());

        let vetoed = aggregate(vec![
            outcome(CriteriaType::Geo, true, false),
            outcome(CriteriaType::Device, false, true),
        ]);
        let mut forged = serde_json::to_value(&vetoed).unwrap();
        forged["is_overall_match"] = serde_json::json!(true);
        assert!(serde_json::from_value::<OverallMatchResult>(forged).is_err());
    }
}
