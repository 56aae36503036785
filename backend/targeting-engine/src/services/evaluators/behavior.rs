use super::{matched, missing_context, not_matched};
use crate::error::Result;
use crate::models::{BehaviorTargeting, CriteriaType, CriterionOutcome, ObservedContext, PropertyCell};
use crate::utils::normalize_token;
use std::collections::BTreeSet;

pub const INTEREST_OVERLAP: &str = "INTEREST_OVERLAP";
pub const INSUFFICIENT_OVERLAP: &str = "INSUFFICIENT_OVERLAP";
pub const EXCLUDED_SEGMENT: &str = "EXCLUDED_SEGMENT";

const TYPE: CriteriaType = CriteriaType::Behavior;

/// Overlap between targeted interests and the user's observed interests and
/// segments. Any excluded segment vetoes the criterion.
pub(super) fn evaluate(spec: &BehaviorTargeting, context: &ObservedContext) -> Result<CriterionOutcome> {
    let settings = &spec.settings;
    let observed = match context.behavior.as_ref() {
        Some(b) if !b.is_empty() => b,
        _ => return missing_context(settings, TYPE, "behavior"),
    };

    let observed_segments: BTreeSet<String> = observed.segments.iter().map(|s| normalize_token(s)).collect();
    if let Some(segment) = spec
        .excluded_segments
        .iter()
        .map(|s| normalize_token(s))
        .find(|s| observed_segments.contains(s))
    {
        return not_matched(settings, TYPE, EXCLUDED_SEGMENT)
            .detail(PropertyCell::string("excluded_segment", segment)?)
            .build();
    }

    let profile: BTreeSet<String> = observed
        .interests
        .iter()
        .map(|i| normalize_token(i))
        .chain(observed_segments)
        .collect();
    let targeted: BTreeSet<String> = spec.interests.iter().map(|i| normalize_token(i)).collect();

    let overlap = targeted.intersection(&profile).count();
    let union = targeted.union(&profile).count();
    let jaccard = if union == 0 {
        0.0
    } else {
        overlap as f64 / union as f64
    };

    let builder = if overlap >= spec.min_overlap {
        matched(settings, TYPE, INTEREST_OVERLAP)
    } else {
        not_matched(settings, TYPE, INSUFFICIENT_OVERLAP)
    };

    builder
        .detail(PropertyCell::integer("overlap", overlap as i64)?)
        .detail(PropertyCell::float("jaccard", jaccard)?)
        .build()
}
