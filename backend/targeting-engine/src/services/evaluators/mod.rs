//! Criterion Evaluators
//!
//! One pure evaluator per targeting dimension. Each turns a dimension
//! rule set plus the observed request context into a `CriterionOutcome`.
//!
//! # Contract
//! - Absent context is a neutral match (score 1.0, `NO_CONTEXT_NEUTRAL`)
//!   unless the dimension is required, then a non-match (`MISSING_CONTEXT`)
//! - Scores are binary today; the outcome type accepts anything in [0, 1]
//! - Every outcome carries the evaluator's execution time
//!
//! The built-in set is the closed enum [`Evaluator`]. The orchestrator works
//! against the [`CriterionEvaluator`] trait so callers can plug in
//! evaluators backed by external lookups.

pub mod behavior;
pub mod demographic;
pub mod device;
pub mod geo;
pub mod keyword;
pub mod time;

use crate::error::Result;
use crate::models::{
    reason, BehaviorTargeting, CriteriaType, CriterionOutcome, CriterionOutcomeBuilder,
    DemographicTargeting, DeviceTargeting, DimensionSettings, DimensionSpec, GeoTargeting,
    KeywordTargeting, ObservedContext, PropertyCell, TargetingConfig, TimeTargeting,
};
use std::time::Instant;
use tracing::debug;

/// Evaluates one criterion against a request context
pub trait CriterionEvaluator: Send + Sync {
    fn criteria_type(&self) -> CriteriaType;

    fn settings(&self) -> &DimensionSettings;

    fn evaluate(&self, context: &ObservedContext) -> Result<CriterionOutcome>;

    fn criteria_id(&self) -> String {
        self.settings().criteria_id(self.criteria_type())
    }
}

/// Built-in evaluators, one variant per targeting dimension
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluator {
    Geo(GeoTargeting),
    Demographic(DemographicTargeting),
    Device(DeviceTargeting),
    Time(TimeTargeting),
    Behavior(BehaviorTargeting),
    Keyword(KeywordTargeting),
}

impl CriterionEvaluator for Evaluator {
    fn criteria_type(&self) -> CriteriaType {
        match self {
            Evaluator::Geo(_) => CriteriaType::Geo,
            Evaluator::Demographic(_) => CriteriaType::Demographic,
            Evaluator::Device(_) => CriteriaType::Device,
            Evaluator::Time(_) => CriteriaType::Time,
            Evaluator::Behavior(_) => CriteriaType::Behavior,
            Evaluator::Keyword(_) => CriteriaType::Keyword,
        }
    }

    fn settings(&self) -> &DimensionSettings {
        match self {
            Evaluator::Geo(spec) => spec.settings(),
            Evaluator::Demographic(spec) => spec.settings(),
            Evaluator::Device(spec) => spec.settings(),
            Evaluator::Time(spec) => spec.settings(),
            Evaluator::Behavior(spec) => spec.settings(),
            Evaluator::Keyword(spec) => spec.settings(),
        }
    }

    fn evaluate(&self, context: &ObservedContext) -> Result<CriterionOutcome> {
        let started = Instant::now();

        let outcome = match self {
            Evaluator::Geo(spec) => geo::evaluate(spec, context),
            Evaluator::Demographic(spec) => demographic::evaluate(spec, context),
            Evaluator::Device(spec) => device::evaluate(spec, context),
            Evaluator::Time(spec) => time::evaluate(spec, context),
            Evaluator::Behavior(spec) => behavior::evaluate(spec, context),
            Evaluator::Keyword(spec) => keyword::evaluate(spec, context),
        }?;

        let elapsed = started.elapsed();
        debug!(
            criteria_type = %outcome.criteria_type(),
            is_match = outcome.is_match(),
            reason = outcome.reason(),
            elapsed_us = elapsed.as_micros() as u64,
            "Criterion evaluated"
        );

        Ok(outcome.with_execution_time(elapsed))
    }
}

impl TargetingConfig {
    /// One evaluator per enabled dimension, in canonical order
    pub fn evaluators(&self) -> Vec<Evaluator> {
        let mut evaluators = Vec::new();
        if let Some(spec) = self.geo.as_ref().filter(|s| s.is_enabled()) {
            evaluators.push(Evaluator::Geo(spec.clone()));
        }
        if let Some(spec) = self.demographic.as_ref().filter(|s| s.is_enabled()) {
            evaluators.push(Evaluator::Demographic(spec.clone()));
        }
        if let Some(spec) = self.device.as_ref().filter(|s| s.is_enabled()) {
            evaluators.push(Evaluator::Device(spec.clone()));
        }
        if let Some(spec) = self.time.as_ref().filter(|s| s.is_enabled()) {
            evaluators.push(Evaluator::Time(spec.clone()));
        }
        if let Some(spec) = self.behavior.as_ref().filter(|s| s.is_enabled()) {
            evaluators.push(Evaluator::Behavior(spec.clone()));
        }
        if let Some(spec) = self.keyword.as_ref().filter(|s| s.is_enabled()) {
            evaluators.push(Evaluator::Keyword(spec.clone()));
        }
        evaluators
    }
}

/// Matching outcome carrying the dimension's weight, required flag and priority
pub(crate) fn matched(
    settings: &DimensionSettings,
    criteria_type: CriteriaType,
    reason: &str,
) -> CriterionOutcomeBuilder {
    CriterionOutcome::matched(criteria_type, settings.criteria_id(criteria_type), 1.0, reason)
        .weight(settings.weight)
        .required(settings.required)
        .priority(settings.priority)
}

/// Non-matching outcome carrying the dimension's weight, required flag and priority
pub(crate) fn not_matched(
    settings: &DimensionSettings,
    criteria_type: CriteriaType,
    reason: &str,
) -> CriterionOutcomeBuilder {
    CriterionOutcome::not_matched(criteria_type, settings.criteria_id(criteria_type), reason)
        .weight(settings.weight)
        .required(settings.required)
        .priority(settings.priority)
}

/// Outcome for a dimension whose context attribute was not observed
pub(crate) fn missing_context(
    settings: &DimensionSettings,
    criteria_type: CriteriaType,
    attribute: &str,
) -> Result<CriterionOutcome> {
    let builder = if settings.required {
        not_matched(settings, criteria_type, reason::MISSING_CONTEXT)
    } else {
        matched(settings, criteria_type, reason::NO_CONTEXT_NEUTRAL)
    };

    builder
        .detail(PropertyCell::string("missing_attribute", attribute)?)
        .build()
}
