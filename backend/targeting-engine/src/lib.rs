//! Targeting match evaluation for ad candidates.
//!
//! Given one candidate's [`TargetingConfig`] and one request's
//! [`ObservedContext`], the engine evaluates each targeting dimension,
//! aggregates the weighted outcomes with a required-criteria veto and
//! attaches confidence statistics to the decision.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use config::EngineConfig;
pub use error::{Result, TargetingError};
pub use models::{
    reason, CandidateId, ContextId, CriteriaType, CriterionOutcome, MatchResultRecord,
    ObservedContext, OverallMatchResult, PropertyCell, PropertyType, TargetingConfig,
};
pub use services::{
    ConfidenceLevel, CriterionEvaluator, EvaluationOrchestrator, Evaluator, MatchAggregator,
    MatchConfidence, MatchPolicy,
};
