pub mod aggregation;
pub mod confidence;
pub mod evaluators;
pub mod orchestrator;

pub use aggregation::{MatchAggregator, MatchPolicy};
pub use confidence::{ConfidenceLevel, MatchConfidence};
pub use evaluators::{CriterionEvaluator, Evaluator};
pub use orchestrator::EvaluationOrchestrator;
