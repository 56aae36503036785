//! Evaluation Orchestrator
//!
//! Fans one candidate's evaluators out onto the blocking pool, each under its
//! own time budget, waits for all of them and hands the outcomes to the
//! aggregator. A failing, panicking or slow evaluator never fails the
//! evaluation: it is replaced by a non-matching outcome that keeps the
//! evaluator's weight and required flag.
//!
//! A timed-out evaluator keeps running on its blocking thread until it
//! returns; its result is discarded.

use crate::config::EngineConfig;
use crate::error::{Result, TargetingError};
use crate::metrics::TargetingMetrics;
use crate::models::{
    reason, CandidateId, ContextId, CriterionOutcome, ObservedContext, OverallMatchResult,
    PropertyCell, TargetingConfig,
};
use crate::services::aggregation::MatchAggregator;
use crate::services::evaluators::CriterionEvaluator;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct EvaluationOrchestrator {
    aggregator: MatchAggregator,
    evaluator_timeout: Duration,
    max_batch_size: usize,
}

impl Default for EvaluationOrchestrator {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self {
            aggregator: MatchAggregator::default(),
            evaluator_timeout: config.evaluator_timeout(),
            max_batch_size: config.max_batch_size,
        }
    }
}

/// Why an evaluator produced no outcome of its own
enum Failure {
    Error(String),
    Panic(String),
    Timeout(Duration),
}

impl Failure {
    fn kind(&self) -> &'static str {
        match self {
            Failure::Error(_) => "error",
            Failure::Panic(_) => "panic",
            Failure::Timeout(_) => "timeout",
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Failure::Timeout(_) => reason::TIMEOUT,
            _ => reason::EVALUATOR_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Failure::Error(msg) => msg.clone(),
            Failure::Panic(msg) => format!("evaluator panicked: {}", msg),
            Failure::Timeout(budget) => format!("no outcome within {}ms", budget.as_millis()),
        }
    }
}

impl EvaluationOrchestrator {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            aggregator: MatchAggregator::from_config(config)?,
            evaluator_timeout: config.evaluator_timeout(),
            max_batch_size: config.max_batch_size,
        })
    }

    pub fn with_aggregator(mut self, aggregator: MatchAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_evaluator_timeout(mut self, evaluator_timeout: Duration) -> Self {
        self.evaluator_timeout = evaluator_timeout;
        self
    }

    pub fn aggregator(&self) -> &MatchAggregator {
        &self.aggregator
    }

    pub fn evaluator_timeout(&self) -> Duration {
        self.evaluator_timeout
    }

    /// Run every evaluator concurrently and aggregate their outcomes
    pub async fn evaluate(
        &self,
        candidate_id: CandidateId,
        context_id: ContextId,
        evaluators: &[Arc<dyn CriterionEvaluator>],
        context: Arc<ObservedContext>,
    ) -> OverallMatchResult {
        self.run(candidate_id, context_id, evaluators, context, None)
            .await
    }

    /// Like [`evaluate`](Self::evaluate), but no evaluator may run past
    /// `deadline` from now, even if its own budget is longer
    pub async fn evaluate_with_deadline(
        &self,
        candidate_id: CandidateId,
        context_id: ContextId,
        evaluators: &[Arc<dyn CriterionEvaluator>],
        context: Arc<ObservedContext>,
        deadline: Duration,
    ) -> OverallMatchResult {
        self.run(candidate_id, context_id, evaluators, context, Some(deadline))
            .await
    }

    /// Validate `config`, build its evaluators and evaluate them.
    /// An invalid config is the only error.
    pub async fn evaluate_config(
        &self,
        candidate_id: CandidateId,
        context_id: ContextId,
        config: &TargetingConfig,
        context: Arc<ObservedContext>,
    ) -> Result<OverallMatchResult> {
        config.validate()?;

        let evaluators: Vec<Arc<dyn CriterionEvaluator>> = config
            .evaluators()
            .into_iter()
            .map(|e| Arc::new(e) as Arc<dyn CriterionEvaluator>)
            .collect();

        Ok(self
            .evaluate(candidate_id, context_id, &evaluators, context)
            .await)
    }

    /// Evaluate many candidates against one request context.
    ///
    /// Results come back in input order, one `Result` per candidate.
    pub async fn evaluate_batch(
        &self,
        context_id: ContextId,
        candidates: &[(CandidateId, TargetingConfig)],
        context: Arc<ObservedContext>,
    ) -> Result<Vec<Result<OverallMatchResult>>> {
        if candidates.len() > self.max_batch_size {
            return Err(TargetingError::BatchTooLarge {
                size: candidates.len(),
                max: self.max_batch_size,
            });
        }

        let evaluations = candidates.iter().map(|(candidate_id, config)| {
            self.evaluate_config(
                candidate_id.clone(),
                context_id.clone(),
                config,
                Arc::clone(&context),
            )
        });
        let results = join_all(evaluations).await;

        let matched = results
            .iter()
            .filter(|r| matches!(r, Ok(result) if result.is_overall_match()))
            .count();
        info!(
            context_id = %context_id,
            candidates = candidates.len(),
            matched = matched,
            "Batch evaluation complete"
        );

        Ok(results)
    }

    async fn run(
        &self,
        candidate_id: CandidateId,
        context_id: ContextId,
        evaluators: &[Arc<dyn CriterionEvaluator>],
        context: Arc<ObservedContext>,
        deadline: Option<Duration>,
    ) -> OverallMatchResult {
        let started = Instant::now();
        let budget = match deadline {
            Some(deadline) => self.evaluator_timeout.min(deadline),
            None => self.evaluator_timeout,
        };
        let expires_at = started + budget;

        let tasks = evaluators.iter().map(|evaluator| {
            run_evaluator(
                Arc::clone(evaluator),
                Arc::clone(&context),
                expires_at,
                budget,
                &candidate_id,
            )
        });
        let outcomes = join_all(tasks).await;

        let result = self.aggregator.aggregate(candidate_id, context_id, outcomes);

        info!(
            candidate_id = %result.ad_candidate_id(),
            context_id = %result.ad_context_id(),
            overall_score = result.overall_score(),
            is_match = result.is_overall_match(),
            reason_code = result.reason_code(),
            criteria = result.individual_results().len(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Targeting evaluation complete"
        );

        result
    }
}

async fn run_evaluator(
    evaluator: Arc<dyn CriterionEvaluator>,
    context: Arc<ObservedContext>,
    expires_at: Instant,
    budget: Duration,
    candidate_id: &CandidateId,
) -> CriterionOutcome {
    let started = Instant::now();
    let task = {
        let evaluator = Arc::clone(&evaluator);
        tokio::task::spawn_blocking(move || evaluator.evaluate(&context))
    };

    let failure = match timeout_at(expires_at, task).await {
        Ok(Ok(Ok(outcome))) => {
            if outcome.execution_time().is_zero() {
                return outcome.with_execution_time(started.elapsed());
            }
            return outcome;
        }
        Ok(Ok(Err(e))) => Failure::Error(e.to_string()),
        Ok(Err(join_error)) => Failure::Panic(join_error.to_string()),
        Err(_) => Failure::Timeout(budget),
    };

    warn!(
        candidate_id = %candidate_id,
        criteria_type = %evaluator.criteria_type(),
        criteria_id = %evaluator.criteria_id(),
        kind = failure.kind(),
        error = %failure.message(),
        "Evaluator failed, substituting non-match"
    );
    TargetingMetrics::record_evaluator_failure(
        evaluator.criteria_type().as_str(),
        failure.kind(),
    );

    substitute(evaluator.as_ref(), &failure, started.elapsed())
}

/// Non-matching outcome standing in for a failed evaluator
fn substitute(
    evaluator: &dyn CriterionEvaluator,
    failure: &Failure,
    elapsed: Duration,
) -> CriterionOutcome {
    let criteria_type = evaluator.criteria_type();
    let settings = evaluator.settings();
    let error = PropertyCell::string("error", failure.message()).ok();

    let mut builder =
        CriterionOutcome::not_matched(criteria_type, evaluator.criteria_id(), failure.reason())
            .weight(settings.weight)
            .required(settings.required)
            .priority(settings.priority)
            .execution_time(elapsed);
    if let Some(cell) = error.clone() {
        builder = builder.detail(cell);
    }

    builder.build().unwrap_or_else(|e| {
        warn!(
            criteria_type = %criteria_type,
            error = %e,
            "Evaluator settings rejected, using fallback outcome"
        );
        let outcome =
            CriterionOutcome::fallback(criteria_type, settings.required, failure.reason())
                .with_execution_time(elapsed);
        match error {
            Some(cell) => outcome.with_detail(cell),
            None => outcome,
        }
    })
}
