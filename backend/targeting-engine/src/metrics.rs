/// Prometheus metrics for targeting evaluation
#[cfg(feature = "metrics")]
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;

#[cfg(feature = "metrics")]
static EVALUATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "targeting_evaluations_total",
        "Total number of aggregated candidate evaluations",
        &["decision"]
    )
    .expect("Failed to register targeting evaluations metric")
});

#[cfg(feature = "metrics")]
static EVALUATOR_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "targeting_evaluator_failures_total",
        "Evaluator invocations replaced by a substitute outcome",
        &["criteria_type", "kind"]
    )
    .expect("Failed to register evaluator failures metric")
});

#[cfg(feature = "metrics")]
static SLOW_CRITERIA: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "targeting_slow_criteria_total",
        "Criteria whose execution time exceeded the slow threshold",
        &["criteria_type"]
    )
    .expect("Failed to register slow criteria metric")
});

#[cfg(feature = "metrics")]
static CRITERION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "targeting_criterion_duration_seconds",
        "Execution time of individual criterion evaluators",
        &["criteria_type"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1]
    )
    .expect("Failed to register criterion duration metric")
});

/// Metrics collector for the evaluation pipeline
pub struct TargetingMetrics;

#[cfg(feature = "metrics")]
impl TargetingMetrics {
    pub fn record_evaluation(decision: &str) {
        EVALUATIONS.with_label_values(&[decision]).inc();
    }

    pub fn record_evaluator_failure(criteria_type: &str, kind: &str) {
        EVALUATOR_FAILURES
            .with_label_values(&[criteria_type, kind])
            .inc();
    }

    pub fn record_slow_criterion(criteria_type: &str) {
        SLOW_CRITERIA.with_label_values(&[criteria_type]).inc();
    }

    pub fn record_criterion_duration(criteria_type: &str, duration_secs: f64) {
        CRITERION_DURATION
            .with_label_values(&[criteria_type])
            .observe(duration_secs);
    }
}

// No-op implementation when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
impl TargetingMetrics {
    pub fn record_evaluation(_decision: &str) {}
    pub fn record_evaluator_failure(_criteria_type: &str, _kind: &str) {}
    pub fn record_slow_criterion(_criteria_type: &str) {}
    pub fn record_criterion_duration(_criteria_type: &str, _duration_secs: f64) {}
}
