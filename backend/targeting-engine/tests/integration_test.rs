use chrono::{TimeZone, Utc, Weekday};
use std::sync::Arc;
use targeting_engine::models::{
    BehaviorTargeting, DemographicTargeting, DeviceTargeting, DeviceType, DimensionSettings,
    Gender, GeoFence, GeoRegion, GeoTargeting, KeywordTargeting, ObservedBehavior,
    ObservedDemographic, ObservedDevice, ObservedGeo, TimeTargeting, TimeWindow,
};
use targeting_engine::services::confidence::{confidence_interval, is_reliable};
use targeting_engine::{
    reason, CandidateId, ConfidenceLevel, ContextId, CriteriaType, CriterionOutcome,
    EngineConfig, EvaluationOrchestrator, MatchAggregator, MatchConfidence, MatchPolicy,
    ObservedContext, OverallMatchResult, TargetingConfig,
};

const EPS: f64 = 1e-9;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn ids() -> (CandidateId, ContextId) {
    (
        CandidateId::new("ad-123").unwrap(),
        ContextId::new("req-456").unwrap(),
    )
}

fn outcome(
    criteria_type: CriteriaType,
    is_match: bool,
    score: f64,
    weight: f64,
    required: bool,
) -> CriterionOutcome {
    let builder = if is_match {
        CriterionOutcome::matched(criteria_type, criteria_type.as_str(), score, "OK")
    } else {
        CriterionOutcome::not_matched(criteria_type, criteria_type.as_str(), "NO").score(score)
    };
    builder.weight(weight).required(required).build().unwrap()
}

fn aggregate(aggregator: &MatchAggregator, outcomes: Vec<CriterionOutcome>) -> OverallMatchResult {
    let (candidate, context) = ids();
    aggregator.aggregate(candidate, context, outcomes)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_scenario_a_optional_failure_still_matches() {
    let aggregator = MatchAggregator::new(0.5).unwrap();
    let result = aggregate(
        &aggregator,
        vec![
            outcome(CriteriaType::Geo, true, 1.0, 2.0, true),
            outcome(CriteriaType::Device, false, 0.0, 1.0, false),
        ],
    );

    assert!((result.overall_score() - 2.0 / 3.0).abs() < EPS);
    assert!(result.is_overall_match());
    assert_eq!(result.reason_code(), "MATCH_SUCCESS");
}

#[test]
fn test_scenario_b_required_failure_vetoes() {
    let aggregator = MatchAggregator::new(0.5).unwrap();
    let result = aggregate(
        &aggregator,
        vec![
            outcome(CriteriaType::Geo, true, 1.0, 2.0, true),
            outcome(CriteriaType::Device, false, 0.0, 1.0, true),
        ],
    );

    assert!((result.overall_score() - 2.0 / 3.0).abs() < EPS);
    assert!(!result.is_overall_match());
    assert_eq!(result.reason_code(), "REQUIRED_CRITERIA_FAILED: device");
}

#[test]
fn test_scenario_c_no_criteria() {
    let result = aggregate(&MatchAggregator::default(), Vec::new());

    assert_eq!(result.overall_score(), 0.0);
    assert!(!result.is_overall_match());
    assert_eq!(result.reason_code(), reason::NO_CRITERIA);
}

#[test]
fn test_scenario_d_confidence() {
    let confidence = MatchConfidence::from_scores(&[0.9, 0.85, 0.88]).unwrap();

    assert!((confidence.mean() - 0.877).abs() < 1e-3);
    assert_eq!(confidence.level(), ConfidenceLevel::VeryHigh);
    assert!(!confidence.is_reliable());
}

// ---------------------------------------------------------------------------
// Aggregation properties
// ---------------------------------------------------------------------------

fn mixed_outcomes() -> Vec<CriterionOutcome> {
    vec![
        outcome(CriteriaType::Geo, true, 1.0, 3.0, false),
        outcome(CriteriaType::Demographic, true, 0.6, 1.5, false),
        outcome(CriteriaType::Device, false, 0.4, 2.0, false),
        outcome(CriteriaType::Time, true, 0.9, 0.5, false),
        outcome(CriteriaType::Keyword, true, 0.3, 1.0, false),
    ]
}

#[test]
fn test_score_bounded_and_weighted_scores_sum_to_overall() {
    let result = aggregate(&MatchAggregator::default(), mixed_outcomes());

    assert!((0.0..=1.0).contains(&result.overall_score()));
    let sum: f64 = result.weighted_scores().values().sum();
    assert!((sum - result.overall_score()).abs() < EPS);
}

#[test]
fn test_weight_normalization_is_scale_invariant() {
    let scaled: Vec<CriterionOutcome> = mixed_outcomes()
        .into_iter()
        .map(|o| {
            let builder = if o.is_match() {
                CriterionOutcome::matched(o.criteria_type(), o.criteria_id(), o.match_score(), "OK")
            } else {
                CriterionOutcome::not_matched(o.criteria_type(), o.criteria_id(), "NO")
                    .score(o.match_score())
            };
            builder.weight(o.weight() * 10.0).build().unwrap()
        })
        .collect();

    let base = aggregate(&MatchAggregator::default(), mixed_outcomes());
    let scaled = aggregate(&MatchAggregator::default(), scaled);

    assert!((base.overall_score() - scaled.overall_score()).abs() < EPS);
}

#[test]
fn test_non_match_score_never_contributes() {
    let result = aggregate(&MatchAggregator::default(), mixed_outcomes());
    assert_eq!(result.weighted_scores()[&CriteriaType::Device], 0.0);
}

#[test]
fn test_required_veto_regardless_of_score() {
    let mut outcomes = mixed_outcomes();
    outcomes.push(outcome(CriteriaType::Behavior, false, 0.0, 0.01, true));

    let aggregator = MatchAggregator::new(0.0).unwrap();
    let result = aggregate(&aggregator, outcomes);

    assert!(result.overall_score() > 0.5);
    assert!(!result.is_overall_match());
    assert_eq!(result.failed_required_criteria(), vec![CriteriaType::Behavior]);
}

#[test]
fn test_order_independence() {
    let aggregator = MatchAggregator::default();
    let forward = aggregate(&aggregator, mixed_outcomes());

    let mut reversed = mixed_outcomes();
    reversed.reverse();
    let backward = aggregate(&aggregator, reversed);

    let mut rotated = mixed_outcomes();
    rotated.rotate_left(2);
    let rotated = aggregate(&aggregator, rotated);

    assert_eq!(forward.overall_score().to_bits(), backward.overall_score().to_bits());
    assert_eq!(forward.overall_score().to_bits(), rotated.overall_score().to_bits());
    assert_eq!(forward.weighted_scores(), backward.weighted_scores());
    assert_eq!(forward, backward);
    assert_eq!(forward, rotated);
}

#[test]
fn test_all_criteria_policy_vetoes_optional_failures() {
    let aggregator = MatchAggregator::new(0.0)
        .unwrap()
        .with_policy(MatchPolicy::AllCriteria);
    let result = aggregate(&aggregator, mixed_outcomes());

    assert!(!result.is_overall_match());
    assert_eq!(result.reason_code(), "CRITERIA_FAILED: device");
}

#[test]
fn test_confidence_interval_monotonic_in_sample_size() {
    let sd = 0.2;
    let mut previous = f64::INFINITY;
    let mut was_reliable = false;

    for n in 2..=50 {
        let ci = confidence_interval(sd, n);
        assert!(ci <= previous, "CI grew at n={}", n);
        previous = ci;

        let reliable = is_reliable(0.7, n);
        assert!(!(was_reliable && !reliable), "reliability lost at n={}", n);
        was_reliable = reliable;
    }
    assert!(was_reliable);
}

#[test]
fn test_incremental_confidence_matches_batch() {
    let first = [0.9, 0.7, 0.8];
    let second = [0.6, 0.95, 0.75, 0.85];
    let all: Vec<f64> = first.iter().chain(second.iter()).copied().collect();

    let incremental = MatchConfidence::from_scores(&first)
        .unwrap()
        .update_statistics(&second)
        .unwrap();
    let batch = MatchConfidence::from_scores(&all).unwrap();

    assert_eq!(incremental.sample_size(), 7);
    assert!((incremental.mean() - batch.mean()).abs() < EPS);
    assert!((incremental.variance() - batch.variance()).abs() < EPS);
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

fn campaign() -> TargetingConfig {
    TargetingConfig::new()
        .with_geo(GeoTargeting {
            settings: DimensionSettings::default().required().with_weight(3.0),
            include_regions: vec![GeoRegion::country("DE"), GeoRegion::country("AT")],
            exclude_fences: vec![GeoFence::new(48.1372, 11.5756, 15.0)],
            ..Default::default()
        })
        .with_demographic(DemographicTargeting {
            min_age: Some(25),
            max_age: Some(44),
            genders: vec![Gender::Female, Gender::Other],
            ..Default::default()
        })
        .with_device(DeviceTargeting {
            device_types: vec![DeviceType::Mobile],
            ..Default::default()
        })
        .with_time(TimeTargeting {
            days: vec![Weekday::Sat, Weekday::Sun],
            windows: vec![TimeWindow::hours(8, 23).unwrap()],
            utc_offset_minutes: 120,
            ..Default::default()
        })
        .with_behavior(BehaviorTargeting {
            interests: vec!["running".into(), "hiking".into()],
            ..Default::default()
        })
        .with_keyword(KeywordTargeting {
            keywords: vec!["trail shoes".into()],
            negative_keywords: vec!["kids".into()],
            ..Default::default()
        })
}

fn berlin_saturday_request() -> ObservedContext {
    ObservedContext::new()
        .with_geo(ObservedGeo {
            country: Some("DE".into()),
            city: Some("Berlin".into()),
            latitude: Some(52.52),
            longitude: Some(13.405),
            ..Default::default()
        })
        .with_demographic(ObservedDemographic {
            age: Some(31),
            gender: Some(Gender::Female),
            language: Some("de".into()),
        })
        .with_device(ObservedDevice {
            device_type: Some(DeviceType::Mobile),
            os: Some("Android".into()),
            browser: None,
        })
        // Saturday 12:00 local (UTC+2)
        .with_timestamp(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap())
        .with_behavior(ObservedBehavior {
            interests: vec!["Hiking".into()],
            segments: vec![],
        })
        .with_keywords(["best trail shoes 2024"])
}

#[tokio::test]
async fn test_end_to_end_full_match() {
    init_tracing();
    let orchestrator = EvaluationOrchestrator::new(&EngineConfig::default()).unwrap();
    let (candidate, context_id) = ids();

    let result = orchestrator
        .evaluate_config(candidate, context_id, &campaign(), Arc::new(berlin_saturday_request()))
        .await
        .unwrap();

    assert!(result.is_overall_match(), "reason: {}", result.reason_code());
    assert_eq!(result.reason_code(), reason::MATCH_SUCCESS);
    assert!((result.overall_score() - 1.0).abs() < EPS);
    assert_eq!(result.individual_results().len(), 6);
    let confidence = result.confidence().unwrap();
    assert_eq!(confidence.sample_size(), 6);
    assert_eq!(confidence.level(), ConfidenceLevel::VeryHigh);
}

#[tokio::test]
async fn test_end_to_end_excluded_area_vetoes() {
    init_tracing();
    let orchestrator = EvaluationOrchestrator::default();
    let (candidate, context_id) = ids();

    let mut request = berlin_saturday_request();
    request.geo = Some(ObservedGeo {
        country: Some("DE".into()),
        city: Some("Munich".into()),
        latitude: Some(48.14),
        longitude: Some(11.58),
        ..Default::default()
    });

    let result = orchestrator
        .evaluate_config(candidate, context_id, &campaign(), Arc::new(request))
        .await
        .unwrap();

    assert!(!result.is_overall_match());
    assert_eq!(result.reason_code(), "REQUIRED_CRITERIA_FAILED: geo");
    // 5 of 8 total weight units still matched
    assert!((result.overall_score() - 5.0 / 8.0).abs() < EPS);
}

#[tokio::test]
async fn test_end_to_end_sparse_context_is_neutral() {
    let orchestrator = EvaluationOrchestrator::default();
    let (candidate, context_id) = ids();

    // Vienna, well clear of the excluded Munich fence
    let request = ObservedContext::new().with_geo(ObservedGeo {
        country: Some("AT".into()),
        latitude: Some(48.2082),
        longitude: Some(16.3738),
        ..Default::default()
    });

    let result = orchestrator
        .evaluate_config(candidate, context_id, &campaign(), Arc::new(request))
        .await
        .unwrap();

    assert!(result.is_overall_match());
    let neutral = result
        .individual_results()
        .iter()
        .filter(|o| o.reason() == reason::NO_CONTEXT_NEUTRAL)
        .count();
    assert_eq!(neutral, 5);
}

#[tokio::test]
async fn test_end_to_end_unverifiable_exclusion_vetoes_required_geo() {
    let orchestrator = EvaluationOrchestrator::default();
    let (candidate, context_id) = ids();

    // Country only: the Munich exclusion fence cannot be checked
    let mut request = berlin_saturday_request();
    request.geo = Some(ObservedGeo {
        country: Some("DE".into()),
        city: Some("Munich".into()),
        ..Default::default()
    });

    let result = orchestrator
        .evaluate_config(candidate, context_id, &campaign(), Arc::new(request))
        .await
        .unwrap();

    assert!(!result.is_overall_match());
    assert_eq!(result.reason_code(), "REQUIRED_CRITERIA_FAILED: geo");
    assert_eq!(
        result.outcome(CriteriaType::Geo).map(|o| o.reason()),
        Some(reason::MISSING_CONTEXT)
    );
}

#[test]
fn test_config_from_env_pairs() {
    let config = EngineConfig::from_pairs(vec![
        ("TARGETING_MATCH_THRESHOLD".to_string(), "0.7".to_string()),
        ("TARGETING_MATCH_POLICY".to_string(), "all_criteria".to_string()),
    ])
    .unwrap();

    let aggregator = MatchAggregator::from_config(&config).unwrap();
    assert!((aggregator.match_threshold() - 0.7).abs() < EPS);
    assert_eq!(aggregator.policy(), MatchPolicy::AllCriteria);
}

#[test]
fn test_result_serializes_with_millisecond_durations() {
    let result = aggregate(
        &MatchAggregator::default(),
        vec![outcome(CriteriaType::Geo, true, 1.0, 1.0, false)
            .with_execution_time(std::time::Duration::from_micros(1500))],
    );

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["individual_results"][0]["execution_time"], 1.5);
    assert_eq!(json["total_execution_time"], 1.5);
    assert_eq!(json["weighted_scores"]["geo"], 1.0);
}
