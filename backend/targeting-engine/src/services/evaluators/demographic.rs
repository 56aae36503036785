use super::{matched, missing_context, not_matched};
use crate::error::Result;
use crate::models::{
    CriteriaType, CriterionOutcome, DemographicTargeting, ObservedContext, PropertyCell,
};
use crate::utils::normalize_token;

pub const DEMOGRAPHIC_MATCH: &str = "DEMOGRAPHIC_MATCH";
pub const AGE_OUT_OF_RANGE: &str = "AGE_OUT_OF_RANGE";
pub const GENDER_MISMATCH: &str = "GENDER_MISMATCH";
pub const LANGUAGE_MISMATCH: &str = "LANGUAGE_MISMATCH";

const TYPE: CriteriaType = CriteriaType::Demographic;

/// Age, gender and language checks. A constraint whose attribute was not
/// observed is skipped for optional dimensions and fails required ones.
pub(super) fn evaluate(
    spec: &DemographicTargeting,
    context: &ObservedContext,
) -> Result<CriterionOutcome> {
    let settings = &spec.settings;
    let Some(observed) = context.demographic.as_ref() else {
        return missing_context(settings, TYPE, "demographic");
    };

    let mut checked = 0_i64;

    if spec.has_age_range() {
        match observed.age {
            Some(age) if !spec.age_in_range(age) => {
                return not_matched(settings, TYPE, AGE_OUT_OF_RANGE)
                    .detail(PropertyCell::integer("observed_age", i64::from(age))?)
                    .build();
            }
            Some(_) => checked += 1,
            None if settings.required => return missing_context(settings, TYPE, "age"),
            None => {}
        }
    }

    if !spec.genders.is_empty() {
        match observed.gender {
            Some(gender) if !spec.genders.contains(&gender) => {
                return not_matched(settings, TYPE, GENDER_MISMATCH)
                    .detail(PropertyCell::string("observed_gender", gender.as_str())?)
                    .build();
            }
            Some(_) => checked += 1,
            None if settings.required => return missing_context(settings, TYPE, "gender"),
            None => {}
        }
    }

    if !spec.languages.is_empty() {
        match observed.language.as_deref().map(normalize_token) {
            Some(language) if !spec.languages.iter().any(|l| normalize_token(l) == language) => {
                return not_matched(settings, TYPE, LANGUAGE_MISMATCH)
                    .detail(PropertyCell::string("observed_language", language)?)
                    .build();
            }
            Some(_) => checked += 1,
            None if settings.required => return missing_context(settings, TYPE, "language"),
            None => {}
        }
    }

    if checked == 0 {
        return missing_context(settings, TYPE, "demographic");
    }

    matched(settings, TYPE, DEMOGRAPHIC_MATCH)
        .detail(PropertyCell::integer("constraints_checked", checked)?)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{reason, DimensionSettings, Gender, ObservedDemographic};

    fn spec() -> DemographicTargeting {
        DemographicTargeting {
            min_age: Some(25),
            max_age: Some(34),
            genders: vec![Gender::Female],
            languages: vec!["EN".into(), "de".into()],
            ..Default::default()
        }
    }

    fn person(age: Option<u8>, gender: Option<Gender>, language: Option<&str>) -> ObservedContext {
        ObservedContext::new().with_demographic(ObservedDemographic {
            age,
            gender,
            language: language.map(String::from),
        })
    }

    #[test]
    fn test_all_constraints_satisfied() {
        let outcome = evaluate(&spec(), &person(Some(30), Some(Gender::Female), Some("en"))).unwrap();

        assert!(outcome.is_match());
        assert_eq!(outcome.reason(), DEMOGRAPHIC_MATCH);
        assert_eq!(
            outcome.detail("constraints_checked").and_then(|d| d.as_i64()),
            Some(3)
        );
    }

    #[test]
    fn test_age_bounds_inclusive() {
        for age in [25, 34] {
            let ctx = person(Some(age), Some(Gender::Female), Some("de"));
            assert!(evaluate(&spec(), &ctx).unwrap().is_match(), "age {}", age);
        }

        let outcome = evaluate(&spec(), &person(Some(35), Some(Gender::Female), Some("de"))).unwrap();
        assert!(!outcome.is_match());
        assert_eq!(outcome.reason(), AGE_OUT_OF_RANGE);
        assert_eq!(outcome.detail("observed_age").and_then(|d| d.as_i64()), Some(35));
    }

    #[test]
    fn test_gender_and_language_mismatch() {
        let outcome = evaluate(&spec(), &person(Some(30), Some(Gender::Male), Some("en"))).unwrap();
        assert_eq!(outcome.reason(), GENDER_MISMATCH);

        let outcome = evaluate(&spec(), &person(Some(30), Some(Gender::Female), Some("fr"))).unwrap();
        assert_eq!(outcome.reason(), LANGUAGE_MISMATCH);
    }

    #[test]
    fn test_unobserved_attribute_skipped_when_optional() {
        let outcome = evaluate(&spec(), &person(None, Some(Gender::Female), None)).unwrap();

        assert!(outcome.is_match());
        assert_eq!(
            outcome.detail("constraints_checked").and_then(|d| d.as_i64()),
            Some(1)
        );
    }

    #[test]
    fn test_unobserved_attribute_fails_required() {
        let mut required = spec();
        required.settings = DimensionSettings::default().required();

        let outcome = evaluate(&required, &person(Some(30), None, Some("en"))).unwrap();
        assert!(!outcome.is_match());
        assert_eq!(outcome.reason(), reason::MISSING_CONTEXT);
        assert_eq!(
            outcome.detail("missing_attribute").and_then(|d| d.as_str()),
            Some("gender")
        );
    }

    #[test]
    fn test_nothing_targeted_observed_is_neutral() {
        let outcome = evaluate(&spec(), &person(None, None, None)).unwrap();

        assert!(outcome.is_match());
        assert_eq!(outcome.reason(), reason::NO_CONTEXT_NEUTRAL);
        assert!(outcome.detail("constraints_checked").is_none());
    }

    #[test]
    fn test_no_demographic_context() {
        let outcome = evaluate(&spec(), &ObservedContext::new()).unwrap();
        assert!(outcome.is_match());
        assert_eq!(outcome.reason(), reason::NO_CONTEXT_NEUTRAL);
    }
}
