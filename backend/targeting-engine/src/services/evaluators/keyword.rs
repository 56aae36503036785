use super::{matched, missing_context, not_matched};
use crate::error::Result;
use crate::models::{CriteriaType, CriterionOutcome, KeywordTargeting, ObservedContext, PropertyCell};
use crate::utils::normalize_token;
use std::collections::BTreeSet;

pub const KEYWORD_MATCH: &str = "KEYWORD_MATCH";
pub const NO_KEYWORD_MATCH: &str = "NO_KEYWORD_MATCH";
pub const NEGATIVE_KEYWORD: &str = "NEGATIVE_KEYWORD";

const TYPE: CriteriaType = CriteriaType::Keyword;

pub(super) fn evaluate(spec: &KeywordTargeting, context: &ObservedContext) -> Result<CriterionOutcome> {
    let settings = &spec.settings;

    let phrases = observed_phrases(&context.keywords);
    let interests: BTreeSet<String> = context
        .behavior
        .iter()
        .flat_map(|b| b.interests.iter())
        .map(|i| normalize_token(i))
        .collect();

    if let Some(negative) = first_phrase_hit(&spec.negative_keywords, &phrases) {
        return not_matched(settings, TYPE, NEGATIVE_KEYWORD)
            .detail(PropertyCell::string("negative_keyword", negative)?)
            .build();
    }

    // Only the attributes the rule set targets count as evaluable context
    let keywords_evaluable = !spec.keywords.is_empty() && !phrases.is_empty();
    let interests_evaluable = !spec.interests.is_empty() && !interests.is_empty();
    if !keywords_evaluable && !interests_evaluable {
        let attribute = if spec.keywords.is_empty() { "interests" } else { "keywords" };
        return missing_context(settings, TYPE, attribute);
    }

    let hit = first_phrase_hit(&spec.keywords, &phrases)
        .map(|k| ("matched_keyword", k))
        .or_else(|| {
            spec.interests
                .iter()
                .map(|i| normalize_token(i))
                .find(|i| interests.contains(i))
                .map(|i| ("matched_interest", i))
        });

    match hit {
        Some((key, value)) => matched(settings, TYPE, KEYWORD_MATCH)
            .detail(PropertyCell::string(key, value)?)
            .build(),
        None => not_matched(settings, TYPE, NO_KEYWORD_MATCH).build(),
    }
}

/// Observed keywords as normalized word sequences
fn observed_phrases(keywords: &[String]) -> Vec<Vec<String>> {
    keywords
        .iter()
        .map(|k| {
            normalize_token(k)
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|words| !words.is_empty())
        .collect()
}

/// First target whose words appear contiguously in some observed phrase
fn first_phrase_hit(targets: &[String], phrases: &[Vec<String>]) -> Option<String> {
    targets.iter().find_map(|target| {
        let words: Vec<String> = normalize_token(target)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if words.is_empty() {
            return None;
        }
        phrases
            .iter()
            .any(|phrase| phrase.windows(words.len()).any(|w| w == words.as_slice()))
            .then(|| words.join(" "))
    })
}
