// Geo evaluator: include/exclude regions and circular fences.
// Binary score, so a result is always explainable by the rule that fired.

use super::{matched, missing_context, not_matched};
use crate::error::Result;
use crate::models::{
    CriteriaType, CriterionOutcome, GeoFence, GeoRegion, GeoTargeting, ObservedContext,
    ObservedGeo, PropertyCell,
};

pub const IN_TARGET_AREA: &str = "IN_TARGET_AREA";
pub const OUTSIDE_TARGET_AREA: &str = "OUTSIDE_TARGET_AREA";
pub const EXCLUDED_AREA: &str = "EXCLUDED_AREA";

const TYPE: CriteriaType = CriteriaType::Geo;

pub(super) fn evaluate(spec: &GeoTargeting, context: &ObservedContext) -> Result<CriterionOutcome> {
    let settings = &spec.settings;

    let observed = match context.geo.as_ref() {
        Some(geo) if is_evaluable(spec, geo) => geo,
        _ => return missing_context(settings, TYPE, "geo"),
    };
    let coordinates = observed.coordinates();

    // An exclusion that cannot be checked must not let the location through
    if !spec.exclude_regions.is_empty() && observed.country.is_none() {
        return missing_context(settings, TYPE, "country");
    }
    if !spec.exclude_fences.is_empty() && coordinates.is_none() {
        return missing_context(settings, TYPE, "coordinates");
    }

    if let Some(region) = spec.exclude_regions.iter().find(|r| r.matches(observed)) {
        return not_matched(settings, TYPE, EXCLUDED_AREA)
            .detail(PropertyCell::string("excluded_by", describe_region(region))?)
            .build();
    }
    if let Some((fence, distance)) = coordinates.and_then(|(lat, lon)| find_fence(&spec.exclude_fences, lat, lon)) {
        return not_matched(settings, TYPE, EXCLUDED_AREA)
            .detail(PropertyCell::string("excluded_by", describe_fence(fence))?)
            .detail(PropertyCell::float("distance_km", distance)?)
            .build();
    }

    if !spec.has_includes() {
        return matched(settings, TYPE, IN_TARGET_AREA).build();
    }

    if let Some(region) = spec.include_regions.iter().find(|r| r.matches(observed)) {
        return matched(settings, TYPE, IN_TARGET_AREA)
            .detail(PropertyCell::string("matched_by", describe_region(region))?)
            .build();
    }
    if let Some((fence, distance)) = coordinates.and_then(|(lat, lon)| find_fence(&spec.include_fences, lat, lon)) {
        return matched(settings, TYPE, IN_TARGET_AREA)
            .detail(PropertyCell::string("matched_by", describe_fence(fence))?)
            .detail(PropertyCell::float("distance_km", distance)?)
            .build();
    }

    let mut outcome = not_matched(settings, TYPE, OUTSIDE_TARGET_AREA);
    if let Some(country) = observed.country.as_deref() {
        outcome = outcome.detail(PropertyCell::string("observed_country", country)?);
    }
    if let Some(nearest) = coordinates.and_then(|(lat, lon)| nearest_fence_distance(&spec.include_fences, lat, lon)) {
        outcome = outcome.detail(PropertyCell::float("nearest_fence_km", nearest)?);
    }
    outcome.build()
}

/// The observed location carries at least the kind of data the rules need
fn is_evaluable(spec: &GeoTargeting, observed: &ObservedGeo) -> bool {
    let uses_regions = !spec.include_regions.is_empty() || !spec.exclude_regions.is_empty();
    let uses_fences = !spec.include_fences.is_empty() || !spec.exclude_fences.is_empty();

    (uses_regions && observed.country.is_some()) || (uses_fences && observed.coordinates().is_some())
}

fn find_fence(fences: &[GeoFence], lat: f64, lon: f64) -> Option<(&GeoFence, f64)> {
    fences
        .iter()
        .map(|f| (f, f.distance_km(lat, lon)))
        .find(|(f, distance)| *distance <= f.radius_km)
}

fn nearest_fence_distance(fences: &[GeoFence], lat: f64, lon: f64) -> Option<f64> {
    fences
        .iter()
        .map(|f| f.distance_km(lat, lon))
        .min_by(|a, b| a.total_cmp(b))
}

fn describe_region(region: &GeoRegion) -> String {
    let mut parts = vec![region.country.as_str()];
    if let Some(r) = region.region.as_deref() {
        parts.push(r);
    }
    if let Some(c) = region.city.as_deref() {
        parts.push(c);
    }
    parts.join("/")
}

fn describe_fence(fence: &GeoFence) -> String {
    format!(
        "fence({:.4},{:.4},r={}km)",
        fence.latitude, fence.longitude, fence.radius_km
    )
}
