// Day-parting. The request timestamp is shifted into the campaign's fixed
// offset first; both day and window checks run on local time.

use super::{matched, missing_context, not_matched};
use crate::error::{Result, TargetingError};
use crate::models::{CriteriaType, CriterionOutcome, ObservedContext, PropertyCell, TimeTargeting};
use chrono::Datelike;

pub const IN_SCHEDULE: &str = "IN_SCHEDULE";
pub const OUTSIDE_DAYS: &str = "OUTSIDE_DAYS";
pub const OUTSIDE_HOURS: &str = "OUTSIDE_HOURS";

const TYPE: CriteriaType = CriteriaType::Time;

pub(super) fn evaluate(spec: &TimeTargeting, context: &ObservedContext) -> Result<CriterionOutcome> {
    let settings = &spec.settings;
    let Some(timestamp) = context.timestamp else {
        return missing_context(settings, TYPE, "timestamp");
    };
    let offset = spec.offset().ok_or_else(|| {
        TargetingError::Evaluation(format!(
            "time: utc offset {} minutes is out of range",
            spec.utc_offset_minutes
        ))
    })?;

    let local = timestamp.with_timezone(&offset);
    let weekday = local.weekday();
    let time = local.time();

    let local_time = PropertyCell::string("local_time", time.format("%H:%M:%S").to_string())?;
    let local_weekday = PropertyCell::string("local_weekday", weekday.to_string())?;

    let builder = if !spec.days.is_empty() && !spec.days.contains(&weekday) {
        not_matched(settings, TYPE, OUTSIDE_DAYS)
    } else if !spec.windows.is_empty() && !spec.windows.iter().any(|w| w.contains(time)) {
        not_matched(settings, TYPE, OUTSIDE_HOURS)
    } else {
        matched(settings, TYPE, IN_SCHEDULE)
    };

    builder.detail(local_time).detail(local_weekday).build()
}
