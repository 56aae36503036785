use super::{matched, missing_context, not_matched};
use crate::error::Result;
use crate::models::{CriteriaType, CriterionOutcome, DeviceTargeting, ObservedContext, PropertyCell};
use crate::utils::normalize_token;

pub const DEVICE_MATCH: &str = "DEVICE_MATCH";
pub const DEVICE_TYPE_MISMATCH: &str = "DEVICE_TYPE_MISMATCH";
pub const OS_MISMATCH: &str = "OS_MISMATCH";
pub const BROWSER_MISMATCH: &str = "BROWSER_MISMATCH";

const TYPE: CriteriaType = CriteriaType::Device;

pub(super) fn evaluate(spec: &DeviceTargeting, context: &ObservedContext) -> Result<CriterionOutcome> {
    let settings = &spec.settings;
    let Some(observed) = context.device.as_ref() else {
        return missing_context(settings, TYPE, "device");
    };

    let mut checked = 0_i64;

    if !spec.device_types.is_empty() {
        match observed.device_type {
            Some(device_type) if !spec.device_types.contains(&device_type) => {
                return not_matched(settings, TYPE, DEVICE_TYPE_MISMATCH)
                    .detail(PropertyCell::string("observed_device_type", device_type.as_str())?)
                    .build();
            }
            Some(_) => checked += 1,
            None if settings.required => return missing_context(settings, TYPE, "device_type"),
            None => {}
        }
    }

    match check_token(&spec.operating_systems, observed.os.as_deref()) {
        TokenCheck::Allowed => checked += 1,
        TokenCheck::Different(os) => {
            return not_matched(settings, TYPE, OS_MISMATCH)
                .detail(PropertyCell::string("observed_os", os)?)
                .build();
        }
        TokenCheck::Missing if settings.required => return missing_context(settings, TYPE, "os"),
        TokenCheck::Missing | TokenCheck::NotTargeted => {}
    }

    match check_token(&spec.browsers, observed.browser.as_deref()) {
        TokenCheck::Allowed => checked += 1,
        TokenCheck::Different(browser) => {
            return not_matched(settings, TYPE, BROWSER_MISMATCH)
                .detail(PropertyCell::string("observed_browser", browser)?)
                .build();
        }
        TokenCheck::Missing if settings.required => {
            return missing_context(settings, TYPE, "browser");
        }
        TokenCheck::Missing | TokenCheck::NotTargeted => {}
    }

    if checked == 0 {
        return missing_context(settings, TYPE, "device");
    }

    matched(settings, TYPE, DEVICE_MATCH)
        .detail(PropertyCell::integer("constraints_checked", checked)?)
        .build()
}

enum TokenCheck {
    NotTargeted,
    Allowed,
    Missing,
    Different(String),
}

/// Check an observed token against an allow-list, case-insensitively
fn check_token(allowed: &[String], observed: Option<&str>) -> TokenCheck {
    if allowed.is_empty() {
        return TokenCheck::NotTargeted;
    }
    let Some(observed) = observed.map(normalize_token) else {
        return TokenCheck::Missing;
    };
    if allowed.iter().any(|a| normalize_token(a) == observed) {
        TokenCheck::Allowed
    } else {
        TokenCheck::Different(observed)
    }
}
