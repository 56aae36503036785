mod context;
mod outcome;
mod property;
mod result;
mod targeting;

pub use context::{
    DeviceType, Gender, ObservedBehavior, ObservedContext, ObservedDemographic, ObservedDevice,
    ObservedGeo,
};
pub use outcome::{reason, CriterionOutcome, CriterionOutcomeBuilder};
pub use property::{PropertyCell, PropertyType};
pub use result::{MatchResultRecord, OverallMatchResult};
pub use targeting::{
    BehaviorTargeting, DemographicTargeting, DeviceTargeting, DimensionSettings, DimensionSpec,
    GeoFence, GeoRegion, GeoTargeting, KeywordTargeting, TargetingConfig, TimeTargeting,
    TimeWindow,
};

pub(crate) use property::find_sorted;

use crate::error::{Result, TargetingError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Targeting dimension a criterion evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriteriaType {
    Geo,
    Demographic,
    Device,
    Time,
    Behavior,
    Keyword,
}

impl CriteriaType {
    pub const ALL: [CriteriaType; 6] = [
        CriteriaType::Geo,
        CriteriaType::Demographic,
        CriteriaType::Device,
        CriteriaType::Time,
        CriteriaType::Behavior,
        CriteriaType::Keyword,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CriteriaType::Geo => "geo",
            CriteriaType::Demographic => "demographic",
            CriteriaType::Device => "device",
            CriteriaType::Time => "time",
            CriteriaType::Behavior => "behavior",
            CriteriaType::Keyword => "keyword",
        }
    }
}

impl fmt::Display for CriteriaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! non_empty_id {
    ($name:ident, $what:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(TargetingError::InvalidIdentifier(format!(
                        "{} must not be empty",
                        $what
                    )));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = TargetingError;

            fn try_from(value: String) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

non_empty_id!(CandidateId, "ad candidate id");
non_empty_id!(ContextId, "ad context id");
