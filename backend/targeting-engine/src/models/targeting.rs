// ============================================
// Targeting Config (campaign-authored rules)
// ============================================
//
// One optional rule set per dimension. A config is valid when at least one
// rule set is enabled and every enabled rule set is itself well formed.
// Evaluators only read these values.

use super::context::{DeviceType, Gender, ObservedGeo};
use super::CriteriaType;
use crate::error::{Result, TargetingError};
use crate::utils::{haversine_km, normalize_token};
use chrono::{FixedOffset, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Settings shared by every dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Mandatory dimension: a failed or unevaluable criterion vetoes the match
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub priority: i32,
    /// Overrides the criteria id reported on outcomes (defaults to the dimension name)
    #[serde(default)]
    pub id: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

impl Default for DimensionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            required: false,
            weight: 1.0,
            priority: 0,
            id: None,
        }
    }
}

impl DimensionSettings {
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn criteria_id(&self, criteria_type: CriteriaType) -> String {
        self.id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| criteria_type.as_str().to_string())
    }

    fn validate(&self, criteria_type: CriteriaType) -> Result<()> {
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(invalid(
                criteria_type,
                format!("weight must be a finite non-negative number, got {}", self.weight),
            ));
        }
        if self.required && self.weight == 0.0 {
            return Err(invalid(
                criteria_type,
                "required dimension must carry a positive weight",
            ));
        }
        Ok(())
    }
}

fn invalid(criteria_type: CriteriaType, message: impl Into<String>) -> TargetingError {
    TargetingError::InvalidTargeting(format!("{}: {}", criteria_type, message.into()))
}

fn has_blank(values: &[String]) -> bool {
    values.iter().any(|v| v.trim().is_empty())
}

/// Common surface of every dimension rule set
pub trait DimensionSpec {
    const CRITERIA_TYPE: CriteriaType;

    fn settings(&self) -> &DimensionSettings;

    /// Rule-level checks; settings are validated separately
    fn validate_rules(&self) -> Result<()>;

    fn validate(&self) -> Result<()> {
        self.settings().validate(Self::CRITERIA_TYPE)?;
        self.validate_rules()
    }

    fn is_enabled(&self) -> bool {
        self.settings().enabled
    }
}

// ---------------------------------------------------------------------------
// Geo
// ---------------------------------------------------------------------------

/// Administrative region; each optional level narrows the match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoRegion {
    pub country: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

impl GeoRegion {
    pub fn country(country: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            region: None,
            city: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn matches(&self, observed: &ObservedGeo) -> bool {
        fn level_matches(target: Option<&String>, observed: Option<&String>) -> bool {
            match target {
                None => true,
                Some(t) => observed
                    .map(|o| normalize_token(o) == normalize_token(t))
                    .unwrap_or(false),
            }
        }

        level_matches(Some(&self.country), observed.country.as_ref())
            && level_matches(self.region.as_ref(), observed.region.as_ref())
            && level_matches(self.city.as_ref(), observed.city.as_ref())
    }

    fn is_valid(&self) -> bool {
        !self.country.trim().is_empty()
            && self.region.as_ref().map_or(true, |r| !r.trim().is_empty())
            && self.city.as_ref().map_or(true, |c| !c.trim().is_empty())
    }
}

/// Circular geofence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFence {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

impl GeoFence {
    pub fn new(latitude: f64, longitude: f64, radius_km: f64) -> Self {
        Self {
            latitude,
            longitude,
            radius_km,
        }
    }

    pub fn distance_km(&self, latitude: f64, longitude: f64) -> f64 {
        haversine_km(self.latitude, self.longitude, latitude, longitude)
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        self.distance_km(latitude, longitude) <= self.radius_km
    }

    fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && self.radius_km.is_finite()
            && self.radius_km > 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoTargeting {
    #[serde(default)]
    pub settings: DimensionSettings,
    #[serde(default)]
    pub include_regions: Vec<GeoRegion>,
    #[serde(default)]
    pub include_fences: Vec<GeoFence>,
    #[serde(default)]
    pub exclude_regions: Vec<GeoRegion>,
    #[serde(default)]
    pub exclude_fences: Vec<GeoFence>,
}

impl GeoTargeting {
    pub fn has_includes(&self) -> bool {
        !self.include_regions.is_empty() || !self.include_fences.is_empty()
    }
}

impl DimensionSpec for GeoTargeting {
    const CRITERIA_TYPE: CriteriaType = CriteriaType::Geo;

    fn settings(&self) -> &DimensionSettings {
        &self.settings
    }

    fn validate_rules(&self) -> Result<()> {
        let rule_count = self.include_regions.len()
            + self.include_fences.len()
            + self.exclude_regions.len()
            + self.exclude_fences.len();
        if rule_count == 0 {
            return Err(invalid(
                Self::CRITERIA_TYPE,
                "at least one included or excluded region/fence is required",
            ));
        }
        if self
            .include_regions
            .iter()
            .chain(self.exclude_regions.iter())
            .any(|r| !r.is_valid())
        {
            return Err(invalid(Self::CRITERIA_TYPE, "regions need a non-blank country"));
        }
        if self
            .include_fences
            .iter()
            .chain(self.exclude_fences.iter())
            .any(|f| !f.is_valid())
        {
            return Err(invalid(
                Self::CRITERIA_TYPE,
                "fences need valid coordinates and a positive radius",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Demographic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemographicTargeting {
    #[serde(default)]
    pub settings: DimensionSettings,
    #[serde(default)]
    pub min_age: Option<u8>,
    #[serde(default)]
    pub max_age: Option<u8>,
    #[serde(default)]
    pub genders: Vec<Gender>,
    #[serde(default)]
    pub languages: Vec<String>,
}

impl DemographicTargeting {
    pub fn has_age_range(&self) -> bool {
        self.min_age.is_some() || self.max_age.is_some()
    }

    pub fn age_in_range(&self, age: u8) -> bool {
        self.min_age.map_or(true, |min| age >= min) && self.max_age.map_or(true, |max| age <= max)
    }
}

impl DimensionSpec for DemographicTargeting {
    const CRITERIA_TYPE: CriteriaType = CriteriaType::Demographic;

    fn settings(&self) -> &DimensionSettings {
        &self.settings
    }

    fn validate_rules(&self) -> Result<()> {
        if !self.has_age_range() && self.genders.is_empty() && self.languages.is_empty() {
            return Err(invalid(
                Self::CRITERIA_TYPE,
                "at least one of age range, genders or languages is required",
            ));
        }
        if let (Some(min), Some(max)) = (self.min_age, self.max_age) {
            if min > max {
                return Err(invalid(
                    Self::CRITERIA_TYPE,
                    format!("min_age {} exceeds max_age {}", min, max),
                ));
            }
        }
        if has_blank(&self.languages) {
            return Err(invalid(Self::CRITERIA_TYPE, "languages must not be blank"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceTargeting {
    #[serde(default)]
    pub settings: DimensionSettings,
    #[serde(default)]
    pub device_types: Vec<DeviceType>,
    #[serde(default)]
    pub operating_systems: Vec<String>,
    #[serde(default)]
    pub browsers: Vec<String>,
}

impl DimensionSpec for DeviceTargeting {
    const CRITERIA_TYPE: CriteriaType = CriteriaType::Device;

    fn settings(&self) -> &DimensionSettings {
        &self.settings
    }

    fn validate_rules(&self) -> Result<()> {
        if self.device_types.is_empty()
            && self.operating_systems.is_empty()
            && self.browsers.is_empty()
        {
            return Err(invalid(
                Self::CRITERIA_TYPE,
                "at least one of device types, operating systems or browsers is required",
            ));
        }
        if has_blank(&self.operating_systems) || has_blank(&self.browsers) {
            return Err(invalid(Self::CRITERIA_TYPE, "blank os/browser entry"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Local time-of-day window `[start, end)`; `start > end` wraps past midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Whole-hour window, e.g. `hours(22, 2)`. An end hour of 24 closes the
    /// window at midnight (`hours(18, 24)`). `hours(0, 24)` collapses to an
    /// empty window and fails validation; leave `windows` empty for all day.
    pub fn hours(start_hour: u32, end_hour: u32) -> Option<Self> {
        let start = NaiveTime::from_hms_opt(start_hour % 24, 0, 0)?;
        let end = NaiveTime::from_hms_opt(end_hour % 24, 0, 0)?;
        Some(Self { start, end })
    }

    pub fn crosses_midnight(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.crosses_midnight() {
            time >= self.start || time < self.end
        } else {
            time >= self.start && time < self.end
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeTargeting {
    #[serde(default)]
    pub settings: DimensionSettings,
    /// Empty means every day
    #[serde(default)]
    pub days: Vec<Weekday>,
    /// Empty means all day
    #[serde(default)]
    pub windows: Vec<TimeWindow>,
    /// Campaign time zone as a fixed offset east of UTC
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl TimeTargeting {
    pub fn offset(&self) -> Option<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
    }
}

impl DimensionSpec for TimeTargeting {
    const CRITERIA_TYPE: CriteriaType = CriteriaType::Time;

    fn settings(&self) -> &DimensionSettings {
        &self.settings
    }

    fn validate_rules(&self) -> Result<()> {
        if self.days.is_empty() && self.windows.is_empty() {
            return Err(invalid(
                Self::CRITERIA_TYPE,
                "at least one day or time window is required",
            ));
        }
        if self.windows.iter().any(|w| w.start == w.end) {
            return Err(invalid(
                Self::CRITERIA_TYPE,
                "time window start and end must differ",
            ));
        }
        if self.offset().is_none() {
            return Err(invalid(
                Self::CRITERIA_TYPE,
                format!("utc offset {} minutes is out of range", self.utc_offset_minutes),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorTargeting {
    #[serde(default)]
    pub settings: DimensionSettings,
    #[serde(default)]
    pub interests: Vec<String>,
    /// Minimum number of targeted interests the user must share
    #[serde(default = "default_min_overlap")]
    pub min_overlap: usize,
    #[serde(default)]
    pub excluded_segments: Vec<String>,
}

fn default_min_overlap() -> usize {
    1
}

impl Default for BehaviorTargeting {
    fn default() -> Self {
        Self {
            settings: DimensionSettings::default(),
            interests: Vec::new(),
            min_overlap: default_min_overlap(),
            excluded_segments: Vec::new(),
        }
    }
}

impl DimensionSpec for BehaviorTargeting {
    const CRITERIA_TYPE: CriteriaType = CriteriaType::Behavior;

    fn settings(&self) -> &DimensionSettings {
        &self.settings
    }

    fn validate_rules(&self) -> Result<()> {
        if self.interests.is_empty() {
            return Err(invalid(Self::CRITERIA_TYPE, "interests must not be empty"));
        }
        if self.min_overlap == 0 || self.min_overlap > self.interests.len() {
            return Err(invalid(
                Self::CRITERIA_TYPE,
                format!(
                    "min_overlap must be within 1..={}, got {}",
                    self.interests.len(),
                    self.min_overlap
                ),
            ));
        }
        if has_blank(&self.interests) || has_blank(&self.excluded_segments) {
            return Err(invalid(Self::CRITERIA_TYPE, "blank interest or segment"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Keyword / interest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordTargeting {
    #[serde(default)]
    pub settings: DimensionSettings,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub negative_keywords: Vec<String>,
}

impl DimensionSpec for KeywordTargeting {
    const CRITERIA_TYPE: CriteriaType = CriteriaType::Keyword;

    fn settings(&self) -> &DimensionSettings {
        &self.settings
    }

    fn validate_rules(&self) -> Result<()> {
        if self.keywords.is_empty() && self.interests.is_empty() {
            return Err(invalid(
                Self::CRITERIA_TYPE,
                "at least one keyword or interest is required",
            ));
        }
        if has_blank(&self.keywords)
            || has_blank(&self.interests)
            || has_blank(&self.negative_keywords)
        {
            return Err(invalid(Self::CRITERIA_TYPE, "blank keyword"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetingConfig {
    #[serde(default)]
    pub geo: Option<GeoTargeting>,
    #[serde(default)]
    pub demographic: Option<DemographicTargeting>,
    #[serde(default)]
    pub device: Option<DeviceTargeting>,
    #[serde(default)]
    pub time: Option<TimeTargeting>,
    #[serde(default)]
    pub behavior: Option<BehaviorTargeting>,
    #[serde(default)]
    pub keyword: Option<KeywordTargeting>,
}

impl TargetingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geo(mut self, geo: GeoTargeting) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_demographic(mut self, demographic: DemographicTargeting) -> Self {
        self.demographic = Some(demographic);
        self
    }

    pub fn with_device(mut self, device: DeviceTargeting) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_time(mut self, time: TimeTargeting) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_behavior(mut self, behavior: BehaviorTargeting) -> Self {
        self.behavior = Some(behavior);
        self
    }

    pub fn with_keyword(mut self, keyword: KeywordTargeting) -> Self {
        self.keyword = Some(keyword);
        self
    }

    /// Dimensions whose rule set is present and enabled, in canonical order
    pub fn enabled_dimensions(&self) -> Vec<CriteriaType> {
        let mut dims = Vec::new();
        if self.geo.as_ref().is_some_and(|s| s.is_enabled()) {
            dims.push(CriteriaType::Geo);
        }
        if self.demographic.as_ref().is_some_and(|s| s.is_enabled()) {
            dims.push(CriteriaType::Demographic);
        }
        if self.device.as_ref().is_some_and(|s| s.is_enabled()) {
            dims.push(CriteriaType::Device);
        }
        if self.time.as_ref().is_some_and(|s| s.is_enabled()) {
            dims.push(CriteriaType::Time);
        }
        if self.behavior.as_ref().is_some_and(|s| s.is_enabled()) {
            dims.push(CriteriaType::Behavior);
        }
        if self.keyword.as_ref().is_some_and(|s| s.is_enabled()) {
            dims.push(CriteriaType::Keyword);
        }
        dims
    }

    pub fn validate(&self) -> Result<()> {
        fn check<S: DimensionSpec>(spec: &Option<S>) -> Result<()> {
            match spec {
                Some(s) if s.is_enabled() => s.validate(),
                _ => Ok(()),
            }
        }

        if self.enabled_dimensions().is_empty() {
            return Err(TargetingError::InvalidTargeting(
                "at least one targeting dimension must be enabled".to_string(),
            ));
        }

        check(&self.geo)?;
        check(&self.demographic)?;
        check(&self.device)?;
        check(&self.time)?;
        check(&self.behavior)?;
        check(&self.keyword)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn germany() -> GeoTargeting {
        GeoTargeting {
            include_regions: vec![GeoRegion::country("DE")],
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_config_is_invalid() {
        let result = TargetingConfig::new().validate();
        assert!(matches!(result, Err(TargetingError::InvalidTargeting(_))));
    }

    #[test]
    fn test_only_disabled_dimensions_is_invalid() {
        let mut geo = germany();
        geo.settings = geo.settings.disabled();
        let config = TargetingConfig::new().with_geo(geo);

        assert!(config.enabled_dimensions().is_empty());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_dimension_is_not_validated() {
        let broken_device = DeviceTargeting {
            settings: DimensionSettings::default().disabled(),
            ..Default::default()
        };
        let config = TargetingConfig::new()
            .with_geo(germany())
            .with_device(broken_device);

        assert!(config.validate().is_ok());
        assert_eq!(config.enabled_dimensions(), vec![CriteriaType::Geo]);
    }

    #[test]
    fn test_enabled_dimension_must_be_valid() {
        let config = TargetingConfig::new()
            .with_geo(germany())
            .with_device(DeviceTargeting::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_age_range_must_be_ordered() {
        let demo = DemographicTargeting {
            min_age: Some(40),
            max_age: Some(18),
            ..Default::default()
        };
        assert!(demo.validate().is_err());

        let demo = DemographicTargeting {
            min_age: Some(18),
            max_age: Some(40),
            ..Default::default()
        };
        assert!(demo.validate().is_ok());
        assert!(demo.age_in_range(18));
        assert!(demo.age_in_range(40));
        assert!(!demo.age_in_range(41));
    }

    #[test]
    fn test_required_dimension_needs_positive_weight() {
        let mut geo = germany();
        geo.settings = DimensionSettings::default().required().with_weight(0.0);
        assert!(geo.validate().is_err());
    }

    #[test]
    fn test_time_window_crossing_midnight() {
        let window = TimeWindow::hours(22, 2).unwrap();
        assert!(window.crosses_midnight());
        assert!(window.contains(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(1, 59, 59).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(2, 0, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[test]
    fn test_end_hour_24_closes_at_midnight() {
        let evening = TimeWindow::hours(18, 24).unwrap();
        assert!(evening.contains(NaiveTime::from_hms_opt(23, 59, 59).unwrap()));
        assert!(evening.contains(NaiveTime::from_hms_opt(18, 0, 0).unwrap()));
        assert!(!evening.contains(NaiveTime::from_hms_opt(0, 0, 0).unwrap()));
        assert!(!evening.contains(NaiveTime::from_hms_opt(17, 59, 59).unwrap()));

        let whole_day = TimeTargeting {
            windows: vec![TimeWindow::hours(0, 24).unwrap()],
            ..Default::default()
        };
        assert!(whole_day.validate().is_err());

        let all_day = TimeTargeting {
            days: vec![Weekday::Mon],
            ..Default::default()
        };
        assert!(all_day.validate().is_ok());
    }

    #[test]
    fn test_degenerate_time_window_rejected() {
        let time = TimeTargeting {
            windows: vec![TimeWindow::hours(9, 9).unwrap()],
            ..Default::default()
        };
        assert!(time.validate().is_err());
    }

    #[test]
    fn test_time_offset_out_of_range_rejected() {
        let time = TimeTargeting {
            days: vec![Weekday::Mon],
            utc_offset_minutes: 24 * 60,
            ..Default::default()
        };
        assert!(time.validate().is_err());
    }

    #[test]
    fn test_behavior_min_overlap_bounds() {
        let behavior = BehaviorTargeting {
            interests: vec!["sports".into(), "travel".into()],
            min_overlap: 3,
            ..Default::default()
        };
        assert!(behavior.validate().is_err());
    }

    #[test]
    fn test_geo_region_levels_narrow() {
        let observed = ObservedGeo {
            country: Some("us".into()),
            region: Some("CA".into()),
            city: Some("San Francisco".into()),
            ..Default::default()
        };

        assert!(GeoRegion::country("US").matches(&observed));
        assert!(GeoRegion::country("US").with_region("ca").matches(&observed));
        assert!(!GeoRegion::country("US").with_region("NY").matches(&observed));
        assert!(!GeoRegion::country("US")
            .with_region("CA")
            .with_city("Los Angeles")
            .matches(&observed));
    }

    #[test]
    fn test_config_deserializes_from_json() {
        let json = r#"{
            "geo": {"include_regions": [{"country": "FR"}], "settings": {"required": true, "weight": 2.0}},
            "time": {"days": ["Sat", "Sun"], "windows": [{"start": "22:00:00", "end": "02:00:00"}], "utc_offset_minutes": 60}
        }"#;
        let config: TargetingConfig = serde_json::from_str(json).unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(
            config.enabled_dimensions(),
            vec![CriteriaType::Geo, CriteriaType::Time]
        );
        let geo = config.geo.unwrap();
        assert!(geo.settings.required);
        assert_eq!(geo.settings.weight, 2.0);
        assert!(config.time.unwrap().windows[0].crosses_midnight());
    }
}
