use super::property::PropertyCell;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attributes observed on an ad request, assembled by the request layer.
///
/// Every dimension is optional; evaluators decide how absence is treated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedContext {
    #[serde(default)]
    pub geo: Option<ObservedGeo>,
    #[serde(default)]
    pub device: Option<ObservedDevice>,
    #[serde(default)]
    pub demographic: Option<ObservedDemographic>,
    #[serde(default)]
    pub behavior: Option<ObservedBehavior>,
    /// Page / query keywords
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Open-ended request attributes
    #[serde(default)]
    pub attributes: Vec<PropertyCell>,
}

impl ObservedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geo(mut self, geo: ObservedGeo) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_device(mut self, device: ObservedDevice) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_demographic(mut self, demographic: ObservedDemographic) -> Self {
        self.demographic = Some(demographic);
        self
    }

    pub fn with_behavior(mut self, behavior: ObservedBehavior) -> Self {
        self.behavior = Some(behavior);
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_attribute(mut self, attribute: PropertyCell) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// First non-expired attribute with the given key
    pub fn attribute(&self, key: &str, now: DateTime<Utc>) -> Option<&PropertyCell> {
        self.attributes
            .iter()
            .find(|a| a.key() == key && !a.is_expired(now))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedGeo {
    /// ISO 3166-1 alpha-2
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl ObservedGeo {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.country.is_none() && self.coordinates().is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    ConnectedTv,
    Other,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
            DeviceType::ConnectedTv => "connected_tv",
            DeviceType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedDevice {
    pub device_type: Option<DeviceType>,
    pub os: Option<String>,
    pub browser: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedDemographic {
    pub age: Option<u8>,
    pub gender: Option<Gender>,
    /// ISO 639-1
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedBehavior {
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub segments: Vec<String>,
}

impl ObservedBehavior {
    pub fn is_empty(&self) -> bool {
        self.interests.is_empty() && self.segments.is_empty()
    }
}
