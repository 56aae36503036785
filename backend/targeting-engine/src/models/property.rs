// ============================================
// Property Cell (typed key/value carrier)
// ============================================
//
// Open-ended attributes (request environment, evaluator details, statistics)
// travel as serialized strings tagged with their declared type. Readers go
// through the typed accessors, which return None instead of failing when the
// value does not parse as the declared type.

use crate::error::{Result, TargetingError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

pub const DEFAULT_CATEGORY: &str = "general";
pub const DEFAULT_SOURCE: &str = "engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    /// Milliseconds
    Duration,
    Json,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Integer => "integer",
            PropertyType::Float => "float",
            PropertyType::Boolean => "boolean",
            PropertyType::Timestamp => "timestamp",
            PropertyType::Duration => "duration",
            PropertyType::Json => "json",
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPropertyCell")]
pub struct PropertyCell {
    key: String,
    serialized_value: String,
    declared_type: PropertyType,
    category: String,
    is_sensitive: bool,
    weight: f64,
    expires_at: Option<DateTime<Utc>>,
    source: String,
}

#[derive(Deserialize)]
struct RawPropertyCell {
    key: String,
    serialized_value: String,
    declared_type: PropertyType,
    #[serde(default = "default_category")]
    category: String,
    #[serde(default)]
    is_sensitive: bool,
    #[serde(default = "default_weight")]
    weight: f64,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_source")]
    source: String,
}

impl TryFrom<RawPropertyCell> for PropertyCell {
    type Error = TargetingError;

    fn try_from(raw: RawPropertyCell) -> Result<Self> {
        let mut cell = PropertyCell::new(raw.key, raw.serialized_value, raw.declared_type)?
            .with_category(raw.category)
            .with_source(raw.source)
            .with_weight(raw.weight)?;
        if raw.is_sensitive {
            cell = cell.sensitive();
        }
        if let Some(expires_at) = raw.expires_at {
            cell = cell.expiring_at(expires_at);
        }
        Ok(cell)
    }
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

fn default_weight() -> f64 {
    1.0
}

impl PropertyCell {
    pub fn new(
        key: impl Into<String>,
        serialized_value: impl Into<String>,
        declared_type: PropertyType,
    ) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(TargetingError::InvalidProperty(
                "property key must not be empty".to_string(),
            ));
        }

        Ok(Self {
            key,
            serialized_value: serialized_value.into(),
            declared_type,
            category: default_category(),
            is_sensitive: false,
            weight: default_weight(),
            expires_at: None,
            source: default_source(),
        })
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        Self::new(key, value, PropertyType::String)
    }

    pub fn integer(key: impl Into<String>, value: i64) -> Result<Self> {
        Self::new(key, value.to_string(), PropertyType::Integer)
    }

    pub fn float(key: impl Into<String>, value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(TargetingError::InvalidProperty(format!(
                "float property must be finite, got {}",
                value
            )));
        }
        Self::new(key, value.to_string(), PropertyType::Float)
    }

    pub fn boolean(key: impl Into<String>, value: bool) -> Result<Self> {
        Self::new(key, value.to_string(), PropertyType::Boolean)
    }

    pub fn timestamp(key: impl Into<String>, value: DateTime<Utc>) -> Result<Self> {
        Self::new(key, value.to_rfc3339(), PropertyType::Timestamp)
    }

    pub fn duration(key: impl Into<String>, value: Duration) -> Result<Self> {
        Self::new(key, value.as_millis().to_string(), PropertyType::Duration)
    }

    pub fn json<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self> {
        let serialized = serde_json::to_string(value)?;
        Self::new(key, serialized, PropertyType::Json)
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.is_sensitive = true;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Result<Self> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(TargetingError::InvalidProperty(format!(
                "property weight must be a finite non-negative number, got {}",
                weight
            )));
        }
        self.weight = weight;
        Ok(self)
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn serialized_value(&self) -> &str {
        &self.serialized_value
    }

    pub fn declared_type(&self) -> PropertyType {
        self.declared_type
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn is_sensitive(&self) -> bool {
        self.is_sensitive
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.declared_type {
            PropertyType::String => Some(&self.serialized_value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.declared_type {
            PropertyType::Integer => self.serialized_value.trim().parse().ok(),
            _ => None,
        }
    }

    /// Integers widen to floats; everything else must be declared `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self.declared_type {
            PropertyType::Float | PropertyType::Integer => self
                .serialized_value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.declared_type {
            PropertyType::Boolean => match self.serialized_value.trim() {
                v if v.eq_ignore_ascii_case("true") || v == "1" => Some(true),
                v if v.eq_ignore_ascii_case("false") || v == "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self.declared_type {
            PropertyType::Timestamp => DateTime::parse_from_rfc3339(self.serialized_value.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self.declared_type {
            PropertyType::Duration => self
                .serialized_value
                .trim()
                .parse::<u64>()
                .ok()
                .map(Duration::from_millis),
            _ => None,
        }
    }

    pub fn as_json<T: DeserializeOwned>(&self) -> Option<T> {
        match self.declared_type {
            PropertyType::Json => serde_json::from_str(&self.serialized_value).ok(),
            _ => None,
        }
    }

    fn display_value(&self) -> &str {
        if self.is_sensitive {
            "***"
        } else {
            &self.serialized_value
        }
    }
}

impl fmt::Debug for PropertyCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyCell")
            .field("key", &self.key)
            .field("value", &self.display_value())
            .field("declared_type", &self.declared_type)
            .field("category", &self.category)
            .field("is_sensitive", &self.is_sensitive)
            .field("weight", &self.weight)
            .field("expires_at", &self.expires_at)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for PropertyCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={} ({})",
            self.key,
            self.display_value(),
            self.declared_type.as_str()
        )
    }
}

impl Eq for PropertyCell {}

impl Hash for PropertyCell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.serialized_value.hash(state);
        self.declared_type.hash(state);
        self.category.hash(state);
        self.is_sensitive.hash(state);
        self.weight.to_bits().hash(state);
        self.expires_at.hash(state);
        self.source.hash(state);
    }
}

/// Insert or replace `cell` in a key-sorted list, keeping keys unique.
pub(crate) fn upsert_sorted(cells: &mut Vec<PropertyCell>, cell: PropertyCell) {
    match cells.binary_search_by(|c| c.key.as_str().cmp(cell.key.as_str())) {
        Ok(pos) => cells[pos] = cell,
        Err(pos) => cells.insert(pos, cell),
    }
}

/// Look up a cell by key in a key-sorted list.
pub(crate) fn find_sorted<'a>(cells: &'a [PropertyCell], key: &str) -> Option<&'a PropertyCell> {
    cells
        .binary_search_by(|c| c.key.as_str().cmp(key))
        .ok()
        .map(|pos| &cells[pos])
}
