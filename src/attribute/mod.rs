//! Attribute model: names, types, aggregations, and value selection
//!
//! ## Overview
//!
//! ```text
//! Attribute           one named value path, optionally typed/aggregated
//! AttributeDefinition (name, type) pair as reported by the backend
//! AttributeFilter     which attributes a table fetch should return
//! Value               tagged union over the supported value kinds
//! ```
//!
//! Types have two spellings: the snake_case name used in this crate's API
//! (`float_series`) and the camelCase name used by the backend query
//! language (`floatSeries`).

mod filter;
mod value;

pub use filter::{AttributeFilter, AttributeNameFilter, AttributeSelection};
pub use value::{AttributeValue, FloatSeriesAggregations, StringSeriesAggregations, Value};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Attribute value kinds supported by the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// 64-bit float
    Float,
    /// 64-bit signed integer
    Int,
    /// UTF-8 string
    String,
    /// Boolean
    Bool,
    /// UTC timestamp
    Datetime,
    /// Float values logged over steps
    FloatSeries,
    /// String values logged over steps
    StringSeries,
    /// Set of strings (e.g. tags)
    StringSet,
}

impl AttributeType {
    /// Every supported type, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Float,
        Self::Int,
        Self::String,
        Self::Bool,
        Self::Datetime,
        Self::FloatSeries,
        Self::StringSeries,
        Self::StringSet,
    ];

    /// Name used by the backend query language.
    #[must_use]
    pub const fn backend_name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::String => "string",
            Self::Bool => "bool",
            Self::Datetime => "datetime",
            Self::FloatSeries => "floatSeries",
            Self::StringSeries => "stringSeries",
            Self::StringSet => "stringSet",
        }
    }

    /// Name used by this crate's API.
    #[must_use]
    pub const fn api_name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::String => "string",
            Self::Bool => "bool",
            Self::Datetime => "datetime",
            Self::FloatSeries => "float_series",
            Self::StringSeries => "string_series",
            Self::StringSet => "string_set",
        }
    }

    /// Parse a backend type name. Unknown names yield `None`.
    #[must_use]
    pub fn from_backend_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.backend_name() == name)
    }

    /// Whether values of this type are step series.
    #[must_use]
    pub const fn is_series(self) -> bool {
        matches!(self, Self::FloatSeries | Self::StringSeries)
    }

    /// Aggregations the backend computes for this type (empty for scalars).
    #[must_use]
    pub const fn aggregations(self) -> &'static [Aggregation] {
        match self {
            Self::FloatSeries => &Aggregation::ALL,
            Self::StringSeries => &[Aggregation::Last],
            _ => &[],
        }
    }

    /// Whether `aggregation` can be applied to this type.
    #[must_use]
    pub fn supports(self, aggregation: Aggregation) -> bool {
        self.aggregations().contains(&aggregation)
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for AttributeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.api_name() == s || t.backend_name() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown attribute type: {s}")))
    }
}

/// Series reductions computed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Value at the highest step
    Last,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Arithmetic mean
    Average,
    /// Population variance
    Variance,
}

impl Aggregation {
    /// Every aggregation, in column order.
    pub const ALL: [Self; 5] = [
        Self::Last,
        Self::Min,
        Self::Max,
        Self::Average,
        Self::Variance,
    ];

    /// Function name in the query language.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Last => "last",
            Self::Min => "min",
            Self::Max => "max",
            Self::Average => "average",
            Self::Variance => "variance",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown aggregation: {s}")))
    }
}

/// A logged value path, optionally disambiguated by type and reduced by an
/// aggregation.
///
/// Immutable value object: equality and hashing are structural, so two
/// attributes with the same name/type/aggregation compare equal and any
/// differing component makes them unequal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    name: String,
    attribute_type: Option<AttributeType>,
    aggregation: Option<Aggregation>,
}

impl Attribute {
    /// Untyped attribute with no aggregation.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attribute_type: None,
            aggregation: None,
        }
    }

    /// Attribute with an explicit type.
    #[must_use]
    pub fn typed(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self::new(name).with_type(attribute_type)
    }

    /// Return a copy with the given type.
    #[must_use]
    pub const fn with_type(mut self, attribute_type: AttributeType) -> Self {
        self.attribute_type = Some(attribute_type);
        self
    }

    /// Return a copy with the given aggregation.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAggregation` when the attribute is explicitly
    /// typed and that type does not admit `aggregation`.
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Result<Self> {
        if let Some(t) = self.attribute_type {
            if !t.supports(aggregation) {
                return Err(Error::unsupported_aggregation(
                    &self.name,
                    aggregation,
                    format!("type {t} does not support it"),
                ));
            }
        }
        self.aggregation = Some(aggregation);
        Ok(self)
    }

    /// Attribute path.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Explicit or inferred type, if known.
    #[must_use]
    pub const fn attribute_type(&self) -> Option<AttributeType> {
        self.attribute_type
    }

    /// Chosen aggregation, if any.
    #[must_use]
    pub const fn aggregation(&self) -> Option<Aggregation> {
        self.aggregation
    }

    /// Type implied by the aggregation alone.
    ///
    /// Only float series admit aggregations other than `last`, so
    /// `min`/`max`/`average`/`variance` pin the type. `last` is shared with
    /// string series and stays ambiguous.
    #[must_use]
    pub fn type_from_aggregation(&self) -> Option<AttributeType> {
        match self.aggregation? {
            Aggregation::Last => None,
            _ => Some(AttributeType::FloatSeries),
        }
    }
}

impl From<&str> for Attribute {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Attribute {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.aggregation, self.attribute_type) {
            (Some(agg), Some(t)) => write!(f, "{agg}(`{}`:{})", self.name, t.backend_name()),
            (Some(agg), None) => write!(f, "{agg}(`{}`)", self.name),
            (None, Some(t)) => write!(f, "`{}`:{}", self.name, t.backend_name()),
            (None, None) => write!(f, "`{}`", self.name),
        }
    }
}

/// An attribute as reported by the backend: name plus concrete type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeDefinition {
    /// Attribute path
    pub name: String,
    /// Concrete type
    pub attribute_type: AttributeType,
}

impl AttributeDefinition {
    /// Create a definition.
    #[must_use]
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
        }
    }
}

impl fmt::Display for AttributeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.attribute_type)
    }
}

/// Well-known system attributes and their fixed types.
pub mod sys {
    use super::AttributeType;

    /// Backend-assigned run identifier
    pub const ID: &str = "sys/id";
    /// Experiment name (set on experiment head runs)
    pub const NAME: &str = "sys/name";
    /// User-supplied run identifier
    pub const CUSTOM_RUN_ID: &str = "sys/custom_run_id";
    /// Run creation time
    pub const CREATION_TIME: &str = "sys/creation_time";
    /// Run tags
    pub const TAGS: &str = "sys/tags";
    /// Run owner
    pub const OWNER: &str = "sys/owner";

    /// Fixed type of a system attribute, if `name` is one.
    #[must_use]
    pub fn known_type(name: &str) -> Option<AttributeType> {
        match name {
            ID | NAME | CUSTOM_RUN_ID | OWNER => Some(AttributeType::String),
            CREATION_TIME => Some(AttributeType::Datetime),
            TAGS => Some(AttributeType::StringSet),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names_round_trip() {
        for t in AttributeType::ALL {
            assert_eq!(AttributeType::from_backend_name(t.backend_name()), Some(t));
        }
        assert_eq!(AttributeType::from_backend_name("experimentState"), None);
    }

    #[test]
    fn test_parse_accepts_both_spellings() {
        assert_eq!("float_series".parse::<AttributeType>().unwrap(), AttributeType::FloatSeries);
        assert_eq!("stringSet".parse::<AttributeType>().unwrap(), AttributeType::StringSet);
        assert!("histogram".parse::<AttributeType>().is_err());
    }

    #[test]
    fn test_attribute_equality() {
        let a = Attribute::typed("loss", AttributeType::FloatSeries)
            .with_aggregation(Aggregation::Max)
            .unwrap();
        let b = Attribute::typed("loss", AttributeType::FloatSeries)
            .with_aggregation(Aggregation::Max)
            .unwrap();
        let c = Attribute::typed("loss", AttributeType::FloatSeries)
            .with_aggregation(Aggregation::Min)
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_aggregation_on_scalar_rejected() {
        let err = Attribute::typed("lr", AttributeType::Float)
            .with_aggregation(Aggregation::Average)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAggregation { .. }));
    }

    #[test]
    fn test_string_series_only_last() {
        assert!(AttributeType::StringSeries.supports(Aggregation::Last));
        assert!(!AttributeType::StringSeries.supports(Aggregation::Variance));
    }

    #[test]
    fn test_type_from_aggregation() {
        let avg = Attribute::new("loss").with_aggregation(Aggregation::Average).unwrap();
        assert_eq!(avg.type_from_aggregation(), Some(AttributeType::FloatSeries));
        let last = Attribute::new("loss").with_aggregation(Aggregation::Last).unwrap();
        assert_eq!(last.type_from_aggregation(), None);
    }

    #[test]
    fn test_display() {
        let a = Attribute::typed("metrics/loss", AttributeType::FloatSeries)
            .with_aggregation(Aggregation::Last)
            .unwrap();
        assert_eq!(a.to_string(), "last(`metrics/loss`:floatSeries)");
        assert_eq!(Attribute::new("x").to_string(), "`x`");
    }

    #[test]
    fn test_sys_known_types() {
        assert_eq!(sys::known_type(sys::TAGS), Some(AttributeType::StringSet));
        assert_eq!(sys::known_type(sys::CREATION_TIME), Some(AttributeType::Datetime));
        assert_eq!(sys::known_type("metrics/loss"), None);
    }
}
