//! Attribute values as a tagged union over the supported kinds

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Aggregation, AttributeDefinition, AttributeType};

/// Backend-computed reductions of a float series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatSeriesAggregations {
    /// Value at the highest step
    pub last: f64,
    /// Minimum
    pub min: f64,
    /// Maximum
    pub max: f64,
    /// Mean
    pub average: f64,
    /// Population variance
    pub variance: f64,
}

impl FloatSeriesAggregations {
    /// Compute aggregations from values ordered by step. `None` if empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let last = *values.last()?;
        let n = values.len() as f64;
        let average = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - average).powi(2)).sum::<f64>() / n;
        Some(Self {
            last,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            average,
            variance,
        })
    }

    /// Pick one reduction.
    #[must_use]
    pub const fn get(&self, aggregation: Aggregation) -> f64 {
        match aggregation {
            Aggregation::Last => self.last,
            Aggregation::Min => self.min,
            Aggregation::Max => self.max,
            Aggregation::Average => self.average,
            Aggregation::Variance => self.variance,
        }
    }
}

/// Backend-computed reductions of a string series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringSeriesAggregations {
    /// Value at the highest step
    pub last: String,
    /// Highest step
    pub last_step: f64,
}

/// One attribute value.
///
/// Series values carry only their aggregates here; point-level data is
/// fetched separately by the series assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Float scalar
    Float(f64),
    /// Integer scalar
    Int(i64),
    /// String scalar
    String(String),
    /// Boolean scalar
    Bool(bool),
    /// Timestamp
    Datetime(DateTime<Utc>),
    /// Set of strings
    StringSet(BTreeSet<String>),
    /// Float series aggregates
    FloatSeries(FloatSeriesAggregations),
    /// String series aggregates
    StringSeries(StringSeriesAggregations),
}

impl Value {
    /// Type tag of this value.
    #[must_use]
    pub const fn attribute_type(&self) -> AttributeType {
        match self {
            Self::Float(_) => AttributeType::Float,
            Self::Int(_) => AttributeType::Int,
            Self::String(_) => AttributeType::String,
            Self::Bool(_) => AttributeType::Bool,
            Self::Datetime(_) => AttributeType::Datetime,
            Self::StringSet(_) => AttributeType::StringSet,
            Self::FloatSeries(_) => AttributeType::FloatSeries,
            Self::StringSeries(_) => AttributeType::StringSeries,
        }
    }

    /// Scalar cell value for a table column.
    ///
    /// Scalars ignore `aggregation`. Series reduce to the chosen aggregate;
    /// `None` means the aggregation does not apply to this type.
    #[must_use]
    pub fn cell(&self, aggregation: Option<Aggregation>) -> Option<Self> {
        match (self, aggregation) {
            (Self::FloatSeries(aggs), agg) => {
                Some(Self::Float(aggs.get(agg.unwrap_or(Aggregation::Last))))
            }
            (Self::StringSeries(aggs), None | Some(Aggregation::Last)) => {
                Some(Self::String(aggs.last.clone()))
            }
            (Self::StringSeries(_), Some(_)) => None,
            (scalar, _) => Some(scalar.clone()),
        }
    }

    /// Numeric view used for sorting and comparisons.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::FloatSeries(a) => Some(a.last),
            _ => None,
        }
    }

    /// String view, if the value is a string scalar.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::StringSeries(a) => Some(&a.last),
            _ => None,
        }
    }

    /// Total order used for row sorting. Values of different kinds order by
    /// type tag.
    #[must_use]
    pub fn sort_cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Datetime(a), Self::Datetime(b)) => a.cmp(b),
            (Self::StringSet(a), Self::StringSet(b)) => a.cmp(b),
            (Self::StringSeries(a), Self::StringSeries(b)) => a.last.cmp(&b.last),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => self.attribute_type().cmp(&other.attribute_type()),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Datetime(v) => f.write_str(&v.to_rfc3339()),
            Self::StringSet(v) => {
                let items: Vec<&str> = v.iter().map(String::as_str).collect();
                write!(f, "{{{}}}", items.join(","))
            }
            Self::FloatSeries(a) => write!(f, "{}", a.last),
            Self::StringSeries(a) => f.write_str(&a.last),
        }
    }
}

/// A value fetched for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    /// Backend run identifier
    pub run_id: String,
    /// Name and type
    pub definition: AttributeDefinition,
    /// The value
    pub value: Value,
}

impl AttributeValue {
    /// Create an attribute value.
    #[must_use]
    pub fn new(run_id: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        let definition = AttributeDefinition::new(name, value.attribute_type());
        Self {
            run_id: run_id.into(),
            definition,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_series_aggregations() {
        let a = FloatSeriesAggregations::from_values(&[1.0, 3.0, 2.0]).unwrap();
        assert!((a.last - 2.0).abs() < f64::EPSILON);
        assert!((a.min - 1.0).abs() < f64::EPSILON);
        assert!((a.max - 3.0).abs() < f64::EPSILON);
        assert!((a.average - 2.0).abs() < f64::EPSILON);
        assert!((a.variance - 2.0 / 3.0).abs() < 1e-12);
        assert!(FloatSeriesAggregations::from_values(&[]).is_none());
    }

    #[test]
    fn test_cell_from_series() {
        let v = Value::FloatSeries(FloatSeriesAggregations::from_values(&[0.5, 0.1]).unwrap());
        assert_eq!(v.cell(None), Some(Value::Float(0.1)));
        assert_eq!(v.cell(Some(Aggregation::Max)), Some(Value::Float(0.5)));
    }

    #[test]
    fn test_cell_string_series_only_last() {
        let v = Value::StringSeries(StringSeriesAggregations {
            last: "done".into(),
            last_step: 3.0,
        });
        assert_eq!(v.cell(Some(Aggregation::Last)), Some(Value::String("done".into())));
        assert_eq!(v.cell(Some(Aggregation::Min)), None);
    }

    #[test]
    fn test_scalar_cell_ignores_aggregation() {
        assert_eq!(Value::Int(3).cell(Some(Aggregation::Min)), Some(Value::Int(3)));
    }

    #[test]
    fn test_sort_cmp_mixed_numeric() {
        use std::cmp::Ordering;
        assert_eq!(Value::Int(1).sort_cmp(&Value::Float(1.5)), Ordering::Less);
        assert_eq!(
            Value::String("b".into()).sort_cmp(&Value::String("a".into())),
            Ordering::Greater
        );
    }

    #[test]
    fn test_attribute_value_definition_from_tag() {
        let v = AttributeValue::new("RUN-1", "params/lr", Value::Float(0.01));
        assert_eq!(v.definition.attribute_type, AttributeType::Float);
    }
}
