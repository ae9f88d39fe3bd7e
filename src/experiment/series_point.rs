//! Series Point - one logged step of a float or string series

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value at one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesValue {
    /// Float series value
    Float(f64),
    /// String series value
    String(String),
}

impl SeriesValue {
    /// Float view.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::String(_) => None,
        }
    }
}

impl From<f64> for SeriesValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SeriesValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for SeriesValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Series Point represents a single series data point.
///
/// ## Preview points
///
/// A preview point is provisional: `preview_completion` in `[0, 1)` says
/// how far the producing computation got. A committed point at the same
/// step from the same run supersedes it. Committed points have
/// `is_preview == false` and `preview_completion == 1.0`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesPoint {
    step: f64,
    value: SeriesValue,
    timestamp: DateTime<Utc>,
    is_preview: bool,
    preview_completion: f64,
}

impl SeriesPoint {
    /// Create a committed point stamped now.
    ///
    /// # Arguments
    ///
    /// * `step` - Position on the series step axis
    /// * `value` - Logged value
    #[must_use]
    pub fn new(step: f64, value: impl Into<SeriesValue>) -> Self {
        SeriesPointBuilder::new(step, value).build()
    }

    /// Create a builder for constructing a point with optional fields.
    #[must_use]
    pub fn builder(step: f64, value: impl Into<SeriesValue>) -> SeriesPointBuilder {
        SeriesPointBuilder::new(step, value)
    }

    /// Get the step.
    #[must_use]
    pub const fn step(&self) -> f64 {
        self.step
    }

    /// Get the value.
    #[must_use]
    pub const fn value(&self) -> &SeriesValue {
        &self.value
    }

    /// Get the wall-clock time the point was logged.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether the point is a preview.
    #[must_use]
    pub const fn is_preview(&self) -> bool {
        self.is_preview
    }

    /// Completion of a preview, `1.0` for committed points.
    #[must_use]
    pub const fn preview_completion(&self) -> f64 {
        self.preview_completion
    }
}

/// Builder for `SeriesPoint`.
#[derive(Debug)]
pub struct SeriesPointBuilder {
    step: f64,
    value: SeriesValue,
    timestamp: DateTime<Utc>,
    preview_completion: Option<f64>,
}

impl SeriesPointBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(step: f64, value: impl Into<SeriesValue>) -> Self {
        Self {
            step,
            value: value.into(),
            timestamp: Utc::now(),
            preview_completion: None,
        }
    }

    /// Set a custom timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Mark as a preview with the given completion (clamped to `[0, 1]`).
    #[must_use]
    pub fn preview(mut self, completion: f64) -> Self {
        self.preview_completion = Some(completion.clamp(0.0, 1.0));
        self
    }

    /// Build the `SeriesPoint`.
    #[must_use]
    pub fn build(self) -> SeriesPoint {
        SeriesPoint {
            step: self.step,
            value: self.value,
            timestamp: self.timestamp,
            is_preview: self.preview_completion.is_some(),
            preview_completion: self.preview_completion.unwrap_or(1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_point_new() {
        let p = SeriesPoint::new(1.0, 0.5);
        assert!((p.step() - 1.0).abs() < f64::EPSILON);
        assert_eq!(p.value().as_f64(), Some(0.5));
        assert!(!p.is_preview());
        assert!((p.preview_completion() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_series_point_preview() {
        let p = SeriesPoint::builder(2.0, "epoch 2").preview(0.4).build();
        assert!(p.is_preview());
        assert!((p.preview_completion() - 0.4).abs() < f64::EPSILON);
        assert_eq!(p.value(), &SeriesValue::String("epoch 2".into()));
    }

    #[test]
    fn test_preview_completion_clamped() {
        let p = SeriesPoint::builder(0.0, 1.0).preview(3.0).build();
        assert!((p.preview_completion() - 1.0).abs() < f64::EPSILON);
    }
}
