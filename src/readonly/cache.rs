//! Per-facade field cache using `DashMap`.
//!
//! Entries live until the owning facade is dropped or the path is removed;
//! there is no expiry. Inserts are safe from concurrent prefetch workers.

use dashmap::DashMap;

use crate::attribute::Value;
use crate::experiment::SeriesPoint;
use crate::series::StepRange;

/// Series points cached together with the options they were fetched under.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSeries {
    /// Merged points
    pub points: Vec<SeriesPoint>,
    /// Whether ancestor points were included
    pub include_inherited: bool,
    /// Step window the points were fetched with
    pub step_range: StepRange,
}

/// Cache keyed by `(run_id, field_path)`.
#[derive(Debug, Default)]
pub struct FetchCache {
    values: DashMap<(String, String), Value>,
    series: DashMap<(String, String), CachedSeries>,
}

impl FetchCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value of `path` on `run_id`.
    #[must_use]
    pub fn value(&self, run_id: &str, path: &str) -> Option<Value> {
        self.values
            .get(&(run_id.to_string(), path.to_string()))
            .map(|v| v.value().clone())
    }

    /// Whether a value for `path` is cached.
    #[must_use]
    pub fn contains_value(&self, run_id: &str, path: &str) -> bool {
        self.values
            .contains_key(&(run_id.to_string(), path.to_string()))
    }

    /// Store a value.
    pub fn insert_value(&self, run_id: &str, path: impl Into<String>, value: Value) {
        self.values.insert((run_id.to_string(), path.into()), value);
    }

    /// Cached points of `path` on `run_id`.
    #[must_use]
    pub fn series(&self, run_id: &str, path: &str) -> Option<CachedSeries> {
        self.series
            .get(&(run_id.to_string(), path.to_string()))
            .map(|s| s.value().clone())
    }

    /// Store series points.
    pub fn insert_series(&self, run_id: &str, path: impl Into<String>, series: CachedSeries) {
        self.series.insert((run_id.to_string(), path.into()), series);
    }

    /// Drop everything cached for `path`. Returns whether anything was removed.
    pub fn remove(&self, run_id: &str, path: &str) -> bool {
        let key = (run_id.to_string(), path.to_string());
        let value = self.values.remove(&key).is_some();
        let series = self.series.remove(&key).is_some();
        value || series
    }

    /// Number of cached entries, values and series together.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len() + self.series.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.series.is_empty()
    }
}
