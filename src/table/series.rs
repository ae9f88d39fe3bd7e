//! Series tables: one row per (label, step)

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::experiment::{ContainerType, SeriesPoint, SeriesValue};
use crate::series::RunSeries;
use crate::Warning;

/// One attribute's point at a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesCell {
    /// Logged value
    pub value: SeriesValue,
    /// Log time, when timestamps were requested
    pub timestamp: Option<DateTime<Utc>>,
    /// Preview flag, when previews were requested
    pub is_preview: Option<bool>,
    /// Preview completion, when previews were requested
    pub preview_completion: Option<f64>,
}

/// One (label, step) row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    /// Experiment name or custom run id
    pub label: String,
    /// Backend id of the run
    pub run_id: String,
    /// Step
    pub step: f64,
    /// One cell per attribute, `None` where the attribute has no point
    pub cells: Vec<Option<SeriesCell>>,
}

/// Series points of several attributes, aligned by step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesTable {
    index_name: String,
    attributes: Vec<String>,
    include_time: bool,
    include_previews: bool,
    rows: Vec<SeriesRow>,
    warnings: Vec<Warning>,
}

impl SeriesTable {
    /// Align assembled series into rows.
    ///
    /// Rows are ordered by label, run id, then step. Where a step holds
    /// several points of one attribute (a preview ahead of its committed
    /// point), the cell takes the last, authoritative one.
    #[must_use]
    pub fn from_series(
        container: ContainerType,
        attributes: Vec<String>,
        series: Vec<RunSeries>,
        include_time: bool,
        include_previews: bool,
    ) -> Self {
        let column_of: FxHashMap<&str, usize> = attributes
            .iter()
            .enumerate()
            .map(|(i, a)| (a.as_str(), i))
            .collect();
        let mut rows: Vec<SeriesRow> = Vec::new();
        let mut row_of: FxHashMap<(String, u64), usize> = FxHashMap::default();

        for s in series {
            let Some(&column) = column_of.get(s.attribute.as_str()) else {
                continue;
            };
            for point in s.points {
                let key = (s.run.run_id().to_string(), point.step().to_bits());
                let row = *row_of.entry(key).or_insert_with(|| {
                    rows.push(SeriesRow {
                        label: s.run.label(container).to_string(),
                        run_id: s.run.run_id().to_string(),
                        step: point.step(),
                        cells: vec![None; attributes.len()],
                    });
                    rows.len() - 1
                });
                rows[row].cells[column] = Some(Self::cell(&point, include_time, include_previews));
            }
        }

        rows.sort_by(|a, b| {
            a.label
                .cmp(&b.label)
                .then_with(|| a.run_id.cmp(&b.run_id))
                .then_with(|| a.step.total_cmp(&b.step))
        });
        Self {
            index_name: container.index_name().to_string(),
            attributes,
            include_time,
            include_previews,
            rows,
            warnings: Vec::new(),
        }
    }

    /// Attach soft conditions hit while fetching.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<Warning>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Soft conditions hit while fetching.
    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    fn cell(point: &SeriesPoint, include_time: bool, include_previews: bool) -> SeriesCell {
        SeriesCell {
            value: point.value().clone(),
            timestamp: include_time.then(|| point.timestamp()),
            is_preview: include_previews.then(|| point.is_preview()),
            preview_completion: include_previews.then(|| point.preview_completion()),
        }
    }

    /// Name of the label index.
    #[must_use]
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Attribute columns, in order.
    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Whether cells carry timestamps.
    #[must_use]
    pub const fn include_time(&self) -> bool {
        self.include_time
    }

    /// Whether cells carry preview sub-columns.
    #[must_use]
    pub const fn include_previews(&self) -> bool {
        self.include_previews
    }

    /// Rows in table order.
    #[must_use]
    pub fn rows(&self) -> &[SeriesRow] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell of `attribute` at (`label`, `step`).
    #[must_use]
    pub fn get(&self, label: &str, step: f64, attribute: &str) -> Option<&SeriesCell> {
        let column = self.attributes.iter().position(|a| a == attribute)?;
        self.rows
            .iter()
            .find(|r| r.label == label && r.step.total_cmp(&step) == Ordering::Equal)?
            .cells
            .get(column)?
            .as_ref()
    }

    /// Steps present for `label`, ascending.
    #[must_use]
    pub fn steps(&self, label: &str) -> Vec<f64> {
        self.rows
            .iter()
            .filter(|r| r.label == label)
            .map(|r| r.step)
            .collect()
    }
}
