//! Result tables
//!
//! Toyota Way: Poka-Yoke. A column path that resolves to several types
//! is an error unless type suffixes are requested, so two different
//! attributes never silently share a column.
//!
//! A [`ResultTable`] has one row per listed experiment or run. Each row
//! carries its keys (label, custom run id, experiment name, sort value)
//! whatever the attribute selection, and one cell per attribute column.
//! Missing values are `None`, never a dropped row or column.

pub mod export;
mod series;

pub use series::{SeriesCell, SeriesRow, SeriesTable};

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attribute::{
    Aggregation, AttributeDefinition, AttributeSelection, AttributeType, AttributeValue, Value,
};
use crate::experiment::ContainerType;
use crate::transport::{ListedRun, SortDirection, SortSpec};
use crate::{Error, Result, Warning};

/// Column header layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderStyle {
    /// One header per column: the attribute path
    Flat,
    /// `(attribute, aggregation)` pairs; scalar columns get an empty
    /// aggregation
    TwoLevel,
}

/// Identity of an attribute column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnKey {
    /// Attribute path
    pub attribute: String,
    /// Series aggregation, `None` for scalars
    pub aggregation: Option<Aggregation>,
    /// Backend type of the attribute
    pub attribute_type: AttributeType,
}

/// One attribute column and its rendered header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column identity
    pub key: ColumnKey,
    /// Top-level header
    pub header: String,
    /// Aggregation header, present in two-level layout
    pub sub_header: Option<String>,
}

impl Column {
    /// Single-string header: `header` or `header:sub_header`.
    #[must_use]
    pub fn flat_name(&self) -> String {
        match self.sub_header.as_deref() {
            None | Some("") => self.header.clone(),
            Some(sub) => format!("{}:{sub}", self.header),
        }
    }
}

/// Keys of one row. Always populated, whatever the attribute selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowKey {
    /// Backend id
    pub run_id: String,
    /// Index label: experiment name or custom run id
    pub label: String,
    /// Custom run id
    pub custom_run_id: String,
    /// Experiment name, if any
    pub experiment_name: Option<String>,
    /// Value of the sort key, if the row has it
    pub sort_value: Option<Value>,
}

/// Tabular result of an experiments or runs fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    container: ContainerType,
    sort: SortSpec,
    rows: Vec<RowKey>,
    columns: Vec<Column>,
    cells: Vec<Vec<Option<Value>>>,
    header_style: HeaderStyle,
    warnings: Vec<Warning>,
}

impl ResultTable {
    /// Name of the row index (`experiment` or `run`).
    #[must_use]
    pub const fn index_name(&self) -> &'static str {
        self.container.index_name()
    }

    /// Listing kind.
    #[must_use]
    pub const fn container(&self) -> ContainerType {
        self.container
    }

    /// Sort key the rows are ordered by.
    #[must_use]
    pub const fn sort(&self) -> &SortSpec {
        &self.sort
    }

    /// Row keys, in table order.
    #[must_use]
    pub fn rows(&self) -> &[RowKey] {
        &self.rows
    }

    /// Row labels, in table order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.label.as_str())
    }

    /// Attribute columns, in table order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Header layout.
    #[must_use]
    pub const fn header_style(&self) -> HeaderStyle {
        self.header_style
    }

    /// Soft conditions hit while fetching.
    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
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

    /// Cell at (`row`, `column`) positions.
    #[must_use]
    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.cells.get(row)?.get(column)?.as_ref()
    }

    /// Cells of column `column`, top to bottom.
    pub fn column_cells(&self, column: usize) -> impl Iterator<Item = Option<&Value>> {
        self.cells
            .iter()
            .map(move |r| r.get(column).and_then(Option::as_ref))
    }

    /// Position of the column for `attribute` and `aggregation`.
    ///
    /// `aggregation` is ignored for scalar columns; for series `None`
    /// means `last`.
    #[must_use]
    pub fn column_index(&self, attribute: &str, aggregation: Option<Aggregation>) -> Option<usize> {
        self.columns.iter().position(|c| {
            c.key.attribute == attribute
                && match c.key.aggregation {
                    None => true,
                    Some(a) => a == aggregation.unwrap_or(Aggregation::Last),
                }
        })
    }

    /// Value of `attribute` (its `last` aggregate for series) at the row
    /// labelled `label`.
    #[must_use]
    pub fn get(&self, label: &str, attribute: &str) -> Option<&Value> {
        self.get_aggregated(label, attribute, None)
    }

    /// Value of `attribute` under `aggregation` at the row labelled `label`.
    #[must_use]
    pub fn get_aggregated(
        &self,
        label: &str,
        attribute: &str,
        aggregation: Option<Aggregation>,
    ) -> Option<&Value> {
        let row = self.rows.iter().position(|r| r.label == label)?;
        let column = self.column_index(attribute, aggregation)?;
        self.cell(row, column)
    }
}

/// Assembles a [`ResultTable`] from listed rows and fetched values.
#[derive(Debug, Clone)]
pub struct TableBuilder {
    container: ContainerType,
    sort: SortSpec,
    type_suffix: bool,
}

impl TableBuilder {
    /// Builder for `container` rows ordered by `sort`.
    #[must_use]
    pub const fn new(container: ContainerType, sort: SortSpec) -> Self {
        Self {
            container,
            sort,
            type_suffix: false,
        }
    }

    /// Suffix every header with `:type`.
    #[must_use]
    pub const fn type_suffix_in_column_names(mut self, enabled: bool) -> Self {
        self.type_suffix = enabled;
        self
    }

    fn column_keys(
        definitions: &[AttributeDefinition],
        selection: &AttributeSelection,
    ) -> BTreeSet<ColumnKey> {
        let mut keys = BTreeSet::new();
        for def in definitions {
            if def.attribute_type.is_series() {
                for agg in selection.aggregations_for(def) {
                    keys.insert(ColumnKey {
                        attribute: def.name.clone(),
                        aggregation: Some(agg),
                        attribute_type: def.attribute_type,
                    });
                }
            } else {
                keys.insert(ColumnKey {
                    attribute: def.name.clone(),
                    aggregation: None,
                    attribute_type: def.attribute_type,
                });
            }
        }
        keys
    }

    fn check_ambiguity(&self, keys: &BTreeSet<ColumnKey>) -> Result<()> {
        if self.type_suffix {
            return Ok(());
        }
        let mut types: BTreeMap<&str, BTreeSet<AttributeType>> = BTreeMap::new();
        for k in keys {
            types.entry(&k.attribute).or_default().insert(k.attribute_type);
        }
        match types.into_iter().find(|(_, t)| t.len() > 1) {
            Some((attribute, t)) => Err(Error::AmbiguousColumnType {
                attribute: attribute.to_string(),
                types: t
                    .iter()
                    .map(|t| t.backend_name())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
            None => Ok(()),
        }
    }

    fn header_style(keys: &BTreeSet<ColumnKey>) -> HeaderStyle {
        let mut per_path: FxHashMap<(&str, AttributeType), usize> = FxHashMap::default();
        for k in keys {
            *per_path.entry((&k.attribute, k.attribute_type)).or_default() += 1;
        }
        if per_path.values().any(|&n| n > 1) {
            HeaderStyle::TwoLevel
        } else {
            HeaderStyle::Flat
        }
    }

    fn compare_rows(&self, a: &RowKey, b: &RowKey) -> Ordering {
        let by_value = match (&a.sort_value, &b.sort_value) {
            (Some(x), Some(y)) => match self.sort.direction {
                SortDirection::Asc => x.sort_cmp(y),
                SortDirection::Desc => y.sort_cmp(x),
            },
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_value
            .then_with(|| a.label.cmp(&b.label))
            .then_with(|| a.run_id.cmp(&b.run_id))
    }

    /// Build the table.
    ///
    /// Columns come from `definitions` as selected by `selection` (one per
    /// requested aggregation for series), ordered by path then
    /// aggregation. Rows are stably sorted by sort value (missing values
    /// last), then label, then run id.
    ///
    /// # Errors
    ///
    /// `AmbiguousColumnType` when one path has several types and type
    /// suffixes are off.
    pub fn build(
        &self,
        listed: Vec<ListedRun>,
        definitions: &[AttributeDefinition],
        selection: &AttributeSelection,
        values: &[AttributeValue],
        warnings: Vec<Warning>,
    ) -> Result<ResultTable> {
        let keys = Self::column_keys(definitions, selection);
        self.check_ambiguity(&keys)?;
        let header_style = Self::header_style(&keys);

        let columns: Vec<Column> = keys
            .into_iter()
            .map(|key| {
                let header = if self.type_suffix {
                    format!("{}:{}", key.attribute, key.attribute_type.api_name())
                } else {
                    key.attribute.clone()
                };
                let sub_header = match header_style {
                    HeaderStyle::Flat => None,
                    HeaderStyle::TwoLevel => {
                        Some(key.aggregation.map_or("", Aggregation::name).to_string())
                    }
                };
                Column {
                    key,
                    header,
                    sub_header,
                }
            })
            .collect();

        let rows: Vec<RowKey> = listed
            .into_iter()
            .map(|r| RowKey {
                label: r.record.label(self.container).to_string(),
                run_id: r.record.run_id().to_string(),
                custom_run_id: r.record.custom_run_id().to_string(),
                experiment_name: r.record.experiment_name().map(str::to_string),
                sort_value: r.sort_value,
            })
            .collect();

        let mut cells: Vec<Vec<Option<Value>>> = vec![vec![None; columns.len()]; rows.len()];
        let row_of: FxHashMap<&str, usize> = rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.run_id.as_str(), i))
            .collect();
        let mut columns_of: FxHashMap<(&str, AttributeType), Vec<usize>> = FxHashMap::default();
        for (i, c) in columns.iter().enumerate() {
            columns_of
                .entry((&c.key.attribute, c.key.attribute_type))
                .or_default()
                .push(i);
        }
        for v in values {
            let Some(&row) = row_of.get(v.run_id.as_str()) else {
                continue;
            };
            let Some(targets) = columns_of.get(&(v.definition.name.as_str(), v.definition.attribute_type))
            else {
                continue;
            };
            for &c in targets {
                cells[row][c] = v.value.cell(columns[c].key.aggregation);
            }
        }

        let mut paired: Vec<(RowKey, Vec<Option<Value>>)> = rows.into_iter().zip(cells).collect();
        paired.sort_by(|(a, _), (b, _)| self.compare_rows(a, b));
        let (rows, cells): (Vec<_>, Vec<_>) = paired.into_iter().unzip();

        debug!(
            rows = rows.len(),
            columns = columns.len(),
            header_style = ?header_style,
            "built result table"
        );
        Ok(ResultTable {
            container: self.container,
            sort: self.sort.clone(),
            rows,
            columns,
            cells,
            header_style,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeFilter, FloatSeriesAggregations};
    use crate::experiment::RunRecord;

    fn listed(id: &str, exp: &str, sort: Option<f64>) -> ListedRun {
        ListedRun {
            record: RunRecord::builder(id, format!("c-{id}")).experiment_head(exp).build(),
            sort_value: sort.map(Value::Float),
        }
    }

    fn float_sort(direction: SortDirection) -> SortSpec {
        SortSpec::new(crate::attribute::Attribute::typed("score", AttributeType::Float), direction)
    }

    #[test]
    fn test_rows_sorted_with_missing_last() {
        let builder = TableBuilder::new(ContainerType::Experiment, float_sort(SortDirection::Desc));
        let table = builder
            .build(
                vec![
                    listed("R1", "a", Some(0.1)),
                    listed("R2", "b", None),
                    listed("R3", "c", Some(0.9)),
                ],
                &[],
                &AttributeSelection::none(),
                &[],
                Vec::new(),
            )
            .unwrap();
        let labels: Vec<&str> = table.labels().collect();
        assert_eq!(labels, vec!["c", "a", "b"]);
        assert_eq!(table.index_name(), "experiment");
        assert!(table.columns().is_empty());
        assert_eq!(table.rows()[0].custom_run_id, "c-R3");
    }

    #[test]
    fn test_ties_break_by_label() {
        let builder = TableBuilder::new(ContainerType::Experiment, float_sort(SortDirection::Asc));
        let table = builder
            .build(
                vec![listed("R1", "zeta", Some(1.0)), listed("R2", "alpha", Some(1.0))],
                &[],
                &AttributeSelection::none(),
                &[],
                Vec::new(),
            )
            .unwrap();
        let labels: Vec<&str> = table.labels().collect();
        assert_eq!(labels, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_ambiguous_column_type() {
        let defs = [
            AttributeDefinition::new("x", AttributeType::Float),
            AttributeDefinition::new("x", AttributeType::String),
        ];
        let selection = AttributeSelection::names(["x"]);
        let builder = TableBuilder::new(ContainerType::Run, SortSpec::default());
        let err = builder
            .build(vec![], &defs, &selection, &[], Vec::new())
            .unwrap_err();
        assert!(matches!(err, Error::AmbiguousColumnType { .. }));

        let table = builder
            .type_suffix_in_column_names(true)
            .build(vec![], &defs, &selection, &[], Vec::new())
            .unwrap();
        let headers: Vec<&str> = table.columns().iter().map(|c| c.header.as_str()).collect();
        assert_eq!(headers, vec!["x:float", "x:string"]);
    }

    #[test]
    fn test_two_level_headers_for_multiple_aggregations() {
        let defs = [
            AttributeDefinition::new("loss", AttributeType::FloatSeries),
            AttributeDefinition::new("lr", AttributeType::Float),
        ];
        let selection: AttributeSelection = AttributeFilter::names(["loss", "lr"])
            .with_aggregations([Aggregation::Min, Aggregation::Last])
            .unwrap()
            .into();
        let aggs = FloatSeriesAggregations::from_values(&[0.5, 0.2, 0.3]).unwrap();
        let values = [
            AttributeValue::new("R1", "loss", Value::FloatSeries(aggs)),
            AttributeValue::new("R1", "lr", Value::Float(0.01)),
        ];
        let table = TableBuilder::new(ContainerType::Experiment, SortSpec::default())
            .build(vec![listed("R1", "exp", None)], &defs, &selection, &values, Vec::new())
            .unwrap();
        assert_eq!(table.header_style(), HeaderStyle::TwoLevel);
        let names: Vec<String> = table.columns().iter().map(Column::flat_name).collect();
        assert_eq!(names, vec!["loss:last", "loss:min", "lr"]);
        assert_eq!(table.get("exp", "loss"), Some(&Value::Float(0.3)));
        assert_eq!(
            table.get_aggregated("exp", "loss", Some(Aggregation::Min)),
            Some(&Value::Float(0.2))
        );
        assert_eq!(table.get("exp", "lr"), Some(&Value::Float(0.01)));
    }

    #[test]
    fn test_missing_value_is_null() {
        let defs = [AttributeDefinition::new("lr", AttributeType::Float)];
        let table = TableBuilder::new(ContainerType::Experiment, SortSpec::default())
            .build(
                vec![listed("R1", "a", None), listed("R2", "b", None)],
                &defs,
                &AttributeSelection::names(["lr"]),
                &[AttributeValue::new("R1", "lr", Value::Float(1.0))],
                Vec::new(),
            )
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("a", "lr"), Some(&Value::Float(1.0)));
        assert_eq!(table.get("b", "lr"), None);
        assert_eq!(table.header_style(), HeaderStyle::Flat);
    }
}
