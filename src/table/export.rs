//! Arrow, Parquet and JSON export of result tables
//!
//! Key columns lead: the row label (named after the index), then the
//! custom run id for experiment tables, then the sort key unless it is
//! already an attribute column. Attribute columns follow under their flat
//! names (`header` or `header:aggregation`).

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, ListBuilder, StringArray, StringBuilder,
    TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use serde_json::{Map, Value as Json};

use super::{ResultTable, SeriesTable};
use crate::attribute::{sys, AttributeType, Value};
use crate::experiment::{ContainerType, SeriesValue};
use crate::Result;

const UTC: &str = "UTC";

/// Cell type after series reduction.
const fn scalar_type(t: AttributeType) -> AttributeType {
    match t {
        AttributeType::FloatSeries => AttributeType::Float,
        AttributeType::StringSeries => AttributeType::String,
        other => other,
    }
}

fn data_type(t: AttributeType) -> DataType {
    match scalar_type(t) {
        AttributeType::Int => DataType::Int64,
        AttributeType::Bool => DataType::Boolean,
        AttributeType::Datetime => DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into())),
        AttributeType::StringSet => {
            DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)))
        }
        AttributeType::String | AttributeType::StringSeries => DataType::Utf8,
        AttributeType::Float | AttributeType::FloatSeries => DataType::Float64,
    }
}

fn build_array(t: AttributeType, cells: &[Option<&Value>]) -> ArrayRef {
    match scalar_type(t) {
        AttributeType::Int => Arc::new(
            cells
                .iter()
                .map(|c| match c {
                    Some(Value::Int(v)) => Some(*v),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        AttributeType::Bool => Arc::new(
            cells
                .iter()
                .map(|c| match c {
                    Some(Value::Bool(v)) => Some(*v),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        ),
        AttributeType::Datetime => Arc::new(
            cells
                .iter()
                .map(|c| match c {
                    Some(Value::Datetime(v)) => Some(v.timestamp_micros()),
                    _ => None,
                })
                .collect::<TimestampMicrosecondArray>()
                .with_timezone(UTC),
        ),
        AttributeType::StringSet => {
            let mut builder = ListBuilder::new(StringBuilder::new());
            for c in cells {
                match c {
                    Some(Value::StringSet(items)) => {
                        for item in items {
                            builder.values().append_value(item);
                        }
                        builder.append(true);
                    }
                    _ => builder.append(false),
                }
            }
            Arc::new(builder.finish())
        }
        AttributeType::String | AttributeType::StringSeries => Arc::new(
            cells
                .iter()
                .map(|c| c.and_then(Value::as_str))
                .collect::<StringArray>(),
        ),
        AttributeType::Float | AttributeType::FloatSeries => Arc::new(
            cells
                .iter()
                .map(|c| c.and_then(Value::as_f64))
                .collect::<Float64Array>(),
        ),
    }
}

fn json_of(value: &Value) -> Json {
    match value {
        Value::Float(v) => Json::from(*v),
        Value::Int(v) => Json::from(*v),
        Value::String(v) => Json::from(v.as_str()),
        Value::Bool(v) => Json::from(*v),
        Value::Datetime(v) => Json::from(v.to_rfc3339()),
        Value::StringSet(v) => Json::from(v.iter().cloned().collect::<Vec<_>>()),
        Value::FloatSeries(a) => Json::from(a.last),
        Value::StringSeries(a) => Json::from(a.last.as_str()),
    }
}

fn series_json(value: &SeriesValue) -> Json {
    match value {
        SeriesValue::Float(v) => Json::from(*v),
        SeriesValue::String(v) => Json::from(v.as_str()),
    }
}

impl ResultTable {
    /// Whether the sort key needs a column of its own: not when it is
    /// already an attribute column or a key column.
    fn sort_key_exported(&self) -> bool {
        let name = self.sort.attribute.name();
        let is_key = name == self.index_name()
            || (self.container == ContainerType::Experiment && name == sys::CUSTOM_RUN_ID);
        !is_key && self.column_index(name, self.sort.attribute.aggregation()).is_none()
    }

    /// Convert to one Arrow record batch.
    ///
    /// # Errors
    ///
    /// `Arrow` if the batch cannot be assembled.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = vec![Field::new(self.index_name(), DataType::Utf8, false)];
        let mut arrays: Vec<ArrayRef> = vec![Arc::new(
            self.rows.iter().map(|r| Some(r.label.as_str())).collect::<StringArray>(),
        )];

        if self.container == ContainerType::Experiment {
            fields.push(Field::new(sys::CUSTOM_RUN_ID, DataType::Utf8, false));
            arrays.push(Arc::new(
                self.rows
                    .iter()
                    .map(|r| Some(r.custom_run_id.as_str()))
                    .collect::<StringArray>(),
            ));
        }

        if self.sort_key_exported() {
            let cells: Vec<Option<&Value>> = self.rows.iter().map(|r| r.sort_value.as_ref()).collect();
            let t = self
                .sort
                .attribute
                .attribute_type()
                .or_else(|| cells.iter().flatten().next().map(|v| v.attribute_type()))
                .unwrap_or(AttributeType::String);
            fields.push(Field::new(self.sort.attribute.name(), data_type(t), true));
            arrays.push(build_array(t, &cells));
        }

        for (i, column) in self.columns.iter().enumerate() {
            let cells: Vec<Option<&Value>> = self.column_cells(i).collect();
            fields.push(Field::new(column.flat_name(), data_type(column.key.attribute_type), true));
            arrays.push(build_array(column.key.attribute_type, &cells));
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }

    /// Write the table as a Parquet file.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be created, `Arrow` or `Parquet` if encoding
    /// fails.
    #[cfg(feature = "parquet")]
    pub fn write_parquet(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let batch = self.to_record_batch()?;
        let file = std::fs::File::create(path.as_ref())?;
        let mut writer = parquet::arrow::ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        tracing::debug!(path = %path.as_ref().display(), rows = batch.num_rows(), "wrote parquet");
        Ok(())
    }

    /// Records-oriented JSON: one object per row keyed by column name.
    ///
    /// # Errors
    ///
    /// `Serialization` if rendering fails.
    pub fn to_json(&self) -> Result<String> {
        let records: Vec<Json> = self
            .rows
            .iter()
            .enumerate()
            .map(|(r, key)| {
                let mut record = Map::new();
                record.insert(self.index_name().to_string(), Json::from(key.label.as_str()));
                if self.container == ContainerType::Experiment {
                    record.insert(sys::CUSTOM_RUN_ID.to_string(), Json::from(key.custom_run_id.as_str()));
                }
                if self.sort_key_exported() {
                    record.insert(
                        self.sort.attribute.name().to_string(),
                        key.sort_value.as_ref().map_or(Json::Null, json_of),
                    );
                }
                for (c, column) in self.columns.iter().enumerate() {
                    record.insert(
                        column.flat_name(),
                        self.cell(r, c).map_or(Json::Null, json_of),
                    );
                }
                Json::Object(record)
            })
            .collect();
        Ok(serde_json::to_string(&records)?)
    }
}

impl SeriesTable {
    /// Convert to one Arrow record batch: index, `step`, then per attribute
    /// its value column and any requested `:timestamp`, `:is_preview`,
    /// `:preview_completion` columns.
    ///
    /// Value columns are `Float64` when every point is numeric, else `Utf8`.
    ///
    /// # Errors
    ///
    /// `Arrow` if the batch cannot be assembled.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let rows = self.rows();
        let mut fields = vec![
            Field::new(self.index_name(), DataType::Utf8, false),
            Field::new("step", DataType::Float64, false),
        ];
        let mut arrays: Vec<ArrayRef> = vec![
            Arc::new(rows.iter().map(|r| Some(r.label.as_str())).collect::<StringArray>()),
            Arc::new(rows.iter().map(|r| Some(r.step)).collect::<Float64Array>()),
        ];

        for (i, attribute) in self.attributes().iter().enumerate() {
            let cells: Vec<_> = rows.iter().map(|r| r.cells.get(i).and_then(Option::as_ref)).collect();
            let numeric = cells
                .iter()
                .flatten()
                .all(|c| matches!(c.value, SeriesValue::Float(_)));
            if numeric {
                fields.push(Field::new(attribute, DataType::Float64, true));
                arrays.push(Arc::new(
                    cells
                        .iter()
                        .map(|c| c.and_then(|c| c.value.as_f64()))
                        .collect::<Float64Array>(),
                ));
            } else {
                fields.push(Field::new(attribute, DataType::Utf8, true));
                arrays.push(Arc::new(
                    cells
                        .iter()
                        .map(|c| {
                            c.map(|c| match &c.value {
                                SeriesValue::String(s) => s.clone(),
                                SeriesValue::Float(v) => v.to_string(),
                            })
                        })
                        .collect::<StringArray>(),
                ));
            }
            if self.include_time() {
                fields.push(Field::new(
                    format!("{attribute}:timestamp"),
                    DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into())),
                    true,
                ));
                arrays.push(Arc::new(
                    cells
                        .iter()
                        .map(|c| c.and_then(|c| c.timestamp).map(|t| t.timestamp_micros()))
                        .collect::<TimestampMicrosecondArray>()
                        .with_timezone(UTC),
                ));
            }
            if self.include_previews() {
                fields.push(Field::new(format!("{attribute}:is_preview"), DataType::Boolean, true));
                arrays.push(Arc::new(
                    cells
                        .iter()
                        .map(|c| c.and_then(|c| c.is_preview))
                        .collect::<BooleanArray>(),
                ));
                fields.push(Field::new(
                    format!("{attribute}:preview_completion"),
                    DataType::Float64,
                    true,
                ));
                arrays.push(Arc::new(
                    cells
                        .iter()
                        .map(|c| c.and_then(|c| c.preview_completion))
                        .collect::<Float64Array>(),
                ));
            }
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }

    /// Records-oriented JSON, one object per (label, step).
    ///
    /// # Errors
    ///
    /// `Serialization` if rendering fails.
    pub fn to_json(&self) -> Result<String> {
        let records: Vec<Json> = self
            .rows()
            .iter()
            .map(|row| {
                let mut record = Map::new();
                record.insert(self.index_name().to_string(), Json::from(row.label.as_str()));
                record.insert("step".to_string(), Json::from(row.step));
                for (attribute, cell) in self.attributes().iter().zip(&row.cells) {
                    record.insert(
                        attribute.clone(),
                        cell.as_ref().map_or(Json::Null, |c| series_json(&c.value)),
                    );
                }
                Json::Object(record)
            })
            .collect();
        Ok(serde_json::to_string(&records)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeDefinition, AttributeSelection, AttributeValue};
    use crate::experiment::RunRecord;
    use crate::table::TableBuilder;
    use crate::transport::{ListedRun, SortSpec};
    use arrow::array::Array;
    use chrono::{TimeZone, Utc};

    fn table() -> ResultTable {
        let listed = vec![
            ListedRun {
                record: RunRecord::builder("R1", "c1").experiment_head("a").build(),
                sort_value: Some(Value::Datetime(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())),
            },
            ListedRun {
                record: RunRecord::builder("R2", "c2").experiment_head("b").build(),
                sort_value: None,
            },
        ];
        let defs = [
            AttributeDefinition::new("lr", AttributeType::Float),
            AttributeDefinition::new("sys/tags", AttributeType::StringSet),
        ];
        let values = [
            AttributeValue::new("R1", "lr", Value::Float(0.1)),
            AttributeValue::new("R2", "sys/tags", Value::StringSet(["x".to_string()].into())),
        ];
        TableBuilder::new(ContainerType::Experiment, SortSpec::default())
            .build(listed, &defs, &AttributeSelection::names(["lr", "sys/tags"]), &values, Vec::new())
            .unwrap()
    }

    #[test]
    fn test_record_batch_layout() {
        let batch = table().to_record_batch().unwrap();
        let names: Vec<&str> = batch.schema_ref().fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(
            names,
            vec!["experiment", "sys/custom_run_id", "sys/creation_time", "lr", "sys/tags"]
        );
        assert_eq!(batch.num_rows(), 2);
        let lr = batch.column(3).as_any().downcast_ref::<Float64Array>().unwrap();
        assert!((lr.value(0) - 0.1).abs() < f64::EPSILON);
        assert!(lr.is_null(1));
    }

    #[test]
    fn test_json_records() {
        let json: serde_json::Value = serde_json::from_str(&table().to_json().unwrap()).unwrap();
        assert_eq!(json[0]["experiment"], "a");
        assert_eq!(json[0]["lr"], 0.1);
        assert!(json[0]["sys/tags"].is_null());
        assert_eq!(json[1]["sys/tags"][0], "x");
    }

    #[test]
    fn test_custom_id_sort_key_exported_once() {
        let listed = vec![ListedRun {
            record: RunRecord::builder("R1", "c1").experiment_head("a").build(),
            sort_value: Some(Value::String("c1".into())),
        }];
        let sort = SortSpec::new(
            crate::attribute::Attribute::typed(sys::CUSTOM_RUN_ID, AttributeType::String),
            crate::transport::SortDirection::Asc,
        );
        let table = TableBuilder::new(ContainerType::Experiment, sort)
            .build(listed, &[], &AttributeSelection::none(), &[], Vec::new())
            .unwrap();
        let batch = table.to_record_batch().unwrap();
        let names: Vec<&str> = batch.schema_ref().fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["experiment", "sys/custom_run_id"]);

        let json: serde_json::Value = serde_json::from_str(&table.to_json().unwrap()).unwrap();
        assert_eq!(json[0]["sys/custom_run_id"], "c1");
        assert_eq!(json[0].as_object().unwrap().len(), 2);
    }

    #[cfg(feature = "parquet")]
    #[test]
    fn test_write_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.parquet");
        table().write_parquet(&path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
