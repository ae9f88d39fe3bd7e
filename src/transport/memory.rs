//! In-memory backend implementation using `DashMap`.
//!
//! Answers [`Transport`] calls from data inserted in-process. Queries are
//! parsed and evaluated with [`crate::query::parse`] and
//! [`crate::query::eval`], so filters round-trip through the same query
//! language the hosted backend accepts.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use dashmap::DashMap;

use super::{
    Cursor, ListRequest, ListedRun, Page, SortDirection, Transport, TransportError,
    TransportResult,
};
use crate::attribute::{
    sys, Aggregation, AttributeDefinition, AttributeFilter, AttributeType, AttributeValue,
    FloatSeriesAggregations, StringSeriesAggregations, Value,
};
use crate::context::ResolvedContext;
use crate::experiment::{ContainerType, RunRecord, SeriesPoint, SeriesValue};
use crate::query::{eval, parse};
use crate::series::StepRange;
use crate::{Error, Result};

struct StoredRun {
    record: RunRecord,
    attributes: BTreeMap<String, Value>,
    series: BTreeMap<String, Vec<SeriesPoint>>,
}

/// In-memory stand-in for the hosted tracking backend.
///
/// Thread-safe: all mutators take `&self`, so a backend shared behind an
/// `Arc` can be populated while fetches run.
///
/// # Example
///
/// ```rust
/// use trueno_fetch::attribute::Value;
/// use trueno_fetch::experiment::RunRecord;
/// use trueno_fetch::transport::MemoryBackend;
///
/// let backend = MemoryBackend::builder("team/vision").build();
/// backend.add_run(RunRecord::builder("RUN-1", "r1").experiment_head("exp_a").build());
/// backend.set_attribute("RUN-1", "params/lr", Value::Float(0.01))?;
/// assert_eq!(backend.len(), 1);
/// # Ok::<(), trueno_fetch::Error>(())
/// ```
pub struct MemoryBackend {
    project: String,
    runs: DashMap<String, StoredRun>,
    max_rows: usize,
    definitions_page_size: usize,
    values_page_size: usize,
    fail_next: AtomicUsize,
    calls: AtomicUsize,
}

/// Builder for `MemoryBackend`.
#[derive(Debug)]
pub struct MemoryBackendBuilder {
    project: String,
    max_rows: usize,
    definitions_page_size: usize,
    values_page_size: usize,
}

impl MemoryBackendBuilder {
    /// Create a builder for the given project path.
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            max_rows: usize::MAX,
            definitions_page_size: 1000,
            values_page_size: 10_000,
        }
    }

    /// Cap the rows a listing can ever reach.
    #[must_use]
    pub const fn max_rows(mut self, n: usize) -> Self {
        self.max_rows = n;
        self
    }

    /// Page size for attribute-definition listings.
    #[must_use]
    pub const fn definitions_page_size(mut self, n: usize) -> Self {
        self.definitions_page_size = if n == 0 { 1 } else { n };
        self
    }

    /// Page size for attribute-value fetches.
    #[must_use]
    pub const fn values_page_size(mut self, n: usize) -> Self {
        self.values_page_size = if n == 0 { 1 } else { n };
        self
    }

    /// Build the backend.
    #[must_use]
    pub fn build(self) -> MemoryBackend {
        MemoryBackend {
            project: self.project,
            runs: DashMap::new(),
            max_rows: self.max_rows,
            definitions_page_size: self.definitions_page_size,
            values_page_size: self.values_page_size,
            fail_next: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

impl MemoryBackend {
    /// Create a builder.
    #[must_use]
    pub fn builder(project: impl Into<String>) -> MemoryBackendBuilder {
        MemoryBackendBuilder::new(project)
    }

    /// Number of stored runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Check if the backend holds no runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Transport calls served so far (including injected failures).
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    /// Make the next `n` calls fail with a transient error.
    pub fn fail_next_calls(&self, n: usize) {
        self.fail_next.store(n, AtomicOrdering::SeqCst);
    }

    /// Insert or replace a run. System attributes are derived from the record.
    pub fn add_run(&self, record: RunRecord) {
        let mut attributes = BTreeMap::new();
        attributes.insert(sys::ID.to_string(), Value::String(record.run_id().to_string()));
        attributes.insert(
            sys::CUSTOM_RUN_ID.to_string(),
            Value::String(record.custom_run_id().to_string()),
        );
        attributes.insert(sys::CREATION_TIME.to_string(), Value::Datetime(record.creation_time()));
        if let Some(name) = record.experiment_name() {
            attributes.insert(sys::NAME.to_string(), Value::String(name.to_string()));
        }
        self.runs.insert(
            record.run_id().to_string(),
            StoredRun {
                record,
                attributes,
                series: BTreeMap::new(),
            },
        );
    }

    /// Set a scalar or set-valued attribute on a run.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the run does not exist.
    pub fn set_attribute(&self, run_id: &str, name: impl Into<String>, value: Value) -> Result<()> {
        let mut run = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Error::NotFound(format!("run {run_id}")))?;
        run.attributes.insert(name.into(), value);
        Ok(())
    }

    /// Append points to a run's series and refresh its aggregates.
    ///
    /// Aggregates cover committed points only.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the run does not exist, `InvalidInput` if the
    /// points mix float and string values.
    pub fn log_series(
        &self,
        run_id: &str,
        name: impl Into<String>,
        points: impl IntoIterator<Item = SeriesPoint>,
    ) -> Result<()> {
        let name = name.into();
        let mut run = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Error::NotFound(format!("run {run_id}")))?;
        let series = run.series.entry(name.clone()).or_default();
        series.extend(points);
        series.sort_by(|a, b| a.step().total_cmp(&b.step()));

        let committed: Vec<&SeriesPoint> = series.iter().filter(|p| !p.is_preview()).collect();
        let floats: Vec<f64> = committed.iter().filter_map(|p| p.value().as_f64()).collect();
        let value = if floats.len() == committed.len() {
            FloatSeriesAggregations::from_values(&floats).map(Value::FloatSeries)
        } else if floats.is_empty() {
            committed.last().and_then(|p| match p.value() {
                SeriesValue::String(s) => Some(Value::StringSeries(StringSeriesAggregations {
                    last: s.clone(),
                    last_step: p.step(),
                })),
                SeriesValue::Float(_) => None,
            })
        } else {
            return Err(Error::InvalidInput(format!(
                "series {name} on run {run_id} mixes float and string values"
            )));
        };
        if let Some(v) = value {
            run.attributes.insert(name, v);
        }
        Ok(())
    }

    fn begin_call(&self, ctx: &ResolvedContext) -> TransportResult<()> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        if self
            .fail_next
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Transient("injected failure".to_string()));
        }
        if ctx.api_token().is_empty() {
            return Err(TransportError::Unauthorized("empty API token".to_string()));
        }
        if ctx.project() != self.project {
            return Err(TransportError::NotFound(format!("project {}", ctx.project())));
        }
        Ok(())
    }
}

fn offset_of(cursor: Option<&Cursor>) -> TransportResult<usize> {
    cursor.map_or(Ok(0), |c| {
        c.as_str()
            .parse()
            .map_err(|_| TransportError::Fatal(format!("bad cursor {}", c.as_str())))
    })
}

fn paginate<T: Clone>(items: &[T], offset: usize, size: usize) -> Page<T> {
    let start = offset.min(items.len());
    let end = start.saturating_add(size).min(items.len());
    Page {
        items: items[start..end].to_vec(),
        next_cursor: (end < items.len()).then(|| Cursor::new(end.to_string())),
    }
}

fn sort_value(
    attributes: &BTreeMap<String, Value>,
    name: &str,
    attribute_type: Option<AttributeType>,
    aggregation: Option<Aggregation>,
) -> Option<Value> {
    let v = attributes.get(name)?;
    if attribute_type.is_some_and(|t| t != v.attribute_type()) {
        return None;
    }
    v.cell(aggregation.or(Some(Aggregation::Last)))
}

impl Transport for MemoryBackend {
    fn list_page(
        &self,
        ctx: &ResolvedContext,
        request: &ListRequest,
        cursor: Option<&Cursor>,
    ) -> TransportResult<Page<ListedRun>> {
        self.begin_call(ctx)?;
        let offset = offset_of(cursor)?;
        let expr = request
            .query
            .as_deref()
            .map(parse::parse)
            .transpose()
            .map_err(|e| TransportError::Fatal(e.to_string()))?;
        let sort = &request.sort.attribute;

        let mut rows: Vec<ListedRun> = self
            .runs
            .iter()
            .filter(|r| match request.container {
                ContainerType::Experiment => r.record.is_head() && r.record.experiment_name().is_some(),
                ContainerType::Run => true,
            })
            .filter(|r| expr.as_ref().map_or(true, |e| eval::evaluate(e, &r.attributes)))
            .map(|r| ListedRun {
                record: r.record.clone(),
                sort_value: sort_value(
                    &r.attributes,
                    sort.name(),
                    sort.attribute_type(),
                    sort.aggregation(),
                ),
            })
            .collect();

        rows.sort_by(|a, b| {
            let by_value = match (&a.sort_value, &b.sort_value) {
                (Some(x), Some(y)) => match request.sort.direction {
                    SortDirection::Asc => x.sort_cmp(y),
                    SortDirection::Desc => y.sort_cmp(x),
                },
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            by_value.then_with(|| a.record.run_id().cmp(b.record.run_id()))
        });

        let total = rows.len();
        rows.truncate(self.max_rows);
        let mut page = paginate(&rows, offset, request.page_size.max(1));
        // rows past the cap still count, so callers can see the listing was cut
        let served_to = offset.saturating_add(page.items.len());
        page.next_cursor = (served_to < total && !page.items.is_empty())
            .then(|| Cursor::new(served_to.to_string()));
        Ok(page)
    }

    fn list_attribute_definitions(
        &self,
        ctx: &ResolvedContext,
        run_ids: &[String],
        filter: &AttributeFilter,
        cursor: Option<&Cursor>,
    ) -> TransportResult<Page<AttributeDefinition>> {
        self.begin_call(ctx)?;
        let offset = offset_of(cursor)?;
        let mut defs = BTreeSet::new();
        let mut collect = |run: &StoredRun| {
            defs.extend(
                run.attributes
                    .iter()
                    .map(|(name, v)| AttributeDefinition::new(name.clone(), v.attribute_type()))
                    .filter(|d| filter.matches(d)),
            );
        };
        if run_ids.is_empty() {
            self.runs.iter().for_each(|r| collect(r.value()));
        } else {
            for id in run_ids {
                if let Some(run) = self.runs.get(id) {
                    collect(run.value());
                }
            }
        }
        let defs: Vec<AttributeDefinition> = defs.into_iter().collect();
        Ok(paginate(&defs, offset, self.definitions_page_size))
    }

    fn fetch_attribute_values(
        &self,
        ctx: &ResolvedContext,
        run_ids: &[String],
        definitions: &[AttributeDefinition],
        cursor: Option<&Cursor>,
    ) -> TransportResult<Page<AttributeValue>> {
        self.begin_call(ctx)?;
        let offset = offset_of(cursor)?;
        let mut values = Vec::new();
        for id in run_ids {
            let Some(run) = self.runs.get(id) else {
                continue;
            };
            for d in definitions {
                if let Some(v) = run.attributes.get(&d.name) {
                    if v.attribute_type() == d.attribute_type {
                        values.push(AttributeValue {
                            run_id: id.clone(),
                            definition: d.clone(),
                            value: v.clone(),
                        });
                    }
                }
            }
        }
        Ok(paginate(&values, offset, self.values_page_size))
    }

    fn get_series(
        &self,
        ctx: &ResolvedContext,
        run_id: &str,
        attribute: &str,
        step_range: StepRange,
    ) -> TransportResult<Vec<SeriesPoint>> {
        self.begin_call(ctx)?;
        let run = self
            .runs
            .get(run_id)
            .ok_or_else(|| TransportError::NotFound(format!("run {run_id}")))?;
        Ok(run
            .series
            .get(attribute)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| step_range.contains(p.step()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_run(&self, ctx: &ResolvedContext, run_id: &str) -> TransportResult<Option<RunRecord>> {
        self.begin_call(ctx)?;
        Ok(self.runs.get(run_id).map(|r| r.record.clone()))
    }
}
