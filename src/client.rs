//! Top-level list and fetch operations
//!
//! Every operation resolves its context (explicit, then global, then
//! environment), lists matching rows, discovers columns scoped to those
//! rows, fetches values or series, and assembles a table.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use trueno_fetch::attribute::Value;
//! use trueno_fetch::client::{Client, TableRequest};
//! use trueno_fetch::context::Context;
//! use trueno_fetch::experiment::RunRecord;
//! use trueno_fetch::filter::Filter;
//! use trueno_fetch::transport::MemoryBackend;
//!
//! let backend = Arc::new(MemoryBackend::builder("team/vision").build());
//! backend.add_run(RunRecord::builder("RUN-1", "r1").experiment_head("exp_a").build());
//! backend.set_attribute("RUN-1", "params/lr", Value::Float(0.01))?;
//!
//! let client = Client::new(backend)?;
//! let ctx = Context::new().with_project("team/vision")?.with_api_token("token");
//! let table = client.fetch_experiments_table(
//!     &TableRequest::new()
//!         .filter(Filter::name_eq("exp_a"))
//!         .attributes(["params/lr"])
//!         .context(ctx),
//! )?;
//! assert_eq!(table.get("exp_a", "params/lr"), Some(&Value::Float(0.01)));
//! # Ok::<(), trueno_fetch::Error>(())
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info_span};

use crate::attribute::{AttributeSelection, AttributeType};
use crate::config::FetchConfig;
use crate::context::{effective_context, Context, ResolvedContext};
use crate::experiment::ContainerType;
use crate::fetch::{BatchFetcher, Listing};
use crate::filter::Filter;
use crate::series::{SeriesAssembler, SeriesOptions, StepRange};
use crate::table::{ResultTable, SeriesTable, TableBuilder};
use crate::transport::{SortSpec, Transport};
use crate::{Result, Warning};

/// Items returned by a list operation, with the soft conditions hit while
/// listing. A truncated listing carries [`Warning::ResultTruncated`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListResult<T> {
    /// Listed items, in backend order
    pub items: Vec<T>,
    /// Soft conditions hit while listing
    pub warnings: Vec<Warning>,
}

impl<T> ListResult<T> {
    /// Whether the backend returned every match.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::ResultTruncated { .. }))
    }
}

/// Parameters of a table fetch.
#[derive(Debug, Clone)]
pub struct TableRequest {
    filter: Option<Filter>,
    attributes: AttributeSelection,
    sort: SortSpec,
    limit: Option<usize>,
    type_suffix_in_column_names: bool,
    context: Option<Context>,
}

impl Default for TableRequest {
    fn default() -> Self {
        Self {
            filter: None,
            attributes: AttributeSelection::none(),
            sort: SortSpec::default(),
            limit: None,
            type_suffix_in_column_names: false,
            context: None,
        }
    }
}

impl TableRequest {
    /// All rows, no attribute columns, newest first.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Row filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Attribute columns.
    #[must_use]
    pub fn attributes(mut self, attributes: impl Into<AttributeSelection>) -> Self {
        self.attributes = attributes.into();
        self
    }

    /// Sort key and direction.
    #[must_use]
    pub fn sort_by(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    /// Row limit.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Suffix headers with `:type`.
    #[must_use]
    pub const fn type_suffix_in_column_names(mut self, enabled: bool) -> Self {
        self.type_suffix_in_column_names = enabled;
        self
    }

    /// Explicit context for this call.
    #[must_use]
    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }
}

/// Parameters of a series fetch.
#[derive(Debug, Clone)]
pub struct SeriesRequest {
    container: ContainerType,
    filter: Option<Filter>,
    attributes: AttributeSelection,
    options: SeriesOptions,
    include_time: bool,
    context: Option<Context>,
}

impl SeriesRequest {
    /// Series of experiments (their head runs and, by default, lineage).
    #[must_use]
    pub fn experiments(attributes: impl Into<AttributeSelection>) -> Self {
        Self::new(ContainerType::Experiment, attributes)
    }

    /// Series of individual runs.
    #[must_use]
    pub fn runs(attributes: impl Into<AttributeSelection>) -> Self {
        Self::new(ContainerType::Run, attributes)
    }

    fn new(container: ContainerType, attributes: impl Into<AttributeSelection>) -> Self {
        Self {
            container,
            filter: None,
            attributes: attributes.into(),
            options: SeriesOptions::default(),
            include_time: false,
            context: None,
        }
    }

    /// Row filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Step window, `left < step <= right`.
    #[must_use]
    pub const fn step_range(mut self, left: Option<f64>, right: Option<f64>) -> Self {
        self.options.step_range = StepRange::new(left, right);
        self
    }

    /// Follow fork/restart ancestors (default `true`).
    #[must_use]
    pub const fn lineage_to_the_root(mut self, enabled: bool) -> Self {
        self.options.lineage_to_the_root = enabled;
        self
    }

    /// Keep only the last `n` steps per series.
    #[must_use]
    pub const fn tail_limit(mut self, n: usize) -> Self {
        self.options.tail_limit = Some(n);
        self
    }

    /// Keep preview points, with `is_preview`/`preview_completion` columns.
    #[must_use]
    pub const fn include_point_previews(mut self, enabled: bool) -> Self {
        self.options.include_point_previews = enabled;
        self
    }

    /// Add absolute timestamp columns.
    #[must_use]
    pub const fn include_time(mut self, enabled: bool) -> Self {
        self.include_time = enabled;
        self
    }

    /// Explicit context for this call.
    #[must_use]
    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }
}

/// Read-only query client.
#[derive(Debug)]
pub struct Client {
    fetcher: BatchFetcher,
}

impl Client {
    /// Client over `transport` with limits read from the environment.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a malformed override, `Other` if the worker pool
    /// cannot start.
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_config(transport, FetchConfig::from_env()?)
    }

    /// Client over `transport` with explicit limits.
    ///
    /// # Errors
    ///
    /// `Other` if the worker pool cannot start.
    pub fn with_config(transport: Arc<dyn Transport>, config: FetchConfig) -> Result<Self> {
        Ok(Self {
            fetcher: BatchFetcher::new(transport, config)?,
        })
    }

    /// The underlying fetcher.
    #[must_use]
    pub const fn fetcher(&self) -> &BatchFetcher {
        &self.fetcher
    }

    fn list(
        &self,
        ctx: &ResolvedContext,
        container: ContainerType,
        filter: Option<&Filter>,
        sort: &SortSpec,
        limit: Option<usize>,
    ) -> Result<Listing> {
        self.fetcher.list_entries(ctx, container, filter, sort, limit)
    }

    /// Names of experiments matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Context, construction or fetch errors.
    pub fn list_experiments(
        &self,
        filter: Option<&Filter>,
        context: Option<&Context>,
    ) -> Result<ListResult<String>> {
        self.list_labels(ContainerType::Experiment, filter, context)
    }

    /// Custom run ids of runs matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Context, construction or fetch errors.
    pub fn list_runs(
        &self,
        filter: Option<&Filter>,
        context: Option<&Context>,
    ) -> Result<ListResult<String>> {
        self.list_labels(ContainerType::Run, filter, context)
    }

    fn list_labels(
        &self,
        container: ContainerType,
        filter: Option<&Filter>,
        context: Option<&Context>,
    ) -> Result<ListResult<String>> {
        let ctx = effective_context(context)?;
        let listing = self.list(&ctx, container, filter, &SortSpec::default(), None)?;
        Ok(ListResult {
            items: listing
                .rows
                .iter()
                .map(|r| r.record.label(container).to_string())
                .collect(),
            warnings: listing.warnings,
        })
    }

    /// Distinct attribute names selected by `attributes` on the rows
    /// matching `filter`, sorted.
    ///
    /// # Errors
    ///
    /// Context, construction or fetch errors.
    pub fn list_attributes(
        &self,
        container: ContainerType,
        filter: Option<&Filter>,
        attributes: &AttributeSelection,
        context: Option<&Context>,
    ) -> Result<ListResult<String>> {
        let ctx = effective_context(context)?;
        let listing = self.list(&ctx, container, filter, &SortSpec::default(), None)?;
        let defs = self
            .fetcher
            .discover_columns(&ctx, &listing.run_ids(), attributes)?;
        let names: BTreeSet<String> = defs.into_iter().map(|d| d.name).collect();
        Ok(ListResult {
            items: names.into_iter().collect(),
            warnings: listing.warnings,
        })
    }

    /// Table of experiments: one row per experiment, labelled by name.
    ///
    /// An exactly named attribute that none of the rows has still gets a
    /// column, typed `string` unless the selection fixes its type, and
    /// every cell in it is null.
    ///
    /// # Errors
    ///
    /// Context, construction, fetch or `AmbiguousColumnType` errors.
    pub fn fetch_experiments_table(&self, request: &TableRequest) -> Result<ResultTable> {
        self.fetch_table(ContainerType::Experiment, request)
    }

    /// Table of runs: one row per run, labelled by custom run id.
    ///
    /// # Errors
    ///
    /// Context, construction, fetch or `AmbiguousColumnType` errors.
    pub fn fetch_runs_table(&self, request: &TableRequest) -> Result<ResultTable> {
        self.fetch_table(ContainerType::Run, request)
    }

    fn fetch_table(
        &self,
        container: ContainerType,
        request: &TableRequest,
    ) -> Result<ResultTable> {
        let _span = info_span!("fetch_table", container = container.index_name()).entered();
        let ctx = effective_context(request.context.as_ref())?;
        let listing = self.list(
            &ctx,
            container,
            request.filter.as_ref(),
            &request.sort,
            request.limit,
        )?;
        let run_ids = listing.run_ids();
        let mut definitions = self
            .fetcher
            .discover_columns(&ctx, &run_ids, &request.attributes)?;
        let values = self.fetcher.fetch_values(&ctx, &run_ids, &definitions)?;
        let missing = request
            .attributes
            .missing_exact(&definitions, AttributeType::String);
        debug!(
            rows = run_ids.len(),
            attributes = definitions.len(),
            missing = missing.len(),
            values = values.len(),
            "fetched table data"
        );
        definitions.extend(missing);
        TableBuilder::new(container, listing.sort)
            .type_suffix_in_column_names(request.type_suffix_in_column_names)
            .build(
                listing.rows,
                &definitions,
                &request.attributes,
                &values,
                listing.warnings,
            )
    }

    /// Float series, one row per (label, step).
    ///
    /// Exactly named series that no listed row logged keep their column,
    /// filled from ancestors when lineage is followed and null otherwise.
    ///
    /// # Errors
    ///
    /// Context, construction or fetch errors.
    pub fn fetch_metrics(&self, request: &SeriesRequest) -> Result<SeriesTable> {
        self.fetch_series_of(AttributeType::FloatSeries, request)
    }

    /// String series, one row per (label, step).
    ///
    /// # Errors
    ///
    /// Context, construction or fetch errors.
    pub fn fetch_series(&self, request: &SeriesRequest) -> Result<SeriesTable> {
        self.fetch_series_of(AttributeType::StringSeries, request)
    }

    fn fetch_series_of(
        &self,
        kind: AttributeType,
        request: &SeriesRequest,
    ) -> Result<SeriesTable> {
        let _span = info_span!("fetch_series", kind = kind.api_name()).entered();
        let ctx = effective_context(request.context.as_ref())?;
        let listing = self.list(
            &ctx,
            request.container,
            request.filter.as_ref(),
            &SortSpec::default(),
            None,
        )?;
        let mut definitions =
            self.fetcher
                .discover_columns(&ctx, &listing.run_ids(), &request.attributes)?;
        // requested names no row logged may still come from ancestors
        definitions.extend(request.attributes.missing_exact(&definitions, kind));
        let attributes: Vec<String> = definitions
            .into_iter()
            .filter(|d| d.attribute_type == kind)
            .map(|d| d.name)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let runs: Vec<_> = listing.rows.iter().map(|r| r.record.clone()).collect();
        let series = SeriesAssembler::new(&self.fetcher).fetch_many(
            &ctx,
            &runs,
            &attributes,
            &request.options,
        )?;
        Ok(SeriesTable::from_series(
            request.container,
            attributes,
            series,
            request.include_time,
            request.options.include_point_previews,
        )
        .with_warnings(listing.warnings))
    }
}
