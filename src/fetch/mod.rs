//! Batched, paginated backend fetches
//!
//! Toyota Way Principles:
//! - Jidoka: one batch failing after its retries stops the whole fetch;
//!   a partial table is never returned as complete
//! - Heijunka: fan-out is bounded by a dedicated worker pool of
//!   `max_workers` threads
//!
//! Listing pages are followed sequentially (each cursor comes from the
//! previous page). Column discovery and value fetches are split into
//! independent batches ([`split`]) and run concurrently; results are
//! collected in batch order, so worker completion order never leaks into
//! the output.

pub mod inference;
pub mod retry;
pub mod split;

use std::collections::BTreeSet;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::attribute::{AttributeDefinition, AttributeFilter, AttributeSelection, AttributeValue};
use crate::config::FetchConfig;
use crate::context::ResolvedContext;
use crate::experiment::ContainerType;
use crate::filter::Filter;
use crate::transport::{
    Cursor, ListRequest, ListedRun, Page, SortSpec, Transport, TransportResult,
};
use crate::{Error, Result, Warning};

/// Rows from one logical listing.
#[derive(Debug, Clone)]
pub struct Listing {
    /// Matched rows in backend sort order
    pub rows: Vec<ListedRun>,
    /// Sort key with its type resolved
    pub sort: SortSpec,
    /// Soft conditions hit while listing
    pub warnings: Vec<Warning>,
}

impl Listing {
    /// Backend ids of the listed rows, in order.
    #[must_use]
    pub fn run_ids(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|r| r.record.run_id().to_string())
            .collect()
    }
}

/// Executes paginated, batched reads through a [`Transport`].
pub struct BatchFetcher {
    transport: Arc<dyn Transport>,
    config: FetchConfig,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for BatchFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchFetcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BatchFetcher {
    /// Fetcher with its own pool of `config.max_workers()` threads.
    ///
    /// # Errors
    ///
    /// Returns `Other` if the worker pool cannot be started.
    pub fn new(transport: Arc<dyn Transport>, config: FetchConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_workers())
            .thread_name(|i| format!("trueno-fetch-{i}"))
            .build()
            .map_err(|e| Error::Other(format!("failed to start fetch workers: {e}")))?;
        Ok(Self {
            transport,
            config,
            pool,
        })
    }

    /// Limits in effect.
    #[must_use]
    pub const fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Underlying transport.
    #[must_use]
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Run `op` inside the fetch worker pool.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// One transport call under the retry policy.
    ///
    /// # Errors
    ///
    /// `FetchFailed` once retries are exhausted or on a non-transient error.
    pub fn call<T>(
        &self,
        operation: &'static str,
        page: usize,
        detail: impl FnOnce() -> String,
        mut f: impl FnMut(&dyn Transport) -> TransportResult<T>,
    ) -> Result<T> {
        retry::with_retry(self.config.retry(), operation, page, detail, || {
            f(self.transport.as_ref())
        })
    }

    fn drain<T>(
        &self,
        operation: &'static str,
        batch: usize,
        detail: impl Fn() -> String,
        mut fetch: impl FnMut(&dyn Transport, Option<&Cursor>) -> TransportResult<Page<T>>,
    ) -> Result<Vec<T>> {
        let mut out = Vec::new();
        let mut cursor: Option<Cursor> = None;
        for page_in_batch in 0.. {
            let page = self.call(
                operation,
                batch,
                || format!("{}, page {page_in_batch}", detail()),
                |t| fetch(t, cursor.as_ref()),
            )?;
            let empty = page.items.is_empty();
            out.extend(page.items);
            cursor = page.next_cursor;
            if cursor.is_none() || empty {
                break;
            }
        }
        Ok(out)
    }

    /// List experiments or runs matching `filter`, sorted by `sort`.
    ///
    /// With no `limit`, pages are followed until the backend is exhausted
    /// or `backend_max_rows` rows are collected; hitting the cap while more
    /// rows exist attaches [`Warning::ResultTruncated`]. So does a backend
    /// that stops serving rows (an empty page) after handing out a cursor,
    /// with `backend_max` set to the rows it served. A `limit` above the
    /// cap is lowered to it with [`Warning::LimitClamped`].
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a zero limit, construction errors from type
    /// inference or translation, `FetchFailed` from any page.
    pub fn list_entries(
        &self,
        ctx: &ResolvedContext,
        container: ContainerType,
        filter: Option<&Filter>,
        sort: &SortSpec,
        limit: Option<usize>,
    ) -> Result<Listing> {
        if limit == Some(0) {
            return Err(Error::InvalidInput("limit must be positive".to_string()));
        }
        let max = self.config.backend_max_rows();
        let mut warnings = Vec::new();
        let target = match limit {
            Some(requested) if requested > max => {
                let w = Warning::LimitClamped {
                    requested,
                    backend_max: max,
                };
                warn!(requested, backend_max = max, "{w}");
                warnings.push(w);
                max
            }
            Some(requested) => requested,
            None => max,
        };

        let prepared = inference::prepare(self, ctx, filter, sort)?;
        debug!(
            container = container.index_name(),
            query = prepared.query.as_deref().unwrap_or(""),
            target,
            "listing entries"
        );

        let mut rows: Vec<ListedRun> = Vec::new();
        let mut cursor: Option<Cursor> = None;
        // the backend advertised more rows, then served none
        let mut cut_by_backend = false;
        for page_index in 0.. {
            let request = ListRequest {
                container,
                query: prepared.query.clone(),
                sort: prepared.sort.clone(),
                page_size: self.config.page_size().min(target - rows.len()),
            };
            let page = self.call(
                "list entries",
                page_index,
                || format!("{} listing", container.index_name()),
                |t| t.list_page(ctx, &request, cursor.as_ref()),
            )?;
            debug!(page = page_index, rows = page.items.len(), "listed page");
            let empty = page.items.is_empty();
            cut_by_backend = empty && cursor.is_some();
            rows.extend(page.items);
            cursor = page.next_cursor;
            if rows.len() >= target || cursor.is_none() || empty {
                break;
            }
        }
        rows.truncate(target);

        let cut_by_config = limit.is_none() && rows.len() >= max && cursor.is_some();
        if cut_by_config || cut_by_backend {
            let w = Warning::ResultTruncated {
                returned: rows.len(),
                backend_max: if cut_by_backend { rows.len() } else { max },
            };
            warn!(rows = rows.len(), backend_max = max, "{w}");
            warnings.push(w);
        }

        Ok(Listing {
            rows,
            sort: prepared.sort,
            warnings,
        })
    }

    /// All definitions selected by `filter` on `run_ids`, following pages.
    /// An empty `run_ids` looks across the whole project.
    ///
    /// # Errors
    ///
    /// `FetchFailed` from any page.
    pub fn list_definitions(
        &self,
        ctx: &ResolvedContext,
        run_ids: &[String],
        filter: &AttributeFilter,
        batch: usize,
    ) -> Result<Vec<AttributeDefinition>> {
        self.drain(
            "attribute definitions",
            batch,
            || format!("{} run(s)", run_ids.len()),
            |t, cursor| t.list_attribute_definitions(ctx, run_ids, filter, cursor),
        )
    }

    /// Columns `selection` picks among the attributes of `run_ids`.
    ///
    /// Discovery is scoped to the given rows: no rows, no columns.
    ///
    /// # Errors
    ///
    /// `FetchFailed` from the first failing batch.
    pub fn discover_columns(
        &self,
        ctx: &ResolvedContext,
        run_ids: &[String],
        selection: &AttributeSelection,
    ) -> Result<Vec<AttributeDefinition>> {
        if run_ids.is_empty() || selection.filters().is_empty() {
            return Ok(Vec::new());
        }
        let jobs: Vec<(Vec<String>, &AttributeFilter)> = split::split_run_ids(run_ids, &self.config)
            .into_iter()
            .flat_map(|ids| selection.filters().iter().map(move |f| (ids.clone(), f)))
            .collect();
        debug!(batches = jobs.len(), runs = run_ids.len(), "discovering columns");

        let found: Vec<Vec<AttributeDefinition>> = self.install(|| {
            jobs.par_iter()
                .enumerate()
                .map(|(batch, (ids, filter))| self.list_definitions(ctx, ids, filter, batch))
                .collect::<Result<Vec<_>>>()
        })?;
        let unique: BTreeSet<AttributeDefinition> = found.into_iter().flatten().collect();
        Ok(unique.into_iter().collect())
    }

    /// Values of `definitions` on `run_ids`, batched under the configured
    /// size limits. Pairs the backend has no value for are absent.
    ///
    /// # Errors
    ///
    /// `FetchFailed` from the first failing batch.
    pub fn fetch_values(
        &self,
        ctx: &ResolvedContext,
        run_ids: &[String],
        definitions: &[AttributeDefinition],
    ) -> Result<Vec<AttributeValue>> {
        let batches = split::split_run_ids_attributes(run_ids, definitions, &self.config);
        debug!(batches = batches.len(), "fetching attribute values");
        let fetched: Vec<Vec<AttributeValue>> = self.install(|| {
            batches
                .par_iter()
                .enumerate()
                .map(|(batch, (ids, defs))| {
                    self.drain(
                        "attribute values",
                        batch,
                        || format!("{} run(s) x {} attribute(s)", ids.len(), defs.len()),
                        |t, cursor| t.fetch_attribute_values(ctx, ids, defs, cursor),
                    )
                })
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(fetched.into_iter().flatten().collect())
    }
}
