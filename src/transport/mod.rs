//! Backend transport interface
//!
//! The hosted backend is reached only through the [`Transport`] trait.
//! Every call is an idempotent read authenticated by a
//! [`ResolvedContext`]. Failures are reported as [`TransportError`]; only
//! [`TransportError::Transient`] is retried by the fetcher.
//!
//! [`MemoryBackend`] answers the same calls from in-process data.

mod memory;

pub use memory::{MemoryBackend, MemoryBackendBuilder};

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attribute::{sys, Attribute, AttributeDefinition, AttributeFilter, AttributeType, AttributeValue, Value};
use crate::context::ResolvedContext;
use crate::experiment::{ContainerType, RunRecord, SeriesPoint};
use crate::series::StepRange;

/// Transport-level failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Timeout, throttling, connection reset: safe to retry
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// Request rejected; retrying will not help
    #[error("backend rejected request: {0}")]
    Fatal(String),

    /// Credential missing or revoked
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Project or run does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

impl TransportError {
    /// Whether the call may succeed if repeated.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result of a transport call.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Opaque pagination cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a backend cursor token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Cursor for the next page; `None` when exhausted
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    /// Final page.
    #[must_use]
    pub const fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending
    Asc,
    /// Descending
    #[default]
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        })
    }
}

/// Sort key and direction for listings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortSpec {
    /// Attribute to sort by
    pub attribute: Attribute,
    /// Direction
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            attribute: Attribute::typed(sys::CREATION_TIME, AttributeType::Datetime),
            direction: SortDirection::Desc,
        }
    }
}

impl SortSpec {
    /// Sort by `attribute` in `direction`.
    #[must_use]
    pub fn new(attribute: impl Into<Attribute>, direction: SortDirection) -> Self {
        Self {
            attribute: attribute.into(),
            direction,
        }
    }
}

/// One listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    /// Experiments or runs
    pub container: ContainerType,
    /// Translated row filter, if any
    pub query: Option<String>,
    /// Sort order
    pub sort: SortSpec,
    /// Maximum rows on this page
    pub page_size: usize,
}

/// A listed run with its sort-key value.
#[derive(Debug, Clone, PartialEq)]
pub struct ListedRun {
    /// The run
    pub record: RunRecord,
    /// Value of the sort attribute, `None` if the run lacks it
    pub sort_value: Option<Value>,
}

/// Narrow read-only interface to the tracking backend.
pub trait Transport: Send + Sync {
    /// One page of runs matching `request`, sorted by `request.sort`.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`].
    fn list_page(
        &self,
        ctx: &ResolvedContext,
        request: &ListRequest,
        cursor: Option<&Cursor>,
    ) -> TransportResult<Page<ListedRun>>;

    /// Attribute definitions present on `run_ids` and selected by `filter`.
    /// An empty `run_ids` scopes the listing to the whole project.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`].
    fn list_attribute_definitions(
        &self,
        ctx: &ResolvedContext,
        run_ids: &[String],
        filter: &AttributeFilter,
        cursor: Option<&Cursor>,
    ) -> TransportResult<Page<AttributeDefinition>>;

    /// Values of `definitions` on `run_ids`. Absent pairs are omitted.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`].
    fn fetch_attribute_values(
        &self,
        ctx: &ResolvedContext,
        run_ids: &[String],
        definitions: &[AttributeDefinition],
        cursor: Option<&Cursor>,
    ) -> TransportResult<Page<AttributeValue>>;

    /// Points a run logged itself for `attribute` within `step_range`,
    /// previews included, ordered by step. Empty if the run never logged it.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`].
    fn get_series(
        &self,
        ctx: &ResolvedContext,
        run_id: &str,
        attribute: &str,
        step_range: StepRange,
    ) -> TransportResult<Vec<SeriesPoint>>;

    /// Look up a run by backend id.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`].
    fn get_run(&self, ctx: &ResolvedContext, run_id: &str) -> TransportResult<Option<RunRecord>>;
}
