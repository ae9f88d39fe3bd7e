//! Error types for Trueno-Fetch
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)
//!
//! Every variant names the attribute, run, or page it concerns so a
//! caller can narrow the filter that produced it.

use std::fmt;

use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trueno-Fetch error types
#[derive(Error, Debug)]
pub enum Error {
    /// Operator is not valid for the attribute's type, or the operand is unusable
    #[error("Invalid predicate on `{attribute}`: {reason}")]
    InvalidPredicate {
        /// Attribute the predicate targets
        attribute: String,
        /// Why the predicate was rejected
        reason: String,
    },

    /// Untyped attribute maps to several types in the targeted scope
    #[error(
        "Ambiguous type for attribute `{attribute}`: found {types}\nSpecify the attribute type explicitly to disambiguate"
    )]
    AmbiguousAttributeType {
        /// Attribute name
        attribute: String,
        /// Conflicting backend type names, comma separated
        types: String,
    },

    /// Aggregation is not available for the attribute or operator
    #[error("Unsupported aggregation `{aggregation}` on attribute `{attribute}`: {reason}")]
    UnsupportedAggregation {
        /// Attribute name
        attribute: String,
        /// Requested aggregation
        aggregation: String,
        /// Why it cannot be applied
        reason: String,
    },

    /// A page or attribute batch failed after its last retry attempt
    #[error("Fetch failed: {operation} page {page} ({detail}) after {attempts} attempt(s): {source}")]
    FetchFailed {
        /// Logical operation (e.g. "list entries", "attribute values")
        operation: &'static str,
        /// Zero-based page or batch index
        page: usize,
        /// Runs/attributes involved in the failed request
        detail: String,
        /// Attempts made before giving up
        attempts: u32,
        /// Underlying transport failure
        #[source]
        source: TransportError,
    },

    /// Several types collide under one column path and type suffixes are disabled
    #[error(
        "Conflicting types for column `{attribute}`: {types}\nEnable type_suffix_in_column_names or narrow the attribute filter"
    )]
    AmbiguousColumnType {
        /// Attribute name
        attribute: String,
        /// Conflicting backend type names, comma separated
        types: String,
    },

    /// No project or API token could be resolved
    #[error("Missing {0}: pass it explicitly, set a global context, or export the environment variable")]
    MissingContext(&'static str),

    /// Entity lookup found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid regular expression in an attribute or name filter
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Arrow conversion error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet export error
    #[cfg(feature = "parquet")]
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build an `InvalidPredicate` error.
    pub(crate) fn invalid_predicate(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPredicate {
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    /// Build an `UnsupportedAggregation` error.
    pub(crate) fn unsupported_aggregation(
        attribute: impl Into<String>,
        aggregation: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnsupportedAggregation {
            attribute: attribute.into(),
            aggregation: aggregation.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error was raised before any network call.
    #[must_use]
    pub const fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPredicate { .. }
                | Self::AmbiguousAttributeType { .. }
                | Self::UnsupportedAggregation { .. }
        )
    }
}

/// Soft, non-fatal conditions attached to a returned table.
///
/// Warnings are logged at `warn` level when they are produced and kept on
/// the result so callers can inspect them programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Warning {
    /// More rows matched than the backend returns in one logical fetch
    ResultTruncated {
        /// Rows in the returned table
        returned: usize,
        /// Backend row cap
        backend_max: usize,
    },
    /// Requested limit exceeded the backend cap and was lowered
    LimitClamped {
        /// Limit asked for
        requested: usize,
        /// Backend row cap
        backend_max: usize,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResultTruncated {
                returned,
                backend_max,
            } => write!(
                f,
                "Result truncated to {returned} rows (backend maximum is {backend_max}); narrow the filter or pass a limit"
            ),
            Self::LimitClamped {
                requested,
                backend_max,
            } => write!(
                f,
                "Requested limit {requested} exceeds backend maximum {backend_max}; using {backend_max}"
            ),
        }
    }
}
