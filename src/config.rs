//! Fetch limits, worker bound, and retry policy
//!
//! Toyota Way: Heijunka. Fan-out is levelled by a fixed worker bound and
//! request sizes are capped so no single call overloads the backend.
//!
//! Every knob has a default and an optional environment override:
//!
//! | setting                       | default | variable                                   |
//! |-------------------------------|---------|--------------------------------------------|
//! | `max_workers`                 | 10      | `TRUENO_FETCH_MAX_WORKERS`                 |
//! | `backend_max_rows`            | 5000    | `TRUENO_FETCH_MAX_ROWS`                    |
//! | `page_size`                   | 1000    | `TRUENO_FETCH_PAGE_SIZE`                   |
//! | `attribute_values_batch_size` | 10000   | `TRUENO_FETCH_ATTRIBUTE_VALUES_BATCH_SIZE` |
//! | `query_size_limit`            | 220000  | `TRUENO_FETCH_QUERY_SIZE_LIMIT`            |
//! | `series_batch_size`           | 300     | `TRUENO_FETCH_SERIES_BATCH_SIZE`           |
//! | `retry.max_attempts`          | 3       | `TRUENO_FETCH_RETRY_ATTEMPTS`              |

use std::time::Duration;

use crate::{Error, Result};

/// Worker bound override.
pub const ENV_MAX_WORKERS: &str = "TRUENO_FETCH_MAX_WORKERS";
/// Backend row cap override.
pub const ENV_MAX_ROWS: &str = "TRUENO_FETCH_MAX_ROWS";
/// Listing page size override.
pub const ENV_PAGE_SIZE: &str = "TRUENO_FETCH_PAGE_SIZE";
/// Values-per-request override.
pub const ENV_ATTRIBUTE_VALUES_BATCH_SIZE: &str = "TRUENO_FETCH_ATTRIBUTE_VALUES_BATCH_SIZE";
/// Query byte limit override.
pub const ENV_QUERY_SIZE_LIMIT: &str = "TRUENO_FETCH_QUERY_SIZE_LIMIT";
/// Series-per-request override.
pub const ENV_SERIES_BATCH_SIZE: &str = "TRUENO_FETCH_SERIES_BATCH_SIZE";
/// Retry attempt override.
pub const ENV_RETRY_ATTEMPTS: &str = "TRUENO_FETCH_RETRY_ATTEMPTS";

/// Bounded exponential backoff for idempotent reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` counts the first try and is at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Policy that never waits between attempts (tests).
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Total attempts allowed.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Limits and concurrency for one [`crate::fetch::BatchFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    max_workers: usize,
    backend_max_rows: usize,
    page_size: usize,
    attribute_values_batch_size: usize,
    query_size_limit: usize,
    series_batch_size: usize,
    retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            backend_max_rows: 5000,
            page_size: 1000,
            attribute_values_batch_size: 10_000,
            query_size_limit: 220_000,
            series_batch_size: 300,
            retry: RetryPolicy::default(),
        }
    }
}

impl FetchConfig {
    /// Create a config builder starting from defaults.
    #[must_use]
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder::default()
    }

    /// Defaults with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` naming the variable if a value does not parse
    /// or is zero.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Same as [`FetchConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |key: &str| -> Result<Option<usize>> {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<usize>()
                        .map_err(|e| Error::InvalidInput(format!("{key}={raw}: {e}")))
                })
                .transpose()
        };
        let mut b = Self::builder();
        if let Some(v) = read(ENV_MAX_WORKERS)? {
            b = b.max_workers(v);
        }
        if let Some(v) = read(ENV_MAX_ROWS)? {
            b = b.backend_max_rows(v);
        }
        if let Some(v) = read(ENV_PAGE_SIZE)? {
            b = b.page_size(v);
        }
        if let Some(v) = read(ENV_ATTRIBUTE_VALUES_BATCH_SIZE)? {
            b = b.attribute_values_batch_size(v);
        }
        if let Some(v) = read(ENV_QUERY_SIZE_LIMIT)? {
            b = b.query_size_limit(v);
        }
        if let Some(v) = read(ENV_SERIES_BATCH_SIZE)? {
            b = b.series_batch_size(v);
        }
        if let Some(v) = read(ENV_RETRY_ATTEMPTS)? {
            let attempts = u32::try_from(v)
                .map_err(|e| Error::InvalidInput(format!("{ENV_RETRY_ATTEMPTS}={v}: {e}")))?;
            let base = RetryPolicy::default();
            b = b.retry(RetryPolicy::new(attempts, base.base_delay, base.max_delay));
        }
        b.build()
    }

    /// Upper bound on concurrent backend calls.
    #[must_use]
    pub const fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Most rows the backend returns for one logical listing.
    #[must_use]
    pub const fn backend_max_rows(&self) -> usize {
        self.backend_max_rows
    }

    /// Rows per listing page.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Most (run, attribute) values per value request.
    #[must_use]
    pub const fn attribute_values_batch_size(&self) -> usize {
        self.attribute_values_batch_size
    }

    /// Byte limit for identifiers embedded in one request.
    #[must_use]
    pub const fn query_size_limit(&self) -> usize {
        self.query_size_limit
    }

    /// Most series per series request.
    #[must_use]
    pub const fn series_batch_size(&self) -> usize {
        self.series_batch_size
    }

    /// Retry policy.
    #[must_use]
    pub const fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// Builder for `FetchConfig`.
#[derive(Debug, Default)]
pub struct FetchConfigBuilder {
    config: FetchConfig,
}

impl FetchConfigBuilder {
    /// Set the worker bound.
    #[must_use]
    pub const fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n;
        self
    }

    /// Set the backend row cap.
    #[must_use]
    pub const fn backend_max_rows(mut self, n: usize) -> Self {
        self.config.backend_max_rows = n;
        self
    }

    /// Set the listing page size.
    #[must_use]
    pub const fn page_size(mut self, n: usize) -> Self {
        self.config.page_size = n;
        self
    }

    /// Set the values-per-request bound.
    #[must_use]
    pub const fn attribute_values_batch_size(mut self, n: usize) -> Self {
        self.config.attribute_values_batch_size = n;
        self
    }

    /// Set the query byte limit.
    #[must_use]
    pub const fn query_size_limit(mut self, n: usize) -> Self {
        self.config.query_size_limit = n;
        self
    }

    /// Set the series-per-request bound.
    #[must_use]
    pub const fn series_batch_size(mut self, n: usize) -> Self {
        self.config.series_batch_size = n;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Build the config.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if any bound is zero.
    pub fn build(self) -> Result<FetchConfig> {
        let c = &self.config;
        for (name, v) in [
            ("max_workers", c.max_workers),
            ("backend_max_rows", c.backend_max_rows),
            ("page_size", c.page_size),
            ("attribute_values_batch_size", c.attribute_values_batch_size),
            ("query_size_limit", c.query_size_limit),
            ("series_batch_size", c.series_batch_size),
        ] {
            if v == 0 {
                return Err(Error::InvalidInput(format!("{name} must be positive")));
            }
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let c = FetchConfig::default();
        assert_eq!(c.max_workers(), 10);
        assert_eq!(c.backend_max_rows(), 5000);
        assert_eq!(c.query_size_limit(), 220_000);
        assert_eq!(c.retry().max_attempts(), 3);
    }

    #[test]
    fn test_builder_rejects_zero() {
        assert!(FetchConfig::builder().max_workers(0).build().is_err());
        assert!(FetchConfig::builder().page_size(7).build().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let env: HashMap<&str, &str> = [(ENV_MAX_WORKERS, "4"), (ENV_RETRY_ATTEMPTS, "5")].into();
        let c = FetchConfig::from_lookup(|k| env.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(c.max_workers(), 4);
        assert_eq!(c.retry().max_attempts(), 5);
        assert_eq!(c.page_size(), 1000);
    }

    #[test]
    fn test_from_lookup_bad_value_names_variable() {
        let err = FetchConfig::from_lookup(|k| (k == ENV_PAGE_SIZE).then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_PAGE_SIZE));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(350));
        assert_eq!(p.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts(), 1);
    }
}
