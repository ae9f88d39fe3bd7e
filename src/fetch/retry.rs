//! Bounded retry for idempotent backend reads

use std::thread;

use tracing::warn;

use crate::config::RetryPolicy;
use crate::transport::TransportResult;
use crate::{Error, Result};

/// Run `call` until it succeeds, fails non-transiently, or the policy's
/// attempts are spent.
///
/// `detail` is only evaluated when an error is produced.
///
/// # Errors
///
/// `FetchFailed` carrying `operation`, `page`, the detail string, the
/// attempt count and the last transport error.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    operation: &'static str,
    page: usize,
    detail: impl FnOnce() -> String,
    mut call: impl FnMut() -> TransportResult<T>,
) -> Result<T> {
    let mut attempt = 1;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts() => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    page,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "retrying"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(source) => {
                return Err(Error::FetchFailed {
                    operation,
                    page,
                    detail: detail(),
                    attempts: attempt,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;

    #[test]
    fn test_recovers_after_transient() {
        let mut failures = 2;
        let out = with_retry(&RetryPolicy::immediate(3), "probe", 0, String::new, || {
            if failures > 0 {
                failures -= 1;
                Err(TransportError::Transient("timeout".into()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(out.unwrap(), 7);
    }

    #[test]
    fn test_exhaustion_names_page() {
        let err = with_retry::<()>(
            &RetryPolicy::immediate(2),
            "list entries",
            4,
            || "runs".to_string(),
            || Err(TransportError::Transient("503".into())),
        )
        .unwrap_err();
        match err {
            Error::FetchFailed {
                operation,
                page,
                attempts,
                ..
            } => {
                assert_eq!(operation, "list entries");
                assert_eq!(page, 4);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fatal_not_retried() {
        let mut calls = 0;
        let err = with_retry::<()>(&RetryPolicy::immediate(5), "probe", 0, String::new, || {
            calls += 1;
            Err(TransportError::Fatal("bad query".into()))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, Error::FetchFailed { attempts: 1, .. }));
    }
}
