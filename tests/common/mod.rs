//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use trueno_fetch::attribute::Value;
use trueno_fetch::client::Client;
use trueno_fetch::config::{FetchConfig, RetryPolicy};
use trueno_fetch::context::Context;
use trueno_fetch::experiment::{RunRecord, SeriesPoint};
use trueno_fetch::transport::MemoryBackend;

pub const PROJECT: &str = "lab/sweeps";

/// Explicit context for [`PROJECT`].
pub fn ctx() -> Context {
    Context::new()
        .with_project(PROJECT)
        .unwrap()
        .with_api_token("test-token")
}

/// Small limits and an immediate retry policy.
pub fn config(max_rows: usize, page_size: usize, attempts: u32) -> FetchConfig {
    FetchConfig::builder()
        .max_workers(4)
        .backend_max_rows(max_rows)
        .page_size(page_size)
        .retry(RetryPolicy::immediate(attempts))
        .build()
        .unwrap()
}

pub fn client(backend: &Arc<MemoryBackend>) -> Client {
    Client::with_config(backend.clone(), config(5000, 100, 3)).unwrap()
}

pub fn empty_backend() -> Arc<MemoryBackend> {
    Arc::new(MemoryBackend::builder(PROJECT).build())
}

/// Two experiments with a float metric and a few scalars:
///
/// | experiment | run   | metrics/loss (last) | params/lr | sys/tags     |
/// |------------|-------|---------------------|-----------|--------------|
/// | exp_a      | RUN-A | 0.5                 | 0.1       | {baseline}   |
/// | exp_b      | RUN-B | 0.2                 | 0.01      | {tuned, gpu} |
///
/// plus a non-head run `RUN-C` in `exp_a` with no metrics.
pub fn two_experiments() -> Arc<MemoryBackend> {
    let b = empty_backend();
    b.add_run(RunRecord::builder("RUN-A", "run-a").experiment_head("exp_a").build());
    b.add_run(RunRecord::builder("RUN-B", "run-b").experiment_head("exp_b").build());
    b.add_run(RunRecord::builder("RUN-C", "run-c").experiment("exp_a").build());

    b.log_series(
        "RUN-A",
        "metrics/loss",
        [SeriesPoint::new(1.0, 0.9), SeriesPoint::new(2.0, 0.5)],
    )
    .unwrap();
    b.log_series(
        "RUN-B",
        "metrics/loss",
        [SeriesPoint::new(1.0, 0.7), SeriesPoint::new(2.0, 0.2)],
    )
    .unwrap();
    b.set_attribute("RUN-A", "params/lr", Value::Float(0.1)).unwrap();
    b.set_attribute("RUN-B", "params/lr", Value::Float(0.01)).unwrap();
    b.set_attribute("RUN-A", "sys/tags", tags(&["baseline"])).unwrap();
    b.set_attribute("RUN-B", "sys/tags", tags(&["tuned", "gpu"])).unwrap();
    b
}

pub fn tags(values: &[&str]) -> Value {
    Value::StringSet(values.iter().map(|s| (*s).to_string()).collect())
}

/// `n` runs `R-000..`, each with `params/idx` = i.
pub fn many_runs(n: usize) -> Arc<MemoryBackend> {
    let b = empty_backend();
    for i in 0..n {
        let id = format!("R-{i:03}");
        b.add_run(RunRecord::new(&id, format!("custom-{i:03}")));
        b.set_attribute(&id, "params/idx", Value::Int(i64::try_from(i).unwrap()))
            .unwrap();
    }
    b
}
