//! Fetch Table Example
//!
//! Seeds an in-memory backend with a small sweep, then runs the usual
//! read path: filtered experiment table, metric history across a fork,
//! and export.
//!
//! Run with: RUST_LOG=trueno_fetch=debug cargo run --example fetch_table

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use trueno_fetch::attribute::{sys, Value};
use trueno_fetch::client::{Client, SeriesRequest, TableRequest};
use trueno_fetch::context::Context;
use trueno_fetch::experiment::{RunRecord, SeriesPoint};
use trueno_fetch::filter::Filter;
use trueno_fetch::transport::{MemoryBackend, SortDirection, SortSpec};

fn seed() -> Result<Arc<MemoryBackend>> {
    let backend = Arc::new(MemoryBackend::builder("lab/sweeps").build());

    let sweeps = [
        ("RUN-1", "lr-1e-2", 0.01, &["baseline"][..]),
        ("RUN-2", "lr-1e-3", 0.001, &["tuned"][..]),
        ("RUN-3", "lr-1e-4", 0.0001, &["tuned", "slow"][..]),
    ];
    for (i, (id, name, lr, tags)) in sweeps.iter().enumerate() {
        backend.add_run(RunRecord::builder(*id, format!("run-{i}")).experiment_head(*name).build());
        backend.set_attribute(id, "params/lr", Value::Float(*lr))?;
        backend.set_attribute(
            id,
            sys::TAGS,
            Value::StringSet(tags.iter().map(|t| (*t).to_string()).collect()),
        )?;
        #[allow(clippy::cast_precision_loss)]
        let decay = 1.0 + i as f64;
        backend.log_series(
            id,
            "metrics/loss",
            (1..=10).map(|s| SeriesPoint::new(f64::from(s), 1.0 / (f64::from(s) * decay))),
        )?;
    }

    // RUN-4 resumes RUN-3 from step 5 under a new experiment name
    backend.add_run(
        RunRecord::builder("RUN-4", "run-3-resumed")
            .experiment_head("lr-1e-4-resumed")
            .parent("RUN-3")
            .fork_step(5.0)
            .build(),
    );
    backend.log_series(
        "RUN-4",
        "metrics/loss",
        (6..=12).map(|s| SeriesPoint::new(f64::from(s), 0.05)),
    )?;
    Ok(backend)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Trueno-Fetch: experiment tables ===\n");

    let backend = seed()?;
    let client = Client::new(backend.clone())?;
    let ctx = Context::new()
        .with_project("lab/sweeps")?
        .with_api_token("demo-token");

    // -------------------------------------------------------------------------
    // 1. Filtered experiment table
    // -------------------------------------------------------------------------
    println!("1. Experiments tagged `tuned`, best final loss first...");
    let request = TableRequest::new()
        .filter(Filter::contains_all(sys::TAGS, ["tuned"])?)
        .attributes(["params/lr", "metrics/loss"])
        .sort_by(SortSpec::new("metrics/loss", SortDirection::Asc))
        .context(ctx.clone());
    let table = client.fetch_experiments_table(&request)?;
    for label in table.labels() {
        println!(
            "   {label:<18} lr={:<8} loss={}",
            table.get(label, "params/lr").map_or_else(String::new, ToString::to_string),
            table.get(label, "metrics/loss").map_or_else(String::new, ToString::to_string),
        );
    }
    for warning in table.warnings() {
        println!("   warning: {warning}");
    }

    // -------------------------------------------------------------------------
    // 2. Metric history across the fork
    // -------------------------------------------------------------------------
    println!("\n2. Loss history of the resumed experiment (inherits steps 1..=5)...");
    let metrics = client.fetch_metrics(
        &SeriesRequest::experiments(["metrics/loss"])
            .filter(Filter::name_eq("lr-1e-4-resumed"))
            .step_range(Some(3.0), Some(8.0))
            .context(ctx.clone()),
    )?;
    for step in metrics.steps("lr-1e-4-resumed") {
        let cell = metrics.get("lr-1e-4-resumed", step, "metrics/loss");
        println!(
            "   step {step:>4}: {}",
            cell.and_then(|c| c.value.as_f64())
                .map_or_else(String::new, |v| format!("{v:.4}"))
        );
    }

    // -------------------------------------------------------------------------
    // 3. Export
    // -------------------------------------------------------------------------
    println!("\n3. Exporting...");
    let batch = table.to_record_batch()?;
    println!("   Arrow batch: {} rows x {} columns", batch.num_rows(), batch.num_columns());
    println!("   JSON: {}", table.to_json()?);
    println!("   Backend calls made: {}", backend.calls());

    Ok(())
}
