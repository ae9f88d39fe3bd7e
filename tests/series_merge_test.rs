//! Integration tests for series assembly across fork/restart lineage
//!
//! Lineage used throughout:
//!
//! ```text
//! ROOT  (steps 1..=5, value = step)
//!   └── CHILD  fork_step 3, head of `exp_f`
//!         (steps 3, 4, 6, value = 10 * step, preview at 7)
//! ```

mod common;

use std::sync::Arc;

use arrow::array::Array;
use common::{client, ctx, empty_backend};
use trueno_fetch::client::SeriesRequest;
use trueno_fetch::experiment::{RunRecord, SeriesPoint};
use trueno_fetch::transport::MemoryBackend;
use trueno_fetch::{Error, Warning};

fn forked() -> Arc<MemoryBackend> {
    let b = empty_backend();
    b.add_run(RunRecord::new("ROOT", "root"));
    b.add_run(
        RunRecord::builder("CHILD", "child")
            .experiment_head("exp_f")
            .parent("ROOT")
            .fork_step(3.0)
            .build(),
    );
    b.log_series(
        "ROOT",
        "metrics/loss",
        (1..=5).map(|s| SeriesPoint::new(f64::from(s), f64::from(s))),
    )
    .unwrap();
    b.log_series(
        "CHILD",
        "metrics/loss",
        [3, 4, 6]
            .into_iter()
            .map(|s| SeriesPoint::new(f64::from(s), f64::from(s) * 10.0))
            .chain([SeriesPoint::builder(7.0, 70.0).preview(0.5).build()]),
    )
    .unwrap();
    b
}

fn loss_at(table: &trueno_fetch::table::SeriesTable, step: f64) -> Option<f64> {
    table
        .get("exp_f", step, "metrics/loss")
        .and_then(|c| c.value.as_f64())
}

#[test]
fn test_lineage_inherits_up_to_fork_step() {
    let backend = forked();
    let table = client(&backend)
        .fetch_metrics(&SeriesRequest::experiments(["metrics/loss"]).context(ctx()))
        .unwrap();

    assert_eq!(table.steps("exp_f"), vec![1.0, 2.0, 3.0, 4.0, 6.0]);
    assert_eq!(loss_at(&table, 2.0), Some(2.0));
    // descendant shadows the ancestor at the shared step
    assert_eq!(loss_at(&table, 3.0), Some(30.0));
    // ancestor points past the fork are not inherited
    assert_eq!(loss_at(&table, 5.0), None);
    assert_eq!(loss_at(&table, 6.0), Some(60.0));
    assert_eq!(table.index_name(), "experiment");
}

#[test]
fn test_without_lineage_only_own_points() {
    let backend = forked();
    let table = client(&backend)
        .fetch_metrics(
            &SeriesRequest::experiments(["metrics/loss"])
                .lineage_to_the_root(false)
                .context(ctx()),
        )
        .unwrap();
    assert_eq!(table.steps("exp_f"), vec![3.0, 4.0, 6.0]);
}

#[test]
fn test_step_range_left_exclusive_right_inclusive() {
    let backend = forked();
    let table = client(&backend)
        .fetch_metrics(
            &SeriesRequest::experiments(["metrics/loss"])
                .step_range(Some(2.0), Some(4.0))
                .context(ctx()),
        )
        .unwrap();
    assert_eq!(table.steps("exp_f"), vec![3.0, 4.0]);
}

#[test]
fn test_tail_limit_after_merge() {
    let backend = forked();
    let table = client(&backend)
        .fetch_metrics(
            &SeriesRequest::experiments(["metrics/loss"])
                .tail_limit(2)
                .context(ctx()),
        )
        .unwrap();
    assert_eq!(table.steps("exp_f"), vec![4.0, 6.0]);
}

#[test]
fn test_previews_dropped_unless_requested() {
    let backend = forked();
    let client = client(&backend);

    let without = client
        .fetch_metrics(&SeriesRequest::experiments(["metrics/loss"]).context(ctx()))
        .unwrap();
    assert!(without.get("exp_f", 7.0, "metrics/loss").is_none());

    let with = client
        .fetch_metrics(
            &SeriesRequest::experiments(["metrics/loss"])
                .include_point_previews(true)
                .include_time(true)
                .context(ctx()),
        )
        .unwrap();
    let cell = with.get("exp_f", 7.0, "metrics/loss").unwrap();
    assert_eq!(cell.is_preview, Some(true));
    assert_eq!(cell.preview_completion, Some(0.5));
    assert!(cell.timestamp.is_some());
    let committed = with.get("exp_f", 6.0, "metrics/loss").unwrap();
    assert_eq!(committed.is_preview, Some(false));
}

#[test]
fn test_absent_attribute_is_null_column_not_error() {
    let backend = forked();
    let client = client(&backend);
    let table = client
        .fetch_metrics(&SeriesRequest::experiments(["metrics/absent"]).context(ctx()))
        .unwrap();
    assert!(table.is_empty());
    assert_eq!(table.attributes(), ["metrics/absent".to_string()]);

    let table = client
        .fetch_metrics(
            &SeriesRequest::experiments(["metrics/loss", "metrics/absent"]).context(ctx()),
        )
        .unwrap();
    assert_eq!(
        table.attributes(),
        ["metrics/absent".to_string(), "metrics/loss".to_string()]
    );
    assert!(!table.is_empty());
    assert!(table.rows().iter().all(|r| r.cells[0].is_none()));
    assert!(table.rows().iter().all(|r| r.cells[1].is_some()));
    let batch = table.to_record_batch().unwrap();
    let absent = batch.column_by_name("metrics/absent").unwrap();
    assert_eq!(absent.null_count(), batch.num_rows());
}

#[test]
fn test_series_inherited_when_head_never_logged_it() {
    let backend = forked();
    backend
        .log_series("ROOT", "metrics/root_only", [SeriesPoint::new(2.0, 0.25)])
        .unwrap();
    let table = client(&backend)
        .fetch_metrics(&SeriesRequest::experiments(["metrics/root_only"]).context(ctx()))
        .unwrap();
    assert_eq!(table.steps("exp_f"), vec![2.0]);
    assert_eq!(
        table
            .get("exp_f", 2.0, "metrics/root_only")
            .and_then(|c| c.value.as_f64()),
        Some(0.25)
    );
}

#[test]
fn test_truncated_series_listing_carries_warning() {
    let b = empty_backend();
    for i in 0..8 {
        let id = format!("R{i}");
        b.add_run(RunRecord::new(&id, format!("run-{i}")));
        b.log_series(&id, "m", [SeriesPoint::new(1.0, f64::from(i))]).unwrap();
    }
    let client = trueno_fetch::client::Client::with_config(b.clone(), common::config(3, 100, 3))
        .unwrap();
    let table = client
        .fetch_metrics(&SeriesRequest::runs(["m"]).context(ctx()))
        .unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(
        table.warnings(),
        &[Warning::ResultTruncated {
            returned: 3,
            backend_max: 3
        }]
    );
}

#[test]
fn test_string_series() {
    let backend = forked();
    backend
        .log_series(
            "CHILD",
            "logs/stdout",
            [SeriesPoint::new(1.0, "start"), SeriesPoint::new(2.0, "epoch 1")],
        )
        .unwrap();
    let client = client(&backend);

    let table = client
        .fetch_series(
            &SeriesRequest::experiments(["logs/stdout", "metrics/loss"]).context(ctx()),
        )
        .unwrap();
    // float series are left to fetch_metrics
    assert_eq!(table.attributes(), ["logs/stdout".to_string()]);
    let cell = table.get("exp_f", 2.0, "logs/stdout").unwrap();
    assert_eq!(cell.value.as_f64(), None);

    let batch = table.to_record_batch().unwrap();
    assert!(batch.schema().field_with_name("logs/stdout").is_ok());
}

#[test]
fn test_runs_container_and_cycle_guard() {
    let b = empty_backend();
    b.add_run(RunRecord::builder("X", "run-x").parent("Y").build());
    b.add_run(RunRecord::builder("Y", "run-y").parent("X").build());
    b.log_series("X", "m", [SeriesPoint::new(1.0, 1.0), SeriesPoint::new(2.0, 2.0)])
        .unwrap();
    b.log_series(
        "Y",
        "m",
        (1..=3).map(|s| SeriesPoint::new(f64::from(s), -f64::from(s))),
    )
    .unwrap();

    let table = client(&b)
        .fetch_metrics(&SeriesRequest::runs(["m"]).context(ctx()))
        .unwrap();
    assert_eq!(table.index_name(), "run");
    assert_eq!(table.steps("run-x"), vec![1.0, 2.0, 3.0]);
    assert_eq!(
        table.get("run-x", 3.0, "m").and_then(|c| c.value.as_f64()),
        Some(-3.0)
    );
    assert_eq!(table.steps("run-y"), vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_missing_ancestor_ends_lineage() {
    let b = empty_backend();
    b.add_run(
        RunRecord::builder("ORPHAN", "orphan")
            .experiment_head("exp_o")
            .parent("GONE")
            .build(),
    );
    b.log_series("ORPHAN", "m", [SeriesPoint::new(1.0, 1.0)]).unwrap();
    let table = client(&b)
        .fetch_metrics(&SeriesRequest::experiments(["m"]).context(ctx()))
        .unwrap();
    assert_eq!(table.steps("exp_o"), vec![1.0]);
}

#[test]
fn test_series_failure_aborts_call() {
    let backend = forked();
    let client = trueno_fetch::client::Client::with_config(
        backend.clone(),
        common::config(5000, 100, 1),
    )
    .unwrap();
    backend.fail_next_calls(1);
    let err = client
        .fetch_metrics(&SeriesRequest::experiments(["metrics/loss"]).context(ctx()))
        .unwrap_err();
    assert!(matches!(err, Error::FetchFailed { attempts: 1, .. }));
}
