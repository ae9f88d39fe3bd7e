//! Integration tests for the read-only project and run facades

mod common;

use std::sync::Arc;

use common::{config, ctx, two_experiments};
use trueno_fetch::attribute::{AttributeType, Value};
use trueno_fetch::client::TableRequest;
use trueno_fetch::experiment::{RunRecord, SeriesPoint};
use trueno_fetch::readonly::{ReadOnlyProject, RunLocator};
use trueno_fetch::series::StepRange;
use trueno_fetch::transport::MemoryBackend;
use trueno_fetch::Error;

fn project(backend: &Arc<MemoryBackend>) -> ReadOnlyProject {
    ReadOnlyProject::with_config(backend.clone(), config(5000, 100, 3), Some(&ctx())).unwrap()
}

#[test]
fn test_list_runs_and_experiments() {
    let backend = two_experiments();
    let project = project(&backend);
    assert_eq!(project.project(), common::PROJECT);

    let mut runs: Vec<String> = project
        .list_runs()
        .unwrap()
        .items
        .into_iter()
        .map(|r| r.custom_run_id)
        .collect();
    runs.sort();
    assert_eq!(runs, vec!["run-a", "run-b", "run-c"]);

    let experiments = project.list_experiments().unwrap();
    assert!(experiments.is_complete());
    let experiments = experiments.items;
    assert_eq!(experiments.len(), 2);
    assert!(experiments
        .iter()
        .all(|e| e.name.as_deref().is_some_and(|n| n.starts_with("exp_"))));
}

#[test]
fn test_open_by_each_locator() {
    let backend = two_experiments();
    let project = project(&backend);

    let by_id = project.run(&RunLocator::Id("RUN-A".into())).unwrap();
    let by_custom = project.run(&RunLocator::CustomId("run-a".into())).unwrap();
    let by_name = project
        .run(&RunLocator::ExperimentName("exp_a".into()))
        .unwrap();
    assert_eq!(by_id.record().run_id(), "RUN-A");
    assert_eq!(by_custom.record().run_id(), "RUN-A");
    // the experiment resolves to its head, not the other member run
    assert_eq!(by_name.record().run_id(), "RUN-A");
}

#[test]
fn test_unknown_run_not_found() {
    let backend = two_experiments();
    let project = project(&backend);
    for locator in [
        RunLocator::Id("NOPE".into()),
        RunLocator::CustomId("nope".into()),
        RunLocator::ExperimentName("nope".into()),
    ] {
        assert!(matches!(project.run(&locator), Err(Error::NotFound(_))));
    }
}

#[test]
fn test_field_names_and_lazy_get() {
    let backend = two_experiments();
    let project = project(&backend);
    let run = project.run(&RunLocator::Id("RUN-B".into())).unwrap();

    let names: Vec<&str> = run.field_names().collect();
    assert!(names.contains(&"params/lr"));
    assert!(names.contains(&"metrics/loss"));
    assert!(names.contains(&"sys/custom_run_id"));
    assert_eq!(
        run.definition("metrics/loss").map(|d| d.attribute_type),
        Some(AttributeType::FloatSeries)
    );

    assert!(run.cache().is_empty());
    assert_eq!(run.get("params/lr").unwrap(), Value::Float(0.01));
    assert_eq!(run.cache().len(), 1);

    // served from the cache: the backend is not consulted again
    let calls = backend.calls();
    assert_eq!(run.get("params/lr").unwrap(), Value::Float(0.01));
    assert_eq!(backend.calls(), calls);

    assert!(matches!(run.get("params/missing"), Err(Error::NotFound(_))));
}

#[test]
fn test_prefetch_batches_and_remove() {
    let backend = two_experiments();
    let project = project(&backend);
    let run = project.run(&RunLocator::Id("RUN-A".into())).unwrap();

    let calls = backend.calls();
    run.prefetch(&["params/lr", "sys/tags", "params/unknown"]).unwrap();
    assert_eq!(backend.calls(), calls + 1);
    assert_eq!(run.cache().len(), 2);
    assert_eq!(run.get("sys/tags").unwrap(), common::tags(&["baseline"]));

    assert!(run.remove("params/lr"));
    assert!(!run.remove("params/lr"));
    assert_eq!(run.cache().len(), 1);
}

fn forked_project_backend() -> Arc<MemoryBackend> {
    let b = common::empty_backend();
    b.add_run(RunRecord::new("P", "parent"));
    b.add_run(
        RunRecord::builder("C", "child")
            .experiment_head("exp_c")
            .parent("P")
            .fork_step(2.0)
            .build(),
    );
    b.log_series("P", "loss", (1..=4).map(|s| SeriesPoint::new(f64::from(s), 1.0)))
        .unwrap();
    b.log_series("C", "loss", [SeriesPoint::new(3.0, 2.0), SeriesPoint::new(4.0, 2.0)])
        .unwrap();
    b.log_series("C", "acc", [SeriesPoint::new(3.0, 0.5)]).unwrap();
    b
}

#[test]
fn test_prefetch_series_values_threaded_and_sequential() {
    let backend = forked_project_backend();
    let project = project(&backend);

    for use_threads in [true, false] {
        let run = project.run(&RunLocator::CustomId("child".into())).unwrap();
        run.prefetch_series_values(&["loss", "acc"], use_threads, true, StepRange::all())
            .unwrap();

        let calls = backend.calls();
        let loss = run.fetch_series("loss").unwrap();
        assert_eq!(backend.calls(), calls);
        let steps: Vec<f64> = loss.iter().map(SeriesPoint::step).collect();
        assert_eq!(steps, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(run.fetch_series("acc").unwrap().len(), 1);
    }
}

#[test]
fn test_prefetch_series_without_inheritance_and_window() {
    let backend = forked_project_backend();
    let project = project(&backend);
    let run = project.run(&RunLocator::Id("C".into())).unwrap();
    run.prefetch_series_values(&["loss"], false, false, StepRange::new(Some(3.0), None))
        .unwrap();
    let cached = run.cache().series("C", "loss").unwrap();
    assert!(!cached.include_inherited);
    let steps: Vec<f64> = cached.points.iter().map(SeriesPoint::step).collect();
    assert_eq!(steps, vec![4.0]);
}

#[test]
fn test_fetch_series_rejects_scalar() {
    let backend = forked_project_backend();
    backend.set_attribute("C", "params/bs", Value::Int(32)).unwrap();
    let project = project(&backend);
    let run = project.run(&RunLocator::Id("C".into())).unwrap();
    assert!(matches!(run.fetch_series("params/bs"), Err(Error::InvalidInput(_))));
}

#[test]
fn test_fetch_read_only_runs_and_experiments() {
    let backend = two_experiments();
    let project = project(&backend);

    let runs = project
        .fetch_read_only_runs(&["RUN-A"], &["run-b", "run-c"])
        .unwrap();
    let ids: Vec<&str> = runs.iter().map(|r| r.record().run_id()).collect();
    assert_eq!(ids, vec!["RUN-A", "RUN-B", "RUN-C"]);

    let experiments = project.fetch_read_only_experiments(&["exp_b"]).unwrap();
    assert_eq!(experiments[0].record().run_id(), "RUN-B");

    assert!(project.fetch_read_only_experiments(&["exp_b", "missing"]).is_err());
}

#[test]
fn test_project_tables_use_project_context() {
    let backend = two_experiments();
    let project = project(&backend);
    let table = project
        .fetch_experiments_table(TableRequest::new().attributes(["params/lr"]))
        .unwrap();
    assert_eq!(table.len(), 2);
    let runs = project.fetch_runs_table(TableRequest::new()).unwrap();
    assert_eq!(runs.len(), 3);
}

#[test]
fn test_open_requires_context() {
    let backend = two_experiments();
    let partial = trueno_fetch::context::Context::new().with_api_token("t");
    // no project anywhere unless the environment provides one
    if std::env::var(trueno_fetch::context::ENV_PROJECT).is_err()
        && trueno_fetch::context::global_context().is_none()
    {
        let err = ReadOnlyProject::open(backend, Some(&partial)).unwrap_err();
        assert!(matches!(err, Error::MissingContext(_)));
    }
}
