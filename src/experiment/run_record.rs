//! Run Record - one tracked run and its place in a fork/restart lineage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of entity a listing targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    /// Experiments: one row per experiment head run, labelled by name.
    Experiment,
    /// Runs: one row per run, labelled by custom run id.
    Run,
}

impl ContainerType {
    /// Name of the row index in result tables.
    #[must_use]
    pub const fn index_name(self) -> &'static str {
        match self {
            Self::Experiment => "experiment",
            Self::Run => "run",
        }
    }
}

/// Run Record identifies one run.
///
/// An experiment is its current head run plus the ancestor runs reachable
/// through `parent_id`. Records are produced by the backend and never
/// mutated here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    run_id: String,
    custom_run_id: String,
    experiment_name: Option<String>,
    is_head: bool,
    parent_id: Option<String>,
    fork_step: Option<f64>,
    creation_time: DateTime<Utc>,
}

impl RunRecord {
    /// Create a standalone run (no experiment, no parent).
    ///
    /// # Arguments
    ///
    /// * `run_id` - Backend-assigned id (`sys/id`)
    /// * `custom_run_id` - User-assigned id (`sys/custom_run_id`)
    #[must_use]
    pub fn new(run_id: impl Into<String>, custom_run_id: impl Into<String>) -> Self {
        RunRecordBuilder::new(run_id, custom_run_id).build()
    }

    /// Create a builder for constructing a run record with optional fields.
    #[must_use]
    pub fn builder(
        run_id: impl Into<String>,
        custom_run_id: impl Into<String>,
    ) -> RunRecordBuilder {
        RunRecordBuilder::new(run_id, custom_run_id)
    }

    /// Get the backend run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the custom run ID.
    #[must_use]
    pub fn custom_run_id(&self) -> &str {
        &self.custom_run_id
    }

    /// Get the experiment name, if the run belongs to one.
    #[must_use]
    pub fn experiment_name(&self) -> Option<&str> {
        self.experiment_name.as_deref()
    }

    /// Whether this run is the head of its experiment.
    #[must_use]
    pub const fn is_head(&self) -> bool {
        self.is_head
    }

    /// Get the run this one was forked or restarted from.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Last parent step inherited by this run, if forked mid-series.
    #[must_use]
    pub const fn fork_step(&self) -> Option<f64> {
        self.fork_step
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    /// Row label for the given listing kind.
    ///
    /// Experiments are labelled by name (falling back to the custom run id
    /// for runs outside any experiment), runs by custom run id.
    #[must_use]
    pub fn label(&self, container: ContainerType) -> &str {
        match container {
            ContainerType::Experiment => {
                self.experiment_name.as_deref().unwrap_or(&self.custom_run_id)
            }
            ContainerType::Run => &self.custom_run_id,
        }
    }
}

/// Builder for `RunRecord`.
#[derive(Debug)]
#[allow(clippy::struct_field_names)]
pub struct RunRecordBuilder {
    run_id: String,
    custom_run_id: String,
    experiment_name: Option<String>,
    is_head: bool,
    parent_id: Option<String>,
    fork_step: Option<f64>,
    creation_time: DateTime<Utc>,
}

impl RunRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(run_id: impl Into<String>, custom_run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            custom_run_id: custom_run_id.into(),
            experiment_name: None,
            is_head: false,
            parent_id: None,
            fork_step: None,
            creation_time: Utc::now(),
        }
    }

    /// Make this run the head of the named experiment.
    #[must_use]
    pub fn experiment_head(mut self, name: impl Into<String>) -> Self {
        self.experiment_name = Some(name.into());
        self.is_head = true;
        self
    }

    /// Record membership in an experiment without being its head.
    #[must_use]
    pub fn experiment(mut self, name: impl Into<String>) -> Self {
        self.experiment_name = Some(name.into());
        self
    }

    /// Set the parent run.
    #[must_use]
    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the fork point on the parent's step axis.
    #[must_use]
    pub const fn fork_step(mut self, step: f64) -> Self {
        self.fork_step = Some(step);
        self
    }

    /// Set a custom creation time.
    #[must_use]
    pub const fn creation_time(mut self, t: DateTime<Utc>) -> Self {
        self.creation_time = t;
        self
    }

    /// Build the `RunRecord`.
    #[must_use]
    pub fn build(self) -> RunRecord {
        RunRecord {
            run_id: self.run_id,
            custom_run_id: self.custom_run_id,
            experiment_name: self.experiment_name,
            is_head: self.is_head,
            parent_id: self.parent_id,
            fork_step: self.fork_step,
            creation_time: self.creation_time,
        }
    }
}
