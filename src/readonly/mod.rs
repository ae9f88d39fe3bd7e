//! Read-only project and run facades
//!
//! A stateful entry point over the same fetch layer as [`crate::client`]:
//! a [`ReadOnlyProject`] is bound to one resolved context, and each
//! [`ReadOnlyRun`] it opens owns a private [`FetchCache`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use trueno_fetch::attribute::Value;
//! use trueno_fetch::context::Context;
//! use trueno_fetch::experiment::RunRecord;
//! use trueno_fetch::readonly::{ReadOnlyProject, RunLocator};
//! use trueno_fetch::transport::MemoryBackend;
//!
//! let backend = Arc::new(MemoryBackend::builder("team/nlp").build());
//! backend.add_run(RunRecord::builder("NLP-1", "bert-a").experiment_head("bert").build());
//! backend.set_attribute("NLP-1", "params/lr", Value::Float(0.001))?;
//!
//! let ctx = Context::new().with_project("team/nlp")?.with_api_token("token");
//! let project = ReadOnlyProject::open(backend, Some(&ctx))?;
//! let run = project.run(&RunLocator::ExperimentName("bert".into()))?;
//! assert_eq!(run.get("params/lr")?, Value::Float(0.001));
//! # Ok::<(), trueno_fetch::Error>(())
//! ```

mod cache;
mod run;

pub use cache::{CachedSeries, FetchCache};
pub use run::{ReadOnlyRun, RunLocator};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::client::{Client, ListResult, TableRequest};
use crate::config::FetchConfig;
use crate::context::{effective_context, Context, ResolvedContext};
use crate::experiment::{ContainerType, RunRecord};
use crate::fetch::BatchFetcher;
use crate::table::ResultTable;
use crate::transport::{SortSpec, Transport};
use crate::Result;

/// Identifiers of a listed run or experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// `sys/id`
    pub id: String,
    /// `sys/custom_run_id`
    pub custom_run_id: String,
    /// `sys/name`, set on experiment runs
    pub name: Option<String>,
}

impl From<&RunRecord> for RunIdentity {
    fn from(record: &RunRecord) -> Self {
        Self {
            id: record.run_id().to_string(),
            custom_run_id: record.custom_run_id().to_string(),
            name: record.experiment_name().map(str::to_string),
        }
    }
}

/// A project opened for reading.
#[derive(Debug)]
pub struct ReadOnlyProject {
    client: Client,
    context: Context,
    resolved: ResolvedContext,
}

impl ReadOnlyProject {
    /// Open the project named by `context`, falling back to the global
    /// context and then the environment.
    ///
    /// # Errors
    ///
    /// `MissingContext` when no project or token can be resolved,
    /// `InvalidInput` for a malformed project path or config override.
    pub fn open(transport: Arc<dyn Transport>, context: Option<&Context>) -> Result<Self> {
        Self::with_config(transport, FetchConfig::from_env()?, context)
    }

    /// Open with explicit fetch limits.
    ///
    /// # Errors
    ///
    /// As [`Self::open`].
    pub fn with_config(
        transport: Arc<dyn Transport>,
        config: FetchConfig,
        context: Option<&Context>,
    ) -> Result<Self> {
        let resolved = effective_context(context)?;
        let context = Context::new()
            .with_project(resolved.project())?
            .with_api_token(resolved.api_token());
        Ok(Self {
            client: Client::with_config(transport, config)?,
            context,
            resolved,
        })
    }

    /// `workspace/project` path.
    #[must_use]
    pub fn project(&self) -> &str {
        self.resolved.project()
    }

    pub(crate) const fn fetcher(&self) -> &BatchFetcher {
        self.client.fetcher()
    }

    pub(crate) const fn context(&self) -> &ResolvedContext {
        &self.resolved
    }

    fn identities(&self, container: ContainerType) -> Result<ListResult<RunIdentity>> {
        let listing = self.fetcher().list_entries(
            &self.resolved,
            container,
            None,
            &SortSpec::default(),
            None,
        )?;
        Ok(ListResult {
            items: listing.rows.iter().map(|r| RunIdentity::from(&r.record)).collect(),
            warnings: listing.warnings,
        })
    }

    /// Identifiers of every run, newest first.
    ///
    /// # Errors
    ///
    /// `FetchFailed` from the backend.
    pub fn list_runs(&self) -> Result<ListResult<RunIdentity>> {
        self.identities(ContainerType::Run)
    }

    /// Identifiers of every experiment head run, newest first.
    ///
    /// # Errors
    ///
    /// `FetchFailed` from the backend.
    pub fn list_experiments(&self) -> Result<ListResult<RunIdentity>> {
        self.identities(ContainerType::Experiment)
    }

    /// Open one run.
    ///
    /// # Errors
    ///
    /// `NotFound` if nothing matches `locator`, `FetchFailed` from the
    /// backend.
    pub fn run(&self, locator: &RunLocator) -> Result<ReadOnlyRun<'_>> {
        ReadOnlyRun::open(self, locator)
    }

    /// Open runs by backend id, then by custom id.
    ///
    /// # Errors
    ///
    /// The first failing lookup.
    pub fn fetch_read_only_runs(
        &self,
        with_ids: &[&str],
        custom_ids: &[&str],
    ) -> Result<Vec<ReadOnlyRun<'_>>> {
        with_ids
            .iter()
            .map(|id| RunLocator::Id((*id).to_string()))
            .chain(custom_ids.iter().map(|id| RunLocator::CustomId((*id).to_string())))
            .map(|locator| self.run(&locator))
            .collect()
    }

    /// Open experiments by name.
    ///
    /// # Errors
    ///
    /// The first failing lookup.
    pub fn fetch_read_only_experiments(&self, names: &[&str]) -> Result<Vec<ReadOnlyRun<'_>>> {
        names
            .iter()
            .map(|name| self.run(&RunLocator::ExperimentName((*name).to_string())))
            .collect()
    }

    /// Runs table under this project's context.
    ///
    /// # Errors
    ///
    /// As [`Client::fetch_runs_table`].
    pub fn fetch_runs_table(&self, request: TableRequest) -> Result<ResultTable> {
        self.client
            .fetch_runs_table(&request.context(self.context.clone()))
    }

    /// Experiments table under this project's context.
    ///
    /// # Errors
    ///
    /// As [`Client::fetch_experiments_table`].
    pub fn fetch_experiments_table(&self, request: TableRequest) -> Result<ResultTable> {
        self.client
            .fetch_experiments_table(&request.context(self.context.clone()))
    }
}
