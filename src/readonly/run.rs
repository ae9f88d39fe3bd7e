//! Stateful view of a single run

use std::collections::BTreeMap;

use tracing::debug;

use super::cache::{CachedSeries, FetchCache};
use super::ReadOnlyProject;
use crate::attribute::{sys, Attribute, AttributeDefinition, AttributeFilter, AttributeType, Value};
use crate::experiment::{ContainerType, RunRecord, SeriesPoint};
use crate::fetch::split;
use crate::filter::Filter;
use crate::series::{SeriesAssembler, SeriesOptions, StepRange};
use crate::transport::SortSpec;
use crate::{Error, Result};

/// How to find the run behind a [`ReadOnlyRun`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunLocator {
    /// Backend id (`sys/id`)
    Id(String),
    /// User-assigned id (`sys/custom_run_id`)
    CustomId(String),
    /// Name of an experiment; opens its head run
    ExperimentName(String),
}

impl RunLocator {
    /// Locator from optional identifiers, exactly one of which must be set.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when none or more than one is given.
    pub fn from_parts(
        with_id: Option<&str>,
        custom_id: Option<&str>,
        experiment_name: Option<&str>,
    ) -> Result<Self> {
        match (with_id, custom_id, experiment_name) {
            (Some(id), None, None) => Ok(Self::Id(id.to_string())),
            (None, Some(id), None) => Ok(Self::CustomId(id.to_string())),
            (None, None, Some(name)) => Ok(Self::ExperimentName(name.to_string())),
            (None, None, None) => Err(Error::InvalidInput(
                "provide one of: run id, custom run id, experiment name".to_string(),
            )),
            _ => Err(Error::InvalidInput(
                "provide exactly one of: run id, custom run id, experiment name".to_string(),
            )),
        }
    }
}

/// A run with lazily fetched, locally cached fields.
///
/// The field structure is listed once on open. Values are fetched on first
/// access and served from the cache afterwards.
#[derive(Debug)]
pub struct ReadOnlyRun<'a> {
    project: &'a ReadOnlyProject,
    record: RunRecord,
    structure: BTreeMap<String, AttributeDefinition>,
    cache: FetchCache,
}

impl<'a> ReadOnlyRun<'a> {
    pub(super) fn open(project: &'a ReadOnlyProject, locator: &RunLocator) -> Result<Self> {
        let record = Self::locate(project, locator)?;
        let structure = project
            .fetcher()
            .list_definitions(
                project.context(),
                &[record.run_id().to_string()],
                &AttributeFilter::new(),
                0,
            )?
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect::<BTreeMap<_, _>>();
        debug!(run = record.run_id(), fields = structure.len(), "opened run");
        Ok(Self {
            project,
            record,
            structure,
            cache: FetchCache::new(),
        })
    }

    fn locate(project: &ReadOnlyProject, locator: &RunLocator) -> Result<RunRecord> {
        let fetcher = project.fetcher();
        let ctx = project.context();
        let (container, filter, what) = match locator {
            RunLocator::Id(id) => {
                return fetcher
                    .call("get run", 0, || format!("run {id}"), |t| t.get_run(ctx, id))?
                    .ok_or_else(|| Error::NotFound(format!("run with id `{id}`")));
            }
            RunLocator::CustomId(id) => (
                ContainerType::Run,
                Filter::eq(
                    Attribute::typed(sys::CUSTOM_RUN_ID, AttributeType::String),
                    id.as_str(),
                )?,
                format!("run with custom id `{id}`"),
            ),
            RunLocator::ExperimentName(name) => (
                ContainerType::Experiment,
                Filter::name_eq(name.as_str()),
                format!("experiment named `{name}`"),
            ),
        };
        fetcher
            .list_entries(ctx, container, Some(&filter), &SortSpec::default(), Some(1))?
            .rows
            .into_iter()
            .next()
            .map(|r| r.record)
            .ok_or(Error::NotFound(what))
    }

    /// The run behind this view.
    #[must_use]
    pub const fn record(&self) -> &RunRecord {
        &self.record
    }

    /// Field paths of the run, sorted.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.structure.keys().map(String::as_str)
    }

    /// Definition of the field at `path`.
    #[must_use]
    pub fn definition(&self, path: &str) -> Option<&AttributeDefinition> {
        self.structure.get(path)
    }

    /// The local cache.
    #[must_use]
    pub const fn cache(&self) -> &FetchCache {
        &self.cache
    }

    fn require(&self, path: &str) -> Result<&AttributeDefinition> {
        self.structure.get(path).ok_or_else(|| {
            Error::NotFound(format!("field `{path}` on run {}", self.record.run_id()))
        })
    }

    /// Value of the field at `path`, fetched on first access.
    ///
    /// For series fields this is the series summary (last value and
    /// aggregates), not the points; see [`Self::fetch_series`].
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown path, `FetchFailed` from the backend.
    pub fn get(&self, path: &str) -> Result<Value> {
        let definition = self.require(path)?;
        if let Some(v) = self.cache.value(self.record.run_id(), path) {
            return Ok(v);
        }
        self.fetch_into_cache(std::slice::from_ref(definition))?;
        self.cache
            .value(self.record.run_id(), path)
            .ok_or_else(|| {
                Error::NotFound(format!("value of `{path}` on run {}", self.record.run_id()))
            })
    }

    /// Fetch the values of `paths` that are not cached yet, in one batched
    /// request. Unknown paths are skipped.
    ///
    /// # Errors
    ///
    /// `FetchFailed` from the backend.
    pub fn prefetch(&self, paths: &[&str]) -> Result<()> {
        let missing: Vec<AttributeDefinition> = paths
            .iter()
            .filter(|p| !self.cache.contains_value(self.record.run_id(), p))
            .filter_map(|p| self.structure.get(*p).cloned())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        self.fetch_into_cache(&missing)
    }

    fn fetch_into_cache(&self, definitions: &[AttributeDefinition]) -> Result<()> {
        let values = self.project.fetcher().fetch_values(
            self.project.context(),
            &[self.record.run_id().to_string()],
            definitions,
        )?;
        debug!(run = self.record.run_id(), values = values.len(), "cached field values");
        for v in values {
            self.cache.insert_value(&v.run_id, v.definition.name, v.value);
        }
        Ok(())
    }

    /// Fetch and cache the points of every series among `paths`.
    ///
    /// With `use_threads` the series are fetched concurrently on the fetch
    /// worker pool, batched by the configured series batch size.
    /// `include_inherited` follows the run's ancestors; `step_range` keeps
    /// points with `left < step <= right`.
    ///
    /// # Errors
    ///
    /// `FetchFailed` from the backend.
    pub fn prefetch_series_values(
        &self,
        paths: &[&str],
        use_threads: bool,
        include_inherited: bool,
        step_range: StepRange,
    ) -> Result<()> {
        self.prefetch(paths)?;
        let series_paths: Vec<String> = paths
            .iter()
            .filter(|p| self.structure.get(**p).is_some_and(|d| d.attribute_type.is_series()))
            .map(|p| (*p).to_string())
            .collect();
        let options = SeriesOptions {
            lineage_to_the_root: include_inherited,
            step_range,
            ..SeriesOptions::default()
        };
        let assembler = SeriesAssembler::new(self.project.fetcher());
        let ctx = self.project.context();

        if use_threads {
            let fetched = assembler.fetch_many(
                ctx,
                std::slice::from_ref(&self.record),
                &series_paths,
                &options,
            )?;
            for s in fetched {
                self.store_series(s.attribute, s.points, &options);
            }
        } else {
            let config = self.project.fetcher().config();
            for batch in split::series_batches(&series_paths, String::as_str, config) {
                for path in batch {
                    let points = assembler.fetch(ctx, &self.record, &path, &options)?;
                    self.store_series(path, points, &options);
                }
            }
        }
        Ok(())
    }

    fn store_series(&self, path: String, points: Vec<SeriesPoint>, options: &SeriesOptions) {
        self.cache.insert_series(
            self.record.run_id(),
            path,
            CachedSeries {
                points,
                include_inherited: options.lineage_to_the_root,
                step_range: options.step_range,
            },
        );
    }

    /// Points of the series at `path`, from the cache when prefetched,
    /// otherwise fetched with inherited points and no step window.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown path, `InvalidInput` if the field is not a
    /// series, `FetchFailed` from the backend.
    pub fn fetch_series(&self, path: &str) -> Result<Vec<SeriesPoint>> {
        let definition = self.require(path)?;
        if !definition.attribute_type.is_series() {
            return Err(Error::InvalidInput(format!(
                "field `{path}` is {}, not a series",
                definition.attribute_type
            )));
        }
        if let Some(cached) = self.cache.series(self.record.run_id(), path) {
            return Ok(cached.points);
        }
        let options = SeriesOptions::default();
        let points = SeriesAssembler::new(self.project.fetcher()).fetch(
            self.project.context(),
            &self.record,
            path,
            &options,
        )?;
        self.store_series(path.to_string(), points.clone(), &options);
        Ok(points)
    }

    /// Forget the cached value and points of `path`.
    pub fn remove(&self, path: &str) -> bool {
        self.cache.remove(self.record.run_id(), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_requires_exactly_one() {
        assert_eq!(
            RunLocator::from_parts(Some("RUN-1"), None, None).unwrap(),
            RunLocator::Id("RUN-1".into())
        );
        assert_eq!(
            RunLocator::from_parts(None, None, Some("exp")).unwrap(),
            RunLocator::ExperimentName("exp".into())
        );
        assert!(matches!(
            RunLocator::from_parts(None, None, None),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            RunLocator::from_parts(Some("a"), Some("b"), None),
            Err(Error::InvalidInput(_))
        ));
    }
}
