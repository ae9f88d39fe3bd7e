//! Series assembly across fork/restart lineage
//!
//! Toyota Way: Genchi Genbutsu. Points are read from every run that
//! logged them, then merged by explicit rules:
//!
//! 1. each run's previews are resolved against its own committed points
//! 2. lineage segments merge with the descendant winning at equal step
//! 3. the step range and tail limit apply to the merged sequence
//!
//! A forked run inherits ancestor points only up to its `fork_step`.

pub mod merge;

use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::experiment::{RunRecord, SeriesPoint};
use crate::fetch::{split, BatchFetcher};
use crate::context::ResolvedContext;
use crate::Result;

/// Step window: `left < step <= right`, open where `None`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StepRange {
    /// Exclusive lower bound
    pub left: Option<f64>,
    /// Inclusive upper bound
    pub right: Option<f64>,
}

impl StepRange {
    /// Window with the given bounds.
    #[must_use]
    pub const fn new(left: Option<f64>, right: Option<f64>) -> Self {
        Self { left, right }
    }

    /// Unbounded window.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            left: None,
            right: None,
        }
    }

    /// Whether `step` lies in the window.
    #[must_use]
    pub fn contains(&self, step: f64) -> bool {
        self.left.map_or(true, |l| step > l) && self.right.map_or(true, |r| step <= r)
    }

    /// Window with the upper bound lowered to `cap`.
    #[must_use]
    pub fn capped(self, cap: Option<f64>) -> Self {
        let right = match (self.right, cap) {
            (Some(r), Some(c)) => Some(r.min(c)),
            (r, c) => r.or(c),
        };
        Self { right, ..self }
    }
}

/// How series are assembled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesOptions {
    /// Include points inherited from ancestor runs
    pub lineage_to_the_root: bool,
    /// Keep preview points
    pub include_point_previews: bool,
    /// Step window
    pub step_range: StepRange,
    /// Keep only the last N steps
    pub tail_limit: Option<usize>,
}

impl Default for SeriesOptions {
    fn default() -> Self {
        Self {
            lineage_to_the_root: true,
            include_point_previews: false,
            step_range: StepRange::all(),
            tail_limit: None,
        }
    }
}

/// Assembled points for one (run, attribute) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSeries {
    /// Target run
    pub run: RunRecord,
    /// Series attribute path
    pub attribute: String,
    /// Merged points, ordered by step
    pub points: Vec<SeriesPoint>,
}

/// A run plus the ancestors it inherits from, each with its inheritance cap.
type Lineage = Vec<(RunRecord, Option<f64>)>;

/// Fetches and merges series points.
pub struct SeriesAssembler<'a> {
    fetcher: &'a BatchFetcher,
}

impl<'a> SeriesAssembler<'a> {
    /// Assembler over `fetcher`.
    #[must_use]
    pub const fn new(fetcher: &'a BatchFetcher) -> Self {
        Self { fetcher }
    }

    /// Walk `parent_id` links from `run` to the root.
    ///
    /// Each entry carries the highest ancestor step the target inherits
    /// (the smallest fork step on the path), `None` for the target itself.
    /// A missing ancestor ends the walk; a cycle is logged and cut.
    ///
    /// # Errors
    ///
    /// `FetchFailed` if an ancestor lookup exhausts its retries.
    pub fn lineage(&self, ctx: &ResolvedContext, run: &RunRecord) -> Result<Lineage> {
        let mut chain = vec![(run.clone(), None)];
        let mut visited = FxHashSet::default();
        visited.insert(run.run_id().to_string());
        let mut cap: Option<f64> = None;
        let mut current = run.clone();

        while let Some(parent_id) = current.parent_id().map(str::to_string) {
            if !visited.insert(parent_id.clone()) {
                warn!(run = run.run_id(), ancestor = %parent_id, "lineage cycle, stopping walk");
                break;
            }
            cap = match (cap, current.fork_step()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let parent = self.fetcher.call(
                "get run",
                0,
                || format!("ancestor {parent_id} of {}", run.run_id()),
                |t| t.get_run(ctx, &parent_id),
            )?;
            let Some(parent) = parent else {
                debug!(run = run.run_id(), ancestor = %parent_id, "ancestor not found, lineage ends");
                break;
            };
            chain.push((parent.clone(), cap));
            current = parent;
        }
        Ok(chain)
    }

    fn assemble(
        &self,
        ctx: &ResolvedContext,
        lineage: &[(RunRecord, Option<f64>)],
        attribute: &str,
        options: &SeriesOptions,
    ) -> Result<Vec<SeriesPoint>> {
        let segments = lineage
            .iter()
            .map(|(run, cap)| {
                let range = options.step_range.capped(*cap);
                let points = self.fetcher.call(
                    "series",
                    0,
                    || format!("{attribute} on run {}", run.run_id()),
                    |t| t.get_series(ctx, run.run_id(), attribute, range),
                )?;
                Ok(merge::resolve_previews(points, options.include_point_previews))
            })
            .collect::<Result<Vec<_>>>()?;

        let merged = merge::merge_lineage(segments);
        let ranged = merge::apply_step_range(merged, options.step_range);
        Ok(match options.tail_limit {
            Some(n) => merge::apply_tail(ranged, n),
            None => ranged,
        })
    }

    /// Points of `attribute` for `run`.
    ///
    /// An attribute the run (and its lineage) never logged yields an empty
    /// sequence.
    ///
    /// # Errors
    ///
    /// `FetchFailed` if any series or lineage call exhausts its retries.
    pub fn fetch(
        &self,
        ctx: &ResolvedContext,
        run: &RunRecord,
        attribute: &str,
        options: &SeriesOptions,
    ) -> Result<Vec<SeriesPoint>> {
        let lineage = if options.lineage_to_the_root {
            self.lineage(ctx, run)?
        } else {
            vec![(run.clone(), None)]
        };
        self.assemble(ctx, &lineage, attribute, options)
    }

    /// Points of every attribute for every run, fetched concurrently.
    ///
    /// Output order is runs-major, attributes-minor, as given. Any failure
    /// aborts the whole call.
    ///
    /// # Errors
    ///
    /// `FetchFailed` from the first failing call.
    pub fn fetch_many(
        &self,
        ctx: &ResolvedContext,
        runs: &[RunRecord],
        attributes: &[String],
        options: &SeriesOptions,
    ) -> Result<Vec<RunSeries>> {
        let lineages: Vec<Lineage> = self.fetcher.install(|| {
            runs.par_iter()
                .map(|run| {
                    if options.lineage_to_the_root {
                        self.lineage(ctx, run)
                    } else {
                        Ok(vec![(run.clone(), None)])
                    }
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let pairs: Vec<(usize, &str)> = (0..runs.len())
            .flat_map(|i| attributes.iter().map(move |a| (i, a.as_str())))
            .collect();
        let batches = split::series_batches(&pairs, |(_, a)| *a, self.fetcher.config());
        debug!(pairs = pairs.len(), batches = batches.len(), "fetching series");

        let results: Vec<Vec<RunSeries>> = self.fetcher.install(|| {
            batches
                .par_iter()
                .map(|batch| {
                    batch
                        .par_iter()
                        .map(|&(i, attribute)| {
                            let points = self.assemble(ctx, &lineages[i], attribute, options)?;
                            Ok(RunSeries {
                                run: runs[i].clone(),
                                attribute: attribute.to_string(),
                                points,
                            })
                        })
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(results.into_iter().flatten().collect())
    }
}
