//! Request splitting under query-size and item-count limits
//!
//! Identifiers travel inside the request body, so every batch is bounded
//! by [`FetchConfig::query_size_limit`] bytes. A run id is counted as a
//! fixed 50 bytes; an attribute as the UTF-8 length of its name.

use crate::attribute::AttributeDefinition;
use crate::config::FetchConfig;

/// Bytes charged per run id.
pub const RUN_ID_SIZE: usize = 50;

const fn ceil_div(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

/// Split run ids into evenly sized batches that fit the query limit.
///
/// Batches are balanced: 101 ids under a limit of 100 become 51 + 50,
/// not 100 + 1.
#[must_use]
pub fn split_run_ids(run_ids: &[String], config: &FetchConfig) -> Vec<Vec<String>> {
    if run_ids.is_empty() {
        return Vec::new();
    }
    let per_batch = (config.query_size_limit() / RUN_ID_SIZE).max(1);
    let batches = ceil_div(run_ids.len(), per_batch);
    let size = ceil_div(run_ids.len(), batches);
    run_ids.chunks(size).map(<[String]>::to_vec).collect()
}

fn split_definitions(
    definitions: &[AttributeDefinition],
    byte_limit: usize,
    count_limit: usize,
) -> Vec<Vec<AttributeDefinition>> {
    let mut batches = Vec::new();
    let mut current: Vec<AttributeDefinition> = Vec::new();
    let mut bytes = 0;
    for def in definitions {
        let size = def.name.len();
        if !current.is_empty() && (current.len() >= count_limit || bytes + size > byte_limit) {
            batches.push(std::mem::take(&mut current));
            bytes = 0;
        }
        current.push(def.clone());
        bytes += size;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Split a (runs × definitions) value request.
///
/// Each yielded pair satisfies: run-id bytes plus definition-name bytes
/// fit the query limit, and run count times definition count stays within
/// [`FetchConfig::attribute_values_batch_size`]. A single oversized run or
/// attribute still gets a batch of its own.
#[must_use]
pub fn split_run_ids_attributes(
    run_ids: &[String],
    definitions: &[AttributeDefinition],
    config: &FetchConfig,
) -> Vec<(Vec<String>, Vec<AttributeDefinition>)> {
    if definitions.is_empty() || run_ids.is_empty() {
        return Vec::new();
    }
    let limit = config.query_size_limit();
    let values_limit = config.attribute_values_batch_size();

    // leave room for at least one run id next to every definition batch
    let def_batches = split_definitions(
        definitions,
        limit.saturating_sub(RUN_ID_SIZE),
        values_limit,
    );
    let widest_bytes = def_batches
        .iter()
        .map(|b| b.iter().map(|d| d.name.len()).sum::<usize>())
        .max()
        .unwrap_or(0);
    let widest_len = def_batches.iter().map(Vec::len).max().unwrap_or(1);

    let mut out = Vec::new();
    let mut runs: Vec<String> = Vec::new();
    let mut bytes = widest_bytes;
    let flush = |runs: Vec<String>, out: &mut Vec<_>| {
        for defs in &def_batches {
            out.push((runs.clone(), defs.clone()));
        }
    };
    for id in run_ids {
        if !runs.is_empty()
            && ((runs.len() + 1) * widest_len > values_limit || bytes + RUN_ID_SIZE > limit)
        {
            flush(std::mem::take(&mut runs), &mut out);
            bytes = widest_bytes;
        }
        runs.push(id.clone());
        bytes += RUN_ID_SIZE;
    }
    if !runs.is_empty() {
        flush(runs, &mut out);
    }
    out
}

/// Split series requests by name bytes and
/// [`FetchConfig::series_batch_size`].
#[must_use]
pub fn series_batches<T: Clone>(
    items: &[T],
    name: impl Fn(&T) -> &str,
    config: &FetchConfig,
) -> Vec<Vec<T>> {
    let limit = config.query_size_limit();
    let count = config.series_batch_size();
    let mut batches = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut bytes = 0;
    for item in items {
        let size = name(item).len();
        if !current.is_empty() && (current.len() >= count || bytes + size > limit) {
            batches.push(std::mem::take(&mut current));
            bytes = 0;
        }
        current.push(item.clone());
        bytes += size;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
