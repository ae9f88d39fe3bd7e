//! Pure point-merging rules for series assembly
//!
//! Input segments are ordered target first, then each ancestor, and each
//! segment is ordered by step.

use std::cmp::Ordering;

use super::StepRange;
use crate::experiment::SeriesPoint;

/// Merge lineage segments: at any step present in several segments, only
/// the points of the nearest (lowest-index) segment survive.
///
/// The result is ordered by step. Points that share a step within one
/// segment keep their logged order.
#[must_use]
pub fn merge_lineage(segments: Vec<Vec<SeriesPoint>>) -> Vec<SeriesPoint> {
    let mut tagged: Vec<(usize, SeriesPoint)> = segments
        .into_iter()
        .enumerate()
        .flat_map(|(depth, points)| points.into_iter().map(move |p| (depth, p)))
        .collect();
    tagged.sort_by(|(da, a), (db, b)| a.step().total_cmp(&b.step()).then(da.cmp(db)));

    let mut out: Vec<SeriesPoint> = Vec::with_capacity(tagged.len());
    let mut owner: Option<(f64, usize)> = None;
    for (depth, point) in tagged {
        match owner {
            Some((step, d)) if step.total_cmp(&point.step()) == Ordering::Equal => {
                if depth == d {
                    out.push(point);
                }
            }
            _ => {
                owner = Some((point.step(), depth));
                out.push(point);
            }
        }
    }
    out
}

/// Resolve preview points step by step.
///
/// At each step the last committed point is authoritative. Previews at a
/// step with a committed point are kept only when `include_previews` is
/// set, ahead of the committed point. A step with previews only keeps its
/// latest preview when `include_previews` is set, and is dropped otherwise.
#[must_use]
pub fn resolve_previews(points: Vec<SeriesPoint>, include_previews: bool) -> Vec<SeriesPoint> {
    let mut out = Vec::with_capacity(points.len());
    let mut iter = points.into_iter().peekable();
    while let Some(first) = iter.next() {
        let step = first.step();
        let mut group = vec![first];
        while let Some(next) = iter.next_if(|p| p.step().total_cmp(&step) == Ordering::Equal) {
            group.push(next);
        }
        let (previews, committed): (Vec<_>, Vec<_>) =
            group.into_iter().partition(SeriesPoint::is_preview);
        match committed.into_iter().last() {
            Some(authoritative) => {
                if include_previews {
                    out.extend(previews);
                }
                out.push(authoritative);
            }
            None if include_previews => out.extend(previews.into_iter().last()),
            None => {}
        }
    }
    out
}

/// Keep points inside `range`.
#[must_use]
pub fn apply_step_range(points: Vec<SeriesPoint>, range: StepRange) -> Vec<SeriesPoint> {
    points.into_iter().filter(|p| range.contains(p.step())).collect()
}

/// Keep the points at the last `n` distinct steps.
#[must_use]
pub fn apply_tail(points: Vec<SeriesPoint>, n: usize) -> Vec<SeriesPoint> {
    let mut distinct = 0;
    let mut cut = points.len();
    let mut last_step: Option<f64> = None;
    for (i, p) in points.iter().enumerate().rev() {
        if last_step.map_or(true, |s| s.total_cmp(&p.step()) != Ordering::Equal) {
            if distinct == n {
                break;
            }
            distinct += 1;
            last_step = Some(p.step());
        }
        cut = i;
    }
    points.into_iter().skip(cut).collect()
}
