//! Segment selection policy for disk cleaning.
//!
//! Candidates are ranked by a cost-benefit score: for a segment with live
//! fraction `u` and age `age`,
//!
//! ```text
//! score = ((1 - u) * age) / (1 + u)
//! ```
//!
//! `(1 - u)` is the space reclaimable per unit of relocation work,
//! `(1 + u)` penalizes copying live bytes, and `age` prefers old segments
//! whose remaining data is unlikely to die soon.
//!
//! ## Invariants
//!
//! - A segment's score must not change within one sort: `now` is captured
//!   once per sort and every segment's `(live_bytes, capacity, creation
//!   timestamp)` is snapshotted before comparisons begin. Re-reading any
//!   input mid-sort can produce `A < B, B < C, C < A`.

use std::sync::Arc;

use crate::segment::LogSegment;

/// Computes a segment's cost-benefit score from snapshotted inputs.
///
/// A segment with no live bytes is infinitely attractive: it frees space
/// for zero relocation work.
#[must_use]
pub fn cost_benefit_score(live_bytes: u64, capacity: u64, age_secs: u64) -> f64 {
    if capacity == 0 || live_bytes == 0 {
        return f64::INFINITY;
    }
    let u = live_bytes as f64 / capacity as f64;
    ((1.0 - u) * age_secs as f64) / (1.0 + u)
}

/// Sorts candidates best-first by cost-benefit score.
///
/// Inputs are snapshotted once against the single `now` before sorting,
/// keeping the ordering total even while live-byte accounting moves
/// underneath.
pub fn sort_by_cost_benefit(segments: &mut [Arc<LogSegment>], now: u32) {
    let mut scored: Vec<(f64, Arc<LogSegment>)> = segments
        .iter()
        .map(|s| {
            let age = u64::from(now.saturating_sub(s.creation_timestamp()));
            (
                cost_benefit_score(s.live_bytes(), s.capacity(), age),
                Arc::clone(s),
            )
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    for (slot, (_, segment)) in segments.iter_mut().zip(scored) {
        *slot = segment;
    }
}
