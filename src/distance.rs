//! Distance oracle: mapping metre budgets onto tick indices
//!
//! Cumulative ego path length is measured per step: along one road it is the
//! lane-position delta (which survives curved geometry), across a road change
//! it falls back to the Euclidean distance between the two world locations.
//!
//! Both helpers operate on converted, ego-tagged timelines.

#![forbid(unsafe_code)]

use crate::map::RoadNetwork;
use crate::trace::{TickData, Vehicle};

/// The ego view of a converted tick.
///
/// # Panics
///
/// Panics if the tick carries no ego; callers validate timelines before
/// walking them (see `Segmenter::segment`).
fn ego(tick: &TickData) -> &Vehicle {
    tick.ego().expect("converted timeline tick carries an ego")
}

/// The earliest index after `start` whose cumulative ego path length reaches
/// `meters`, together with the distance actually covered.
///
/// Reaching the end of the timeline returns the last index and whatever
/// distance accumulated by then.
pub fn index_at_distance(
    ticks: &[TickData],
    network: &RoadNetwork,
    start: usize,
    meters: f64,
) -> (usize, f64) {
    if ticks.is_empty() {
        return (0, 0.0);
    }
    let mut acc = 0.0;
    let mut i = start.min(ticks.len() - 1);
    while i + 1 < ticks.len() {
        i += 1;
        let prev = ego(&ticks[i - 1]);
        let cur = ego(&ticks[i]);
        let same_road = network.lane(prev.lane).road == network.lane(cur.lane).road;
        acc += if same_road {
            (cur.position_on_lane - prev.position_on_lane).abs()
        } else {
            cur.location.distance_to(prev.location)
        };
        if acc >= meters {
            return (i, acc);
        }
    }
    (i, acc)
}

/// The latest index from which `meters` of remaining path still exist,
/// scanning from the end backwards by straight-line distance to the final
/// location; 0 if no index qualifies.
pub fn last_valid_start(ticks: &[TickData], meters: f64) -> usize {
    let Some(final_tick) = ticks.last() else { return 0 };
    let final_location = ego(final_tick).location;
    for i in (0..ticks.len() - 1).rev() {
        if ego(&ticks[i]).location.distance_to(final_location) >= meters {
            return i;
        }
    }
    0
}

// ============================================================================
// Tests
// ============================================================================
