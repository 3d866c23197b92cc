//! Junction cleaner: committing each junction traversal to one lane
//!
//! Inside a junction the raw labeller may place a vehicle on different
//! internal lanes across successive ticks, producing spurious lane changes.
//! This pass walks every vehicle's lane progression, accumulates consecutive
//! junction ticks, and when the vehicle leaves the junction decides which
//! internal lane the whole traversal should have been labelled with:
//!
//! 1. traversal at the run boundary (no lane before or after) — the most
//!    frequent accumulated lane wins;
//! 2. same lane before and after (an outlier inside a multi-lane road) — the
//!    surrounding lane wins;
//! 3. the unique lane connecting the lane before to the lane after
//!    (`successors ∩ predecessors`);
//! 4. a one-step detour (`successors² ∩ predecessors`), first match in stored
//!    successor order, for layouts like roundabouts with intra-road
//!    connections;
//! 5. otherwise the labels stay untouched.
//!
//! The pass mutates only `(road_id, lane_id)` on the affected raw positions.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use tracing::debug;

use crate::map::{LaneIdx, MapError, RoadNetwork};
use crate::trace::{ActorId, RawActor, RawTick};

/// Errors raised by the junction cleaner.
#[derive(Debug, thiserror::Error)]
pub enum CleanError {
    /// A lane rewrite targeted a tick with no position for the vehicle.
    #[error("inconsistent trace: no position for actor {actor} at tick index {tick_index}")]
    InconsistentTrace {
        /// The vehicle whose position vanished.
        actor: ActorId,
        /// Index of the tick with the missing position.
        tick_index: usize,
    },
    /// A raw position referenced a lane the static data does not declare.
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Repair junction-internal lane labels for every vehicle in the run.
pub fn clean_junction_data(
    ticks: &mut [RawTick],
    network: &RoadNetwork,
) -> Result<(), CleanError> {
    let mut vehicle_ids = BTreeSet::new();
    for tick in ticks.iter() {
        for pos in &tick.actor_positions {
            if matches!(pos.actor, RawActor::Vehicle { .. }) {
                vehicle_ids.insert(pos.actor.id());
            }
        }
    }

    for id in vehicle_ids {
        clean_vehicle(ticks, network, id)?;
    }
    Ok(())
}

/// `(lane, on_junction)` per tick, absent where the vehicle is not observed.
fn lane_progression(
    ticks: &[RawTick],
    network: &RoadNetwork,
    id: ActorId,
) -> Result<Vec<Option<(LaneIdx, bool)>>, CleanError> {
    ticks
        .iter()
        .map(|tick| match tick.position_of(id) {
            Some(pos) => {
                let lane = network.find_lane(pos.road_id, pos.lane_id)?;
                Ok(Some((lane, network.lane_on_junction(lane))))
            }
            None => Ok(None),
        })
        .collect()
}

fn clean_vehicle(
    ticks: &mut [RawTick],
    network: &RoadNetwork,
    id: ActorId,
) -> Result<(), CleanError> {
    let progression = lane_progression(ticks, network, id)?;

    let mut previous_multilane: Option<LaneIdx> = None;
    // (tick index, labelled lane) for the junction traversal being walked.
    let mut current_junction: Vec<(usize, LaneIdx)> = Vec::new();

    for (i, entry) in progression.iter().enumerate() {
        match *entry {
            Some((lane, true)) => current_junction.push((i, lane)),
            Some((lane, false)) => {
                if !current_junction.is_empty() {
                    resolve_junction(
                        ticks,
                        network,
                        id,
                        &current_junction,
                        previous_multilane,
                        Some(lane),
                    )?;
                    current_junction.clear();
                }
                previous_multilane = Some(lane);
            }
            // The vehicle dropped out of the trace: treat it like a run
            // boundary for the accumulated traversal.
            None => {
                if !current_junction.is_empty() {
                    resolve_junction(
                        ticks,
                        network,
                        id,
                        &current_junction,
                        previous_multilane,
                        None,
                    )?;
                    current_junction.clear();
                }
                previous_multilane = None;
            }
        }
    }

    if !current_junction.is_empty() {
        resolve_junction(ticks, network, id, &current_junction, previous_multilane, None)?;
    }
    Ok(())
}

fn resolve_junction(
    ticks: &mut [RawTick],
    network: &RoadNetwork,
    id: ActorId,
    accumulated: &[(usize, LaneIdx)],
    previous_multilane: Option<LaneIdx>,
    next_multilane: Option<LaneIdx>,
) -> Result<(), CleanError> {
    let first = accumulated[0].1;
    if accumulated.iter().all(|&(_, lane)| lane == first) {
        return Ok(());
    }

    let new_lane = match (previous_multilane, next_multilane) {
        (None, _) | (_, None) => Some(most_frequent_lane(accumulated)),
        (Some(prev), Some(next)) if prev == next => Some(prev),
        (Some(prev), Some(next)) => connecting_lane(network, prev, next),
    };

    let Some(new_lane) = new_lane else {
        debug!(actor = id, ticks = accumulated.len(), "junction traversal left unresolved");
        return Ok(());
    };

    let road_id = network.road_of_lane(new_lane).id;
    let lane_id = network.lane(new_lane).lane_id;
    debug!(
        actor = id,
        ticks = accumulated.len(),
        road_id,
        lane_id,
        "rewriting junction traversal"
    );
    for &(tick_index, _) in accumulated {
        let pos = ticks[tick_index]
            .position_of_mut(id)
            .ok_or(CleanError::InconsistentTrace { actor: id, tick_index })?;
        pos.road_id = road_id;
        pos.lane_id = lane_id;
    }
    Ok(())
}

/// The accumulator's most frequent lane; ties go to the lane seen first.
fn most_frequent_lane(accumulated: &[(usize, LaneIdx)]) -> LaneIdx {
    let mut counts: Vec<(LaneIdx, usize)> = Vec::new();
    for &(_, lane) in accumulated {
        match counts.iter_mut().find(|(l, _)| *l == lane) {
            Some((_, n)) => *n += 1,
            None => counts.push((lane, 1)),
        }
    }
    let mut best = counts[0];
    for &cand in &counts[1..] {
        if cand.1 > best.1 {
            best = cand;
        }
    }
    best.0
}

/// The junction lane connecting `prev` to `next`: the unique direct
/// successor∩predecessor, else the first one-step detour.
fn connecting_lane(network: &RoadNetwork, prev: LaneIdx, next: LaneIdx) -> Option<LaneIdx> {
    let preds = &network.lane(next).predecessors;

    let direct: Vec<LaneIdx> = network
        .lane(prev)
        .successors
        .iter()
        .copied()
        .filter(|s| preds.contains(s))
        .collect();
    if direct.len() == 1 {
        return Some(direct[0]);
    }

    for &s in &network.lane(prev).successors {
        for &s2 in &network.lane(s).successors {
            if preds.contains(&s2) {
                return Some(s2);
            }
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{
        BlockDescriptor, LaneDescriptor, LaneRefDescriptor, LaneType, RoadDescriptor,
    };
    use crate::trace::{RawActorPosition, SimTime, Vec3};

    fn lane_ref(road_id: i64, lane_id: i32) -> LaneRefDescriptor {
        LaneRefDescriptor { road_id, lane_id }
    }

    fn lane(
        lane_id: i32,
        successors: Vec<LaneRefDescriptor>,
        predecessors: Vec<LaneRefDescriptor>,
    ) -> LaneDescriptor {
        LaneDescriptor {
            lane_id,
            lane_type: LaneType::Driving,
            successor_lanes: successors,
            predecessor_lanes: predecessors,
            speed_limits: Vec::new(),
        }
    }

    /// Road 1 → junction road 7 (internal lanes 1 and 2, both connecting
    /// road 1 to road 2) → road 2.
    fn junction_map() -> RoadNetwork {
        let desc = vec![
            BlockDescriptor {
                id: "in".into(),
                roads: vec![RoadDescriptor {
                    road_id: 1,
                    is_junction: false,
                    lanes: vec![lane(
                        -1,
                        vec![lane_ref(7, 1), lane_ref(7, 2)],
                        vec![],
                    )],
                }],
            },
            BlockDescriptor {
                id: "junction".into(),
                roads: vec![RoadDescriptor {
                    road_id: 7,
                    is_junction: true,
                    lanes: vec![
                        lane(1, vec![lane_ref(2, -1)], vec![lane_ref(1, -1)]),
                        lane(2, vec![], vec![lane_ref(1, -1)]),
                    ],
                }],
            },
            BlockDescriptor {
                id: "out".into(),
                roads: vec![RoadDescriptor {
                    road_id: 2,
                    is_junction: false,
                    lanes: vec![lane(-1, vec![], vec![lane_ref(7, 1)])],
                }],
            },
        ];
        RoadNetwork::build(&desc).unwrap()
    }

    fn tick(t: f64, road_id: i64, lane_id: i32) -> RawTick {
        RawTick {
            current_tick: SimTime(t),
            actor_positions: vec![RawActorPosition {
                actor: RawActor::Vehicle { id: 1, ego_vehicle: true },
                road_id,
                lane_id,
                position_on_lane: 0.0,
                location: Vec3::ZERO,
            }],
        }
    }

    fn labels(ticks: &[RawTick]) -> Vec<(i64, i32)> {
        ticks
            .iter()
            .map(|t| {
                let p = t.position_of(1).unwrap();
                (p.road_id, p.lane_id)
            })
            .collect()
    }

    #[test]
    fn outlier_between_identical_multilanes_takes_surrounding_lane() {
        let net = junction_map();
        // Road 1 before and after; junction labels flap between lanes 1 and 2.
        let mut ticks = vec![
            tick(0.0, 1, -1),
            tick(0.1, 7, 1),
            tick(0.2, 7, 2),
            tick(0.3, 7, 1),
            tick(0.4, 7, 1),
            tick(0.5, 7, 1),
            tick(0.6, 1, -1),
        ];
        clean_junction_data(&mut ticks, &net).unwrap();
        // previous == next → every junction tick rewritten to road 1, lane -1.
        assert_eq!(
            labels(&ticks),
            vec![(1, -1), (1, -1), (1, -1), (1, -1), (1, -1), (1, -1), (1, -1)]
        );
    }

    #[test]
    fn traversal_commits_to_the_connecting_lane() {
        let net = junction_map();
        // Road 1 → junction (mislabelled to lane 2 mid-way) → road 2. Only
        // junction lane 1 connects road 1 to road 2.
        let mut ticks = vec![
            tick(0.0, 1, -1),
            tick(0.1, 7, 1),
            tick(0.2, 7, 2),
            tick(0.3, 7, 1),
            tick(0.4, 2, -1),
        ];
        clean_junction_data(&mut ticks, &net).unwrap();
        assert_eq!(
            labels(&ticks),
            vec![(1, -1), (7, 1), (7, 1), (7, 1), (2, -1)]
        );
    }

    #[test]
    fn boundary_traversal_takes_the_majority_lane() {
        let net = junction_map();
        // Run starts inside the junction: no previous multilane.
        let mut ticks = vec![
            tick(0.0, 7, 2),
            tick(0.1, 7, 1),
            tick(0.2, 7, 2),
            tick(0.3, 2, -1),
        ];
        clean_junction_data(&mut ticks, &net).unwrap();
        assert_eq!(labels(&ticks), vec![(7, 2), (7, 2), (7, 2), (2, -1)]);
    }

    #[test]
    fn consistent_traversal_is_untouched() {
        let net = junction_map();
        let mut ticks = vec![
            tick(0.0, 1, -1),
            tick(0.1, 7, 2),
            tick(0.2, 7, 2),
            tick(0.3, 2, -1),
        ];
        clean_junction_data(&mut ticks, &net).unwrap();
        // All junction ticks already agree; lane 2 does not even reach road
        // 2, but agreement short-circuits any resolution.
        assert_eq!(labels(&ticks), vec![(1, -1), (7, 2), (7, 2), (2, -1)]);
    }
}
