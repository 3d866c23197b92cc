//! Dynamic trace data: raw input records, converted actors, ticks, segments
//!
//! Two layers live here. The **raw** layer (`RawTick`, `RawActorPosition`,
//! `RawActor`) is the serde target for the dynamic JSON documents and is
//! mutable only during junction cleaning, which may rewrite a position's
//! `(road_id, lane_id)`. The **converted** layer (`TickData`, [`Actor`],
//! [`Vehicle`]) is what the segmenter works on: lane references resolved into
//! the road-network arena, kinematics filled in, one designated ego per tick.
//!
//! Actors are a tagged enum rather than trait objects: every concrete kind is
//! a variant, exhaustively matchable, with the shared base view (`id`,
//! `location`) exposed through accessors.
//!
//! `TickData::clone` is a deep copy. All per-tick data is owned; lanes and
//! roads stay shared through arena indices, so cloning a timeline never
//! duplicates the map and mutating one timeline never disturbs another.

#![forbid(unsafe_code)]

use std::ops::{Add, Div, Mul, Sub};

use serde::{Deserialize, Serialize};

use crate::map::LaneIdx;

/// Stable actor identifier, unique within one simulation run.
pub type ActorId = u64;

// ============================================================================
// Geometry & time
// ============================================================================

/// A point or vector in simulator world coordinates (metres).
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    /// East-ish component.
    pub x: f64,
    /// North-ish component.
    pub y: f64,
    /// Up component.
    pub z: f64,
}

impl Vec3 {
    /// The zero vector.
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    /// Construct from components.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vec3 { x, y, z }
    }

    /// Euclidean length.
    pub fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Euclidean distance to another point.
    pub fn distance_to(self, other: Vec3) -> f64 {
        (self - other).norm()
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f64> for Vec3 {
    type Output = Vec3;
    fn div(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

/// A simulation timestamp, in seconds since the start of the recording.
#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(pub f64);

impl SimTime {
    /// Seconds elapsed since `earlier` (negative if `earlier` is later).
    pub fn seconds_since(self, earlier: SimTime) -> f64 {
        self.0 - earlier.0
    }
}

// ============================================================================
// Raw input records
// ============================================================================

/// The actor descriptor attached to a raw position, tagged by kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RawActor {
    /// A car, truck, bike, ….
    #[serde(rename_all = "camelCase")]
    Vehicle {
        /// Actor id.
        id: ActorId,
        /// Whether the recorder tagged this vehicle as the ego.
        #[serde(default)]
        ego_vehicle: bool,
    },
    /// A walking person.
    #[serde(rename_all = "camelCase")]
    Pedestrian {
        /// Actor id.
        id: ActorId,
    },
    /// A traffic light.
    #[serde(rename_all = "camelCase")]
    TrafficLight {
        /// Actor id.
        id: ActorId,
        /// Current light state as the simulator reports it.
        #[serde(default)]
        state: Option<String>,
    },
    /// A static traffic sign.
    #[serde(rename_all = "camelCase")]
    TrafficSign {
        /// Actor id.
        id: ActorId,
        /// Sign kind as the simulator reports it.
        #[serde(default)]
        sign_type: Option<String>,
    },
}

impl RawActor {
    /// The actor id, independent of kind.
    pub fn id(&self) -> ActorId {
        match self {
            RawActor::Vehicle { id, .. }
            | RawActor::Pedestrian { id }
            | RawActor::TrafficLight { id, .. }
            | RawActor::TrafficSign { id, .. } => *id,
        }
    }
}

/// Where one actor is at one tick. `road_id`/`lane_id` may be rewritten by
/// the junction cleaner; everything else is read-only after decode.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawActorPosition {
    /// The actor this position belongs to.
    pub actor: RawActor,
    /// Road the labeller placed the actor on.
    pub road_id: i64,
    /// Lane the labeller placed the actor on.
    pub lane_id: i32,
    /// Metres along the lane.
    pub position_on_lane: f64,
    /// World location.
    pub location: Vec3,
}

/// One timestamped snapshot of every actor, as decoded from the dynamic
/// document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTick {
    /// Timestamp of the snapshot.
    pub current_tick: SimTime,
    /// All actor positions at this timestamp.
    pub actor_positions: Vec<RawActorPosition>,
}

impl RawTick {
    /// The position record for `id`, if the actor is present at this tick.
    pub fn position_of(&self, id: ActorId) -> Option<&RawActorPosition> {
        self.actor_positions.iter().find(|p| p.actor.id() == id)
    }

    /// Mutable variant of [`RawTick::position_of`], used by the cleaner.
    pub fn position_of_mut(&mut self, id: ActorId) -> Option<&mut RawActorPosition> {
        self.actor_positions.iter_mut().find(|p| p.actor.id() == id)
    }
}

// ============================================================================
// Converted actors & ticks
// ============================================================================

/// A vehicle after conversion: lane resolved, kinematics filled.
#[derive(Clone, Debug, PartialEq)]
pub struct Vehicle {
    /// Actor id.
    pub id: ActorId,
    /// World location.
    pub location: Vec3,
    /// Whether this vehicle anchors the current timeline.
    pub is_ego: bool,
    /// Velocity derived from successive locations, m/s.
    pub velocity: Vec3,
    /// Acceleration derived from successive velocities, m/s².
    pub acceleration: Vec3,
    /// The lane the vehicle is on.
    pub lane: LaneIdx,
    /// Metres along that lane.
    pub position_on_lane: f64,
}

impl Vehicle {
    /// Speed magnitude in km/h, derived from the velocity vector.
    pub fn eff_velocity_km_per_h(&self) -> f64 {
        self.velocity.norm() * 3.6
    }

    /// Acceleration magnitude in m/s², derived from the acceleration vector.
    pub fn eff_acceleration_m_per_s2(&self) -> f64 {
        self.acceleration.norm()
    }
}

/// A pedestrian after conversion.
#[derive(Clone, Debug, PartialEq)]
pub struct Pedestrian {
    /// Actor id.
    pub id: ActorId,
    /// World location.
    pub location: Vec3,
    /// The lane the pedestrian was labelled on, when it resolved.
    pub lane: Option<LaneIdx>,
}

/// A traffic light after conversion.
#[derive(Clone, Debug, PartialEq)]
pub struct TrafficLight {
    /// Actor id.
    pub id: ActorId,
    /// World location.
    pub location: Vec3,
    /// Current light state, as reported.
    pub state: Option<String>,
}

/// A traffic sign after conversion.
#[derive(Clone, Debug, PartialEq)]
pub struct TrafficSign {
    /// Actor id.
    pub id: ActorId,
    /// World location.
    pub location: Vec3,
    /// Sign kind, as reported.
    pub sign_type: Option<String>,
}

/// Any actor in a converted tick.
#[derive(Clone, Debug, PartialEq)]
pub enum Actor {
    /// A vehicle.
    Vehicle(Vehicle),
    /// A pedestrian.
    Pedestrian(Pedestrian),
    /// A traffic light.
    TrafficLight(TrafficLight),
    /// A traffic sign.
    TrafficSign(TrafficSign),
}

impl Actor {
    /// The actor id, independent of kind.
    pub fn id(&self) -> ActorId {
        match self {
            Actor::Vehicle(v) => v.id,
            Actor::Pedestrian(p) => p.id,
            Actor::TrafficLight(t) => t.id,
            Actor::TrafficSign(s) => s.id,
        }
    }

    /// The actor's world location, independent of kind.
    pub fn location(&self) -> Vec3 {
        match self {
            Actor::Vehicle(v) => v.location,
            Actor::Pedestrian(p) => p.location,
            Actor::TrafficLight(t) => t.location,
            Actor::TrafficSign(s) => s.location,
        }
    }

    /// The vehicle payload, if this actor is one.
    pub fn as_vehicle(&self) -> Option<&Vehicle> {
        match self {
            Actor::Vehicle(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable variant of [`Actor::as_vehicle`].
    pub fn as_vehicle_mut(&mut self) -> Option<&mut Vehicle> {
        match self {
            Actor::Vehicle(v) => Some(v),
            _ => None,
        }
    }
}

/// One converted, ego-tagged snapshot. In an accepted timeline exactly one
/// vehicle per tick carries `is_ego = true`.
#[derive(Clone, Debug, PartialEq)]
pub struct TickData {
    /// Timestamp of the snapshot.
    pub current_tick: SimTime,
    /// All actors at this timestamp.
    pub actors: Vec<Actor>,
}

impl TickData {
    /// The designated ego vehicle of this tick, if one is flagged.
    pub fn ego(&self) -> Option<&Vehicle> {
        self.vehicles().find(|v| v.is_ego)
    }

    /// All vehicles in this tick.
    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.actors.iter().filter_map(Actor::as_vehicle)
    }

    /// All pedestrians in this tick.
    pub fn pedestrians(&self) -> impl Iterator<Item = &Pedestrian> {
        self.actors.iter().filter_map(|a| match a {
            Actor::Pedestrian(p) => Some(p),
            _ => None,
        })
    }

    /// The actor with the given id, if present.
    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.actors.iter().find(|a| a.id() == id)
    }
}

// ============================================================================
// Runs & segments
// ============================================================================

/// The full converted timeline for one ego vehicle.
#[derive(Clone, Debug)]
pub struct SimulationRun {
    /// Run identifier (derived from the dynamic file).
    pub id: String,
    /// The ordered tick list.
    pub ticks: Vec<TickData>,
}

/// A bounded sub-sequence of a run, the segmenter's output unit.
///
/// Ticks are deep copies of their source slice, ascending by `current_tick`,
/// all referencing the same map.
#[derive(Clone, Debug)]
pub struct Segment {
    /// The copied ticks, non-empty.
    pub ticks: Vec<TickData>,
    /// Id of the run this segment was cut from.
    pub simulation_run_id: String,
    /// Provenance tag, equal to the originating run id.
    pub segment_source: String,
    /// Name of the strategy variant that produced this segment.
    pub segmentation_type: &'static str,
}

impl Segment {
    /// Number of ticks in the segment.
    pub fn tick_count(&self) -> usize {
        self.ticks.len()
    }
}
