//! Static road network: arena, descriptors, and the `(road, lane)` indexer
//!
//! The network is built **once** from a list of [`BlockDescriptor`]s (the same
//! structs the static JSON document decodes into) and is immutable afterwards.
//! Everything downstream refers to map entities through the index newtypes
//! ([`BlockIdx`], [`RoadIdx`], [`LaneIdx`]) into the flat arenas held by
//! [`RoadNetwork`]; successor/predecessor sets are index collections as well,
//! so there is no cyclic ownership anywhere in the graph.
//!
//! ## Invariants
//!
//! - Every `(road_id, lane_id)` pair resolves to at most one lane; duplicates
//!   are a build error, not a last-writer-wins overwrite.
//! - Every successor/predecessor reference in the descriptors resolves to a
//!   lane that exists in the same document.
//! - After [`RoadNetwork::build`] returns, no `&mut` access exists; the
//!   network is shared read-only (typically behind an `Arc`) for the lifetime
//!   of a pipeline.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Index of a block in the [`RoadNetwork`] arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockIdx(pub usize);

/// Index of a road in the [`RoadNetwork`] arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoadIdx(pub usize);

/// Index of a lane in the [`RoadNetwork`] arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LaneIdx(pub usize);

/// Errors raised while building or querying the road network.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// A `(road_id, lane_id)` lookup found no lane.
    #[error("unknown lane (road {road_id}, lane {lane_id})")]
    UnknownLane {
        /// Road id of the failed lookup.
        road_id: i64,
        /// Lane id of the failed lookup.
        lane_id: i32,
    },
    /// A `road_id` lookup found no road.
    #[error("unknown road {0}")]
    UnknownRoad(i64),
    /// Two lanes in the input document share a `(road_id, lane_id)` pair.
    #[error("duplicate lane (road {road_id}, lane {lane_id}) in static data")]
    DuplicateLane {
        /// Road id of the colliding pair.
        road_id: i64,
        /// Lane id of the colliding pair.
        lane_id: i32,
    },
    /// A successor/predecessor relation points at a lane the document never
    /// declares.
    #[error("dangling lane relation (road {road_id}, lane {lane_id})")]
    DanglingRelation {
        /// Road id of the missing relation target.
        road_id: i64,
        /// Lane id of the missing relation target.
        lane_id: i32,
    },
}

/// The type of traffic a lane carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaneType {
    /// A regular vehicle lane.
    Driving,
    /// A pedestrian sidewalk.
    Sidewalk,
    /// A shoulder / emergency lane.
    Shoulder,
    /// On-street parking.
    Parking,
    /// A bicycle lane.
    Biking,
    /// Anything else the exporter emits.
    Other,
}

/// A speed limit applying to a stretch of a lane, in `[from, to)` metres of
/// lane-local position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedLimit {
    /// The limit itself, in km/h.
    pub speed_limit: f64,
    /// Start of the covered stretch (metres along the lane).
    pub from_meters: f64,
    /// End of the covered stretch (metres along the lane).
    pub to_meters: f64,
}

/// A named region of the map, owning an ordered set of roads.
#[derive(Clone, Debug)]
pub struct Block {
    /// Region id (unique per map).
    pub id: String,
    /// Roads in this block, in document order.
    pub roads: Vec<RoadIdx>,
}

/// One road, possibly a junction-internal one.
#[derive(Clone, Debug)]
pub struct Road {
    /// Road id (unique per map).
    pub id: i64,
    /// Whether this road is internal to a junction.
    pub is_junction: bool,
    /// The block this road belongs to.
    pub block: BlockIdx,
    /// Lanes of this road, in document order.
    pub lanes: Vec<LaneIdx>,
}

/// One lane of a road.
#[derive(Clone, Debug)]
pub struct Lane {
    /// Lane id (unique within its road).
    pub lane_id: i32,
    /// The road this lane belongs to.
    pub road: RoadIdx,
    /// What kind of traffic the lane carries.
    pub lane_type: LaneType,
    /// Lanes a vehicle can continue onto.
    pub successors: Vec<LaneIdx>,
    /// Lanes a vehicle can have arrived from.
    pub predecessors: Vec<LaneIdx>,
    /// Positional speed limits along the lane.
    pub speed_limits: Vec<SpeedLimit>,
}

impl Lane {
    /// The speed limit applying at `position` metres along the lane, if any.
    pub fn applicable_speed_limit(&self, position: f64) -> Option<&SpeedLimit> {
        self.speed_limits
            .iter()
            .find(|sl| position >= sl.from_meters && position < sl.to_meters)
    }
}

// ============================================================================
// Input descriptors (serde target for the static JSON document)
// ============================================================================

/// Reference to a lane by its document-level ids, used for relations.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneRefDescriptor {
    /// Road id of the referenced lane.
    pub road_id: i64,
    /// Lane id of the referenced lane.
    pub lane_id: i32,
}

/// One lane as it appears in the static document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneDescriptor {
    /// Lane id (unique within the road).
    pub lane_id: i32,
    /// What kind of traffic the lane carries.
    pub lane_type: LaneType,
    /// Lanes a vehicle can continue onto.
    #[serde(default)]
    pub successor_lanes: Vec<LaneRefDescriptor>,
    /// Lanes a vehicle can have arrived from.
    #[serde(default)]
    pub predecessor_lanes: Vec<LaneRefDescriptor>,
    /// Positional speed limits along the lane.
    #[serde(default)]
    pub speed_limits: Vec<SpeedLimit>,
}

/// One road as it appears in the static document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadDescriptor {
    /// Road id (unique per map).
    pub road_id: i64,
    /// Whether this road is internal to a junction.
    #[serde(default)]
    pub is_junction: bool,
    /// Lanes of the road.
    pub lanes: Vec<LaneDescriptor>,
}

/// One block as it appears in the static document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDescriptor {
    /// Region id.
    pub id: String,
    /// Roads of the block.
    pub roads: Vec<RoadDescriptor>,
}

// ============================================================================
// RoadNetwork — arena + lookup
// ============================================================================

/// The indexed, immutable road network for one map.
#[derive(Debug)]
pub struct RoadNetwork {
    blocks: Vec<Block>,
    roads: Vec<Road>,
    lanes: Vec<Lane>,
    road_index: HashMap<i64, RoadIdx>,
    lane_index: HashMap<(i64, i32), LaneIdx>,
}

impl RoadNetwork {
    /// Build the arena and both lookup maps from the decoded block list.
    ///
    /// Relations are resolved in a second pass so forward references between
    /// roads work regardless of document order.
    pub fn build(descriptors: &[BlockDescriptor]) -> Result<Self, MapError> {
        let mut net = RoadNetwork {
            blocks: Vec::with_capacity(descriptors.len()),
            roads: Vec::new(),
            lanes: Vec::new(),
            road_index: HashMap::new(),
            lane_index: HashMap::new(),
        };

        // Pass 1: allocate blocks, roads, and lanes; relations stay empty.
        for block_desc in descriptors {
            let block_idx = BlockIdx(net.blocks.len());
            let mut road_idxs = Vec::with_capacity(block_desc.roads.len());
            for road_desc in &block_desc.roads {
                let road_idx = RoadIdx(net.roads.len());
                let mut lane_idxs = Vec::with_capacity(road_desc.lanes.len());
                for lane_desc in &road_desc.lanes {
                    let lane_idx = LaneIdx(net.lanes.len());
                    let key = (road_desc.road_id, lane_desc.lane_id);
                    if net.lane_index.insert(key, lane_idx).is_some() {
                        return Err(MapError::DuplicateLane {
                            road_id: key.0,
                            lane_id: key.1,
                        });
                    }
                    net.lanes.push(Lane {
                        lane_id: lane_desc.lane_id,
                        road: road_idx,
                        lane_type: lane_desc.lane_type,
                        successors: Vec::new(),
                        predecessors: Vec::new(),
                        speed_limits: lane_desc.speed_limits.clone(),
                    });
                    lane_idxs.push(lane_idx);
                }
                net.road_index.insert(road_desc.road_id, road_idx);
                net.roads.push(Road {
                    id: road_desc.road_id,
                    is_junction: road_desc.is_junction,
                    block: block_idx,
                    lanes: lane_idxs,
                });
                road_idxs.push(road_idx);
            }
            net.blocks.push(Block {
                id: block_desc.id.clone(),
                roads: road_idxs,
            });
        }

        // Pass 2: resolve successor/predecessor relations.
        let mut cursor = 0usize;
        for block_desc in descriptors {
            for road_desc in &block_desc.roads {
                for lane_desc in &road_desc.lanes {
                    let succ = resolve_refs(&net.lane_index, &lane_desc.successor_lanes)?;
                    let pred = resolve_refs(&net.lane_index, &lane_desc.predecessor_lanes)?;
                    net.lanes[cursor].successors = succ;
                    net.lanes[cursor].predecessors = pred;
                    cursor += 1;
                }
            }
        }

        Ok(net)
    }

    /// Look a lane up by its document-level ids.
    pub fn find_lane(&self, road_id: i64, lane_id: i32) -> Result<LaneIdx, MapError> {
        self.lane_index
            .get(&(road_id, lane_id))
            .copied()
            .ok_or(MapError::UnknownLane { road_id, lane_id })
    }

    /// Look a road up by its document-level id.
    pub fn road_of(&self, road_id: i64) -> Result<RoadIdx, MapError> {
        self.road_index
            .get(&road_id)
            .copied()
            .ok_or(MapError::UnknownRoad(road_id))
    }

    /// Whether the road with the given document-level id is junction-internal.
    pub fn is_junction(&self, road_id: i64) -> Result<bool, MapError> {
        Ok(self.road(self.road_of(road_id)?).is_junction)
    }

    /// Access a lane by arena index.
    pub fn lane(&self, idx: LaneIdx) -> &Lane {
        &self.lanes[idx.0]
    }

    /// Access a road by arena index.
    pub fn road(&self, idx: RoadIdx) -> &Road {
        &self.roads[idx.0]
    }

    /// Access a block by arena index.
    pub fn block(&self, idx: BlockIdx) -> &Block {
        &self.blocks[idx.0]
    }

    /// The road a lane belongs to.
    pub fn road_of_lane(&self, idx: LaneIdx) -> &Road {
        self.road(self.lane(idx).road)
    }

    /// Whether a lane lies on a junction-internal road.
    pub fn lane_on_junction(&self, idx: LaneIdx) -> bool {
        self.road_of_lane(idx).is_junction
    }

    /// The block a lane belongs to, by arena index.
    pub fn block_of_lane(&self, idx: LaneIdx) -> BlockIdx {
        self.road_of_lane(idx).block
    }

    /// Number of lanes in the arena.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }
}

fn resolve_refs(
    index: &HashMap<(i64, i32), LaneIdx>,
    refs: &[LaneRefDescriptor],
) -> Result<Vec<LaneIdx>, MapError> {
    refs.iter()
        .map(|r| {
            index
                .get(&(r.road_id, r.lane_id))
                .copied()
                .ok_or(MapError::DanglingRelation {
                    road_id: r.road_id,
                    lane_id: r.lane_id,
                })
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lane(lane_id: i32) -> LaneDescriptor {
        LaneDescriptor {
            lane_id,
            lane_type: LaneType::Driving,
            successor_lanes: Vec::new(),
            predecessor_lanes: Vec::new(),
            speed_limits: Vec::new(),
        }
    }

    fn two_road_map() -> Vec<BlockDescriptor> {
        vec![BlockDescriptor {
            id: "b0".into(),
            roads: vec![
                RoadDescriptor {
                    road_id: 1,
                    is_junction: false,
                    lanes: vec![LaneDescriptor {
                        successor_lanes: vec![LaneRefDescriptor { road_id: 7, lane_id: -1 }],
                        ..lane(-1)
                    }],
                },
                RoadDescriptor {
                    road_id: 7,
                    is_junction: true,
                    lanes: vec![lane(-1), lane(-2)],
                },
            ],
        }]
    }

    #[test]
    fn lookup_and_relations_resolve() {
        let net = RoadNetwork::build(&two_road_map()).unwrap();

        let l = net.find_lane(1, -1).unwrap();
        assert!(!net.lane_on_junction(l));
        assert!(net.is_junction(7).unwrap());

        let succ = &net.lane(l).successors;
        assert_eq!(succ.len(), 1);
        let target = net.lane(succ[0]);
        assert_eq!(target.lane_id, -1);
        assert_eq!(net.road(target.road).id, 7);

        assert!(matches!(
            net.find_lane(99, 0),
            Err(MapError::UnknownLane { road_id: 99, lane_id: 0 })
        ));
        assert!(matches!(net.road_of(99), Err(MapError::UnknownRoad(99))));
    }

    #[test]
    fn duplicate_lane_is_a_build_error() {
        let mut desc = two_road_map();
        desc[0].roads[1].lanes.push(lane(-1));
        assert!(matches!(
            RoadNetwork::build(&desc),
            Err(MapError::DuplicateLane { road_id: 7, lane_id: -1 })
        ));
    }

    #[test]
    fn dangling_relation_is_a_build_error() {
        let mut desc = two_road_map();
        desc[0].roads[0].lanes[0]
            .predecessor_lanes
            .push(LaneRefDescriptor { road_id: 42, lane_id: 3 });
        assert!(matches!(
            RoadNetwork::build(&desc),
            Err(MapError::DanglingRelation { road_id: 42, lane_id: 3 })
        ));
    }

    #[test]
    fn applicable_speed_limit_is_positional() {
        let mut desc = two_road_map();
        desc[0].roads[0].lanes[0].speed_limits = vec![
            SpeedLimit { speed_limit: 30.0, from_meters: 0.0, to_meters: 50.0 },
            SpeedLimit { speed_limit: 50.0, from_meters: 50.0, to_meters: 200.0 },
        ];
        let net = RoadNetwork::build(&desc).unwrap();
        let l = net.lane(net.find_lane(1, -1).unwrap());

        assert_eq!(l.applicable_speed_limit(10.0).unwrap().speed_limit, 30.0);
        assert_eq!(l.applicable_speed_limit(50.0).unwrap().speed_limit, 50.0);
        assert!(l.applicable_speed_limit(300.0).is_none());
    }
}
