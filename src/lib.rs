//! Crate root: public surface and pipeline-wide invariants
//!
//! `tracecut` ingests recorded driving-simulation traces — a static road
//! network plus per-tick dynamic state — and produces a lazy, back-pressured
//! stream of **segments**: bounded sub-sequences of ticks ready for
//! downstream scenario-pattern evaluation. The stages, leaves first:
//!
//! 1. [`map`] indexes the immutable block/road/lane graph;
//! 2. [`cleaner`] repairs lane labels inside junctions;
//! 3. [`convert`] builds ego-tagged timelines and fills in kinematics;
//! 4. [`distance`] maps metre budgets onto tick indices;
//! 5. [`segment`] cuts timelines under one of a closed strategy family;
//! 6. [`pipeline`] chains file I/O, decoding, cleaning, conversion, and
//!    slicing behind bounded channels and exposes the segment stream.
//!
//! ## Invariants
//!
//! - **Shared-immutable map.** The road network is built once per map file
//!   and shared read-only (`Arc`) across tasks; all references into it are
//!   arena indices, never owning pointers.
//! - **One ego per tick.** After conversion, every tick of an accepted
//!   timeline designates exactly one ego vehicle; a run whose ego vanishes
//!   mid-trace is dropped whole.
//! - **Deep-copied segments.** Segment tick lists are deep copies of their
//!   source slice: mutating one emitted segment never disturbs another, and
//!   upstream timelines can be released as soon as a run is sliced.
//! - **Bounded buffering.** The slicer blocks once
//!   `simulation_run_prefetch_size` segments are outstanding; dropping the
//!   stream closes the channels and unwinds the producers.
//!
//! Failure modes are precise, per-module `thiserror` enums composed into
//! [`PipelineError`]; non-fatal conditions (dropped short segments,
//! truncated windows) are log events and never interrupt the stream.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Junction cleaner (per-vehicle lane-label repair).
pub mod cleaner;
/// Tick conversion and kinematics derivation.
pub mod convert;
/// Distance oracle (metre budgets → tick indices).
pub mod distance;
/// Input file naming conventions and document decoding.
pub mod loader;
/// Static road network: arena, descriptors, indexer.
pub mod map;
/// The pipeline driver and its segment stream.
pub mod pipeline;
/// The segmentation strategy family.
pub mod segment;
/// Dynamic trace data model (raw records, actors, ticks, segments).
pub mod trace;

// ============================================================================
// Canonical re-exports
// ============================================================================

pub use crate::cleaner::{clean_junction_data, CleanError};
pub use crate::convert::{convert_run, fill_kinematics, ConvertError};
pub use crate::loader::{load_blocks, load_ticks, map_name_of, seed_of, LoaderError};
pub use crate::map::{BlockIdx, LaneIdx, LaneType, MapError, RoadIdx, RoadNetwork};
pub use crate::pipeline::{
    launch, MetricsSnapshot, PipelineConfig, PipelineError, PipelineMetrics, SegmentStream,
};
pub use crate::segment::{SegmentError, SegmentationOptions, Segmenter, Strategy};
pub use crate::trace::{
    Actor, ActorId, RawTick, Segment, SimTime, SimulationRun, TickData, Vec3, Vehicle,
};
