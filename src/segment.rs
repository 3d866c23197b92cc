//! Segmentation: cutting a converted timeline into bounded segments
//!
//! One closed [`Strategy`] enum, one function per variant, a single
//! table-driven entry ([`Segmenter::segment`]). Every strategy produces zero
//! or more [`Segment`]s whose tick lists are deep copies of their source
//! slice, so the run may be released once segmentation completes.
//!
//! ## Shared behaviour
//!
//! - **Junction extension.** Fixed and dynamic window strategies never let a
//!   segment start or end inside a junction: contiguous junction ticks
//!   touching a window edge are pulled into the window. For the sliding
//!   family the junction check looks at the window's last tick and the
//!   extension scan starts one past it.
//! - **Min/max enforcement.** Non-junction candidates below the minimum tick
//!   count are dropped with a log note; dynamic windows are truncated to the
//!   maximum; block segments containing a junction are emitted whole when
//!   the strategy carries `add_junctions`.
//! - **Bucket cuts.** Event strategies track the index of the first bucket
//!   bound exceeding the observed scalar; a change of that index is the cut
//!   signal. Non-finite kinematics are rejected.
//!
//! The rotating strategy draws window sizes from a seeded RNG so runs are
//! reproducible.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, warn};

use crate::distance::{index_at_distance, last_valid_start};
use crate::map::{BlockIdx, LaneType, RoadNetwork};
use crate::trace::{Segment, SimulationRun, TickData, Vehicle};

/// Window sizes (m) swept by the multistart metre strategy.
const MULTISTART_METER_SIZES: [f64; 5] = [60.0, 65.0, 70.0, 75.0, 80.0];
/// Window sizes (ticks) swept by the multistart tick strategy.
const MULTISTART_TICK_SIZES: [usize; 5] = [100, 110, 120, 130, 140];
/// Window sizes (ticks) the rotating strategy samples from.
const ROTATING_TICK_SIZES: [usize; 5] = [60, 65, 70, 75, 80];
/// Window sizes (ticks) chosen by in-block vehicle-count bucket.
const DENSITY_TICK_SIZES: [usize; 3] = [60, 70, 80];

/// Speed bucket bounds, km/h.
const SPEED_BOUNDS: [f64; 6] = [15.0, 35.0, 60.0, 90.0, 130.0, f64::INFINITY];
/// Acceleration bucket bounds, m/s².
const ACCELERATION_BOUNDS: [f64; 3] = [-0.5, 0.5, f64::INFINITY];
/// In-block vehicle-count bucket bounds.
const TRAFFIC_DENSITY_BOUNDS: [f64; 3] = [6.0, 16.0, f64::INFINITY];

/// Pedestrian proximity radius, metres.
const PEDESTRIAN_PROXIMITY_METERS: f64 = 30.0;
/// Ticks kept before/after an ego lane change.
const LANE_CHANGE_BACKWARD_TICKS: usize = 10;
const LANE_CHANGE_FORWARD_TICKS: usize = 100;

/// Errors raised by the segmenter.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// The configured strategy name or parameters are not recognised.
    #[error("unsupported segmentation strategy: {0}")]
    UnsupportedStrategy(String),
    /// The timeline cannot be segmented as requested.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
}

/// The configuration surface a strategy is selected through.
#[derive(Clone, Debug, Default)]
pub struct SegmentationOptions {
    /// Strategy name, e.g. `BY_BLOCK` or `SLIDING_WINDOW`.
    pub segmentation_type: String,
    /// Primary parameter (window size, block count, …).
    pub value: Option<f64>,
    /// Secondary parameter (step, …).
    pub secondary_value: Option<f64>,
    /// Whether junction-containing blocks are emitted whole.
    pub add_junctions: bool,
}

/// The closed family of segmentation strategies.
#[derive(Clone, Debug, PartialEq)]
pub enum Strategy {
    StaticLengthTicks { window: usize, step: usize },
    StaticLengthMeters { window: f64, step: f64 },
    DynamicMetersSpeed { step: f64 },
    DynamicMetersAcceleration { step: f64 },
    DynamicMetersSpeedAcceleration1 { step: f64 },
    DynamicMetersSpeedAcceleration2 { step: f64 },
    SlidingWindowMultistartMeters { overlap_percent: f64 },
    SlidingWindowMultistartTicks { overlap_percent: f64 },
    ByBlock,
    None,
    EvenSize { count: usize, add_junctions: bool },
    ByLength { meters: f64, add_junctions: bool },
    ByTicks { ticks: usize, add_junctions: bool },
    BySpeedLimits { add_junctions: bool },
    ByDynamicSpeed,
    ByDynamicAcceleration,
    ByDynamicTrafficDensity,
    ByDynamicPedestrianProximity,
    ByDynamicLaneChanges,
    ByDynamicVariables { add_junctions: bool },
    SlidingWindow { window: usize, step: usize, add_junctions: bool },
    SlidingWindowMeters { window: f64, step: f64, add_junctions: bool },
    SlidingWindowByBlock { window: usize, step: usize, add_junctions: bool },
    SlidingWindowHalving,
    SlidingWindowHalfOverlap { window: usize, add_junctions: bool },
    SlidingWindowRotating { step: usize, add_junctions: bool },
    SlidingWindowByTrafficDensity { step: usize, add_junctions: bool },
}

impl Strategy {
    /// The tag recorded on every segment this strategy emits.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Strategy::StaticLengthTicks { .. } => "STATIC_SEGMENT_LENGTH_TICKS",
            Strategy::StaticLengthMeters { .. } => "STATIC_SEGMENT_LENGTH_METERS",
            Strategy::DynamicMetersSpeed { .. } => "DYNAMIC_SEGMENT_LENGTH_METERS_SPEED",
            Strategy::DynamicMetersAcceleration { .. } => {
                "DYNAMIC_SEGMENT_LENGTH_METERS_ACCELERATION"
            }
            Strategy::DynamicMetersSpeedAcceleration1 { .. } => {
                "DYNAMIC_SEGMENT_LENGTH_METERS_SPEED_ACCELERATION_1"
            }
            Strategy::DynamicMetersSpeedAcceleration2 { .. } => {
                "DYNAMIC_SEGMENT_LENGTH_METERS_SPEED_ACCELERATION_2"
            }
            Strategy::SlidingWindowMultistartMeters { .. } => "SLIDING_WINDOW_MULTISTART_METERS",
            Strategy::SlidingWindowMultistartTicks { .. } => "SLIDING_WINDOW_MULTISTART_TICKS",
            Strategy::ByBlock => "BY_BLOCK",
            Strategy::None => "NONE",
            Strategy::EvenSize { .. } => "EVEN_SIZE",
            Strategy::ByLength { .. } => "BY_LENGTH",
            Strategy::ByTicks { .. } => "BY_TICKS",
            Strategy::BySpeedLimits { .. } => "BY_SPEED_LIMITS",
            Strategy::ByDynamicSpeed => "BY_DYNAMIC_SPEED",
            Strategy::ByDynamicAcceleration => "BY_DYNAMIC_ACCELERATION",
            Strategy::ByDynamicTrafficDensity => "BY_DYNAMIC_TRAFFIC_DENSITY",
            Strategy::ByDynamicPedestrianProximity => "BY_DYNAMIC_PEDESTRIAN_PROXIMITY",
            Strategy::ByDynamicLaneChanges => "BY_DYNAMIC_LANE_CHANGES",
            Strategy::ByDynamicVariables { .. } => "BY_DYNAMIC_VARIABLES",
            Strategy::SlidingWindow { .. } => "SLIDING_WINDOW",
            Strategy::SlidingWindowMeters { .. } => "SLIDING_WINDOW_METERS",
            Strategy::SlidingWindowByBlock { .. } => "SLIDING_WINDOW_BY_BLOCK",
            Strategy::SlidingWindowHalving => "SLIDING_WINDOW_HALVING",
            Strategy::SlidingWindowHalfOverlap { .. } => "SLIDING_WINDOW_HALF_OVERLAP",
            Strategy::SlidingWindowRotating { .. } => "SLIDING_WINDOW_ROTATING",
            Strategy::SlidingWindowByTrafficDensity { .. } => "SLIDING_WINDOW_BY_TRAFFIC_DENSITY",
        }
    }

    /// Resolve the configuration surface into a strategy.
    ///
    /// Unknown names and missing required parameters are
    /// [`SegmentError::UnsupportedStrategy`].
    pub fn from_options(opts: &SegmentationOptions) -> Result<Strategy, SegmentError> {
        let value = || {
            opts.value.ok_or_else(|| {
                SegmentError::UnsupportedStrategy(format!(
                    "{} requires a value",
                    opts.segmentation_type
                ))
            })
        };
        let secondary = || {
            opts.secondary_value.ok_or_else(|| {
                SegmentError::UnsupportedStrategy(format!(
                    "{} requires a secondary value",
                    opts.segmentation_type
                ))
            })
        };
        let ticks = |v: f64| v.max(0.0) as usize;
        let add_junctions = opts.add_junctions;

        let strategy = match opts.segmentation_type.as_str() {
            "STATIC_SEGMENT_LENGTH_TICKS" => Strategy::StaticLengthTicks {
                window: ticks(value()?).max(1),
                step: ticks(secondary()?).max(1),
            },
            "STATIC_SEGMENT_LENGTH_METERS" => Strategy::StaticLengthMeters {
                window: value()?,
                step: secondary()?,
            },
            "DYNAMIC_SEGMENT_LENGTH_METERS_SPEED" => {
                Strategy::DynamicMetersSpeed { step: value()? }
            }
            "DYNAMIC_SEGMENT_LENGTH_METERS_ACCELERATION" => {
                Strategy::DynamicMetersAcceleration { step: value()? }
            }
            "DYNAMIC_SEGMENT_LENGTH_METERS_SPEED_ACCELERATION_1" => {
                Strategy::DynamicMetersSpeedAcceleration1 { step: value()? }
            }
            "DYNAMIC_SEGMENT_LENGTH_METERS_SPEED_ACCELERATION_2" => {
                Strategy::DynamicMetersSpeedAcceleration2 { step: value()? }
            }
            "SLIDING_WINDOW_MULTISTART_METERS" => {
                Strategy::SlidingWindowMultistartMeters { overlap_percent: value()? }
            }
            "SLIDING_WINDOW_MULTISTART_TICKS" => {
                Strategy::SlidingWindowMultistartTicks { overlap_percent: value()? }
            }
            "BY_BLOCK" => Strategy::ByBlock,
            "NONE" => Strategy::None,
            "EVEN_SIZE" => Strategy::EvenSize {
                count: ticks(value()?).max(1),
                add_junctions,
            },
            "BY_LENGTH" => Strategy::ByLength { meters: value()?, add_junctions },
            "BY_TICKS" => Strategy::ByTicks {
                ticks: ticks(value()?).max(1),
                add_junctions,
            },
            "BY_SPEED_LIMITS" => Strategy::BySpeedLimits { add_junctions },
            "BY_DYNAMIC_SPEED" => Strategy::ByDynamicSpeed,
            "BY_DYNAMIC_ACCELERATION" => Strategy::ByDynamicAcceleration,
            "BY_DYNAMIC_TRAFFIC_DENSITY" => Strategy::ByDynamicTrafficDensity,
            "BY_DYNAMIC_PEDESTRIAN_PROXIMITY" => Strategy::ByDynamicPedestrianProximity,
            "BY_DYNAMIC_LANE_CHANGES" => Strategy::ByDynamicLaneChanges,
            "BY_DYNAMIC_VARIABLES" => Strategy::ByDynamicVariables { add_junctions },
            "SLIDING_WINDOW" => Strategy::SlidingWindow {
                window: ticks(value()?).max(1),
                step: ticks(secondary()?).max(1),
                add_junctions,
            },
            "SLIDING_WINDOW_METERS" => Strategy::SlidingWindowMeters {
                window: value()?,
                step: secondary()?,
                add_junctions,
            },
            "SLIDING_WINDOW_BY_BLOCK" => Strategy::SlidingWindowByBlock {
                window: ticks(value()?).max(1),
                step: ticks(secondary()?).max(1),
                add_junctions,
            },
            "SLIDING_WINDOW_HALVING" => Strategy::SlidingWindowHalving,
            "SLIDING_WINDOW_HALF_OVERLAP" => Strategy::SlidingWindowHalfOverlap {
                window: ticks(value()?).max(1),
                add_junctions,
            },
            "SLIDING_WINDOW_ROTATING" => Strategy::SlidingWindowRotating {
                step: ticks(value()?).max(1),
                add_junctions,
            },
            "SLIDING_WINDOW_BY_TRAFFIC_DENSITY" => Strategy::SlidingWindowByTrafficDensity {
                step: ticks(value()?).max(1),
                add_junctions,
            },
            other => {
                return Err(SegmentError::UnsupportedStrategy(other.to_string()));
            }
        };
        Ok(strategy)
    }
}

// ============================================================================
// Segmenter
// ============================================================================

/// Applies one strategy to converted timelines.
pub struct Segmenter<'a> {
    network: &'a RoadNetwork,
    min_tick_count: usize,
    max_tick_count: Option<usize>,
    rng_seed: u64,
}

impl<'a> Segmenter<'a> {
    /// A segmenter over `network` with the given min/max tick bounds.
    pub fn new(
        network: &'a RoadNetwork,
        min_tick_count: usize,
        max_tick_count: Option<usize>,
    ) -> Self {
        Segmenter { network, min_tick_count, max_tick_count, rng_seed: 0 }
    }

    /// Seed for the rotating strategy's window sampling.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Apply `strategy` to `run`. Empty input yields empty output.
    pub fn segment(
        &self,
        run: &SimulationRun,
        strategy: &Strategy,
    ) -> Result<Vec<Segment>, SegmentError> {
        if run.ticks.is_empty() {
            return Ok(Vec::new());
        }
        for (i, tick) in run.ticks.iter().enumerate() {
            if tick.ego().is_none() {
                return Err(SegmentError::UnsupportedInput(format!(
                    "tick index {i} carries no designated ego"
                )));
            }
        }
        let mut out = Vec::new();
        self.dispatch(&mut out, run, strategy)?;
        Ok(out)
    }

    fn dispatch(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        strategy: &Strategy,
    ) -> Result<(), SegmentError> {
        let kind = strategy.kind_name();
        match *strategy {
            Strategy::StaticLengthTicks { window, step } => {
                self.static_ticks(out, run, window, step, kind);
            }
            Strategy::StaticLengthMeters { window, step } => {
                self.static_meters(out, run, window, step, kind);
            }
            Strategy::DynamicMetersSpeed { step } => {
                self.dynamic_meters(out, run, step, kind, |ego| {
                    60.0 * (1.0 + ego.eff_velocity_km_per_h() / 300.0)
                })?;
            }
            Strategy::DynamicMetersAcceleration { step } => {
                self.dynamic_meters(out, run, step, kind, |ego| {
                    let a = ego.eff_acceleration_m_per_s2();
                    a * a + 60.0
                })?;
            }
            Strategy::DynamicMetersSpeedAcceleration1 { step } => {
                self.dynamic_meters(out, run, step, kind, |ego| {
                    let speed = ego.eff_velocity_km_per_h();
                    let a = ego.eff_acceleration_m_per_s2();
                    30.0 + (a / 2.0) * 1.2 * 1.2 + speed * 1.2 + (speed / 10.0).powi(2) * 0.5
                })?;
            }
            Strategy::DynamicMetersSpeedAcceleration2 { step } => {
                self.dynamic_meters(out, run, step, kind, |ego| {
                    let speed = ego.eff_velocity_km_per_h();
                    let a = ego.eff_acceleration_m_per_s2();
                    30.0 * (1.0 + speed / 30.0) + a.abs() * 5.0
                })?;
            }
            Strategy::SlidingWindowMultistartMeters { overlap_percent } => {
                for size in MULTISTART_METER_SIZES {
                    let step = (size * (1.0 - overlap_percent / 100.0)).max(1.0);
                    self.static_meters(out, run, size, step, kind);
                }
            }
            Strategy::SlidingWindowMultistartTicks { overlap_percent } => {
                for size in MULTISTART_TICK_SIZES {
                    let step =
                        ((size as f64 * (1.0 - overlap_percent / 100.0)) as usize).max(1);
                    self.static_ticks(out, run, size, step, kind);
                }
            }
            Strategy::ByBlock => self.by_block(out, run, kind),
            Strategy::None => self.push_segment(out, run, 0, run.ticks.len(), kind),
            Strategy::EvenSize { count, add_junctions } => {
                self.even_size(out, run, count, add_junctions, kind);
            }
            Strategy::ByLength { meters, add_junctions } => {
                self.by_length(out, run, meters, add_junctions, kind);
            }
            Strategy::ByTicks { ticks, add_junctions } => {
                self.by_ticks(out, run, ticks, add_junctions, kind);
            }
            Strategy::BySpeedLimits { add_junctions } => {
                self.by_speed_limits(out, run, add_junctions, kind);
            }
            Strategy::ByDynamicSpeed => {
                self.bucket_cut(out, run, kind, &SPEED_BOUNDS, |s, t| {
                    Ok(s.ego(t).eff_velocity_km_per_h())
                })?;
            }
            Strategy::ByDynamicAcceleration => {
                self.bucket_cut(out, run, kind, &ACCELERATION_BOUNDS, |s, t| {
                    Ok(s.ego(t).eff_acceleration_m_per_s2())
                })?;
            }
            Strategy::ByDynamicTrafficDensity => {
                self.bucket_cut(out, run, kind, &TRAFFIC_DENSITY_BOUNDS, |s, t| {
                    Ok(s.vehicles_in_ego_block(t) as f64)
                })?;
            }
            Strategy::ByDynamicPedestrianProximity => {
                self.pedestrian_proximity_cut(out, run, kind);
            }
            Strategy::ByDynamicLaneChanges => self.lane_change_windows(out, run, kind),
            Strategy::ByDynamicVariables { add_junctions } => {
                self.dispatch(out, run, &Strategy::ByBlock)?;
                self.dispatch(out, run, &Strategy::ByDynamicAcceleration)?;
                self.dispatch(out, run, &Strategy::ByDynamicSpeed)?;
                self.dispatch(out, run, &Strategy::ByDynamicTrafficDensity)?;
                self.dispatch(out, run, &Strategy::ByDynamicPedestrianProximity)?;
                self.dispatch(out, run, &Strategy::ByDynamicLaneChanges)?;
                self.dispatch(
                    out,
                    run,
                    &Strategy::SlidingWindowHalfOverlap { window: 100, add_junctions },
                )?;
            }
            Strategy::SlidingWindow { window, step, add_junctions } => {
                self.slide_tick_windows(out, run, window, step, add_junctions, kind);
            }
            Strategy::SlidingWindowMeters { window, step, add_junctions } => {
                self.slide_meter_windows(out, run, window, step, add_junctions, kind);
            }
            Strategy::SlidingWindowByBlock { window, step, add_junctions } => {
                self.slide_within_blocks(out, run, window, step, add_junctions, kind);
            }
            Strategy::SlidingWindowHalving => self.halving(out, run, kind),
            Strategy::SlidingWindowHalfOverlap { window, add_junctions } => {
                self.slide_tick_windows(out, run, window, (window / 4).max(1), add_junctions, kind);
            }
            Strategy::SlidingWindowRotating { step, add_junctions } => {
                self.rotating(out, run, step, add_junctions, kind);
            }
            Strategy::SlidingWindowByTrafficDensity { step, add_junctions } => {
                self.density_windows(out, run, step, add_junctions, kind);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    /// The ego view of a tick; presence is validated by `segment`.
    fn ego<'t>(&self, tick: &'t TickData) -> &'t Vehicle {
        tick.ego().expect("validated timeline tick carries an ego")
    }

    fn tick_on_junction(&self, tick: &TickData) -> bool {
        self.network.lane_on_junction(self.ego(tick).lane)
    }

    fn block_of_tick(&self, tick: &TickData) -> BlockIdx {
        self.network.block_of_lane(self.ego(tick).lane)
    }

    /// Maximal contiguous index ranges sharing one ego block.
    fn block_ranges(&self, ticks: &[TickData]) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut start = 0;
        for i in 1..ticks.len() {
            if self.block_of_tick(&ticks[i]) != self.block_of_tick(&ticks[i - 1]) {
                ranges.push((start, i));
                start = i;
            }
        }
        if !ticks.is_empty() {
            ranges.push((start, ticks.len()));
        }
        ranges
    }

    fn range_has_junction(&self, ticks: &[TickData], start: usize, end: usize) -> bool {
        ticks[start..end].iter().any(|t| self.tick_on_junction(t))
    }

    /// New start after pulling in contiguous junction ticks preceding
    /// `start`, when `start` itself lies on a junction.
    fn extend_before_start(&self, ticks: &[TickData], start: usize) -> usize {
        if !self.tick_on_junction(&ticks[start]) {
            return start;
        }
        let mut s = start;
        while s > 0 && self.tick_on_junction(&ticks[s - 1]) {
            s -= 1;
        }
        s
    }

    /// New exclusive end after appending contiguous junction ticks, when the
    /// window's last tick (`end - 1`) lies on a junction. The scan starts at
    /// `end` itself.
    fn extend_after_end(&self, ticks: &[TickData], end: usize) -> usize {
        if end == 0 || !self.tick_on_junction(&ticks[end - 1]) {
            return end;
        }
        let mut e = end;
        while e < ticks.len() && self.tick_on_junction(&ticks[e]) {
            e += 1;
        }
        e
    }

    /// Deep-copy `[start, end)` into a segment, dropping candidates below
    /// the minimum tick count.
    fn push_segment(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        start: usize,
        end: usize,
        kind: &'static str,
    ) {
        if start >= end {
            return;
        }
        if end - start < self.min_tick_count {
            debug!(
                run_id = %run.id,
                kind,
                start,
                len = end - start,
                min = self.min_tick_count,
                "segment below minimum, dropped"
            );
            return;
        }
        out.push(self.copy_segment(run, start, end, kind));
    }

    /// Deep-copy `[start, end)` unconditionally (inviolable junction blocks).
    fn push_block(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        start: usize,
        end: usize,
        kind: &'static str,
    ) {
        if start < end {
            out.push(self.copy_segment(run, start, end, kind));
        }
    }

    fn copy_segment(
        &self,
        run: &SimulationRun,
        start: usize,
        end: usize,
        kind: &'static str,
    ) -> Segment {
        Segment {
            ticks: run.ticks[start..end].to_vec(),
            simulation_run_id: run.id.clone(),
            segment_source: run.id.clone(),
            segmentation_type: kind,
        }
    }

    /// Emit every junction-containing block once (`add_junctions` preamble
    /// for the sliding family).
    fn push_junction_blocks(&self, out: &mut Vec<Segment>, run: &SimulationRun, kind: &'static str) {
        for (s, e) in self.block_ranges(&run.ticks) {
            if self.range_has_junction(&run.ticks, s, e) {
                self.push_block(out, run, s, e, kind);
            }
        }
    }

    fn vehicles_in_ego_block(&self, tick: &TickData) -> usize {
        let block = self.block_of_tick(tick);
        tick.vehicles()
            .filter(|v| self.network.block_of_lane(v.lane) == block)
            .count()
    }

    fn pedestrian_near_ego(&self, tick: &TickData) -> bool {
        let ego = self.ego(tick);
        tick.pedestrians().any(|p| {
            p.lane
                .map_or(false, |l| self.network.lane(l).lane_type == LaneType::Driving)
                && p.location.distance_to(ego.location) <= PEDESTRIAN_PROXIMITY_METERS
        })
    }

    /// Index of the first bound exceeding `value`; a change of that index is
    /// the cut signal for the event strategies.
    fn bucket_index(&self, bounds: &[f64], value: f64) -> Result<usize, SegmentError> {
        if !value.is_finite() {
            return Err(SegmentError::UnsupportedInput(format!(
                "non-finite kinematic value {value} in bucket computation"
            )));
        }
        Ok(bounds
            .iter()
            .position(|b| *b > value)
            .unwrap_or(bounds.len()))
    }

    // ------------------------------------------------------------------
    // Fixed-size strategies
    // ------------------------------------------------------------------

    fn static_ticks(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        window: usize,
        step: usize,
        kind: &'static str,
    ) {
        let n = run.ticks.len();
        let window = window.max(1);
        let step = step.max(1);
        let mut i = 0;
        loop {
            if i + window > n {
                // Overlapping tail window ending at the last tick.
                let start = n.saturating_sub(window);
                self.push_extended(out, run, start, n, kind);
                break;
            }
            self.push_extended(out, run, i, i + window, kind);
            if i + window == n {
                break;
            }
            i += step;
        }
    }

    /// Emit `[start, end)` with junction extension applied to both edges.
    fn push_extended(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        start: usize,
        end: usize,
        kind: &'static str,
    ) {
        let start = self.extend_before_start(&run.ticks, start);
        let end = self.extend_after_end(&run.ticks, end);
        self.push_segment(out, run, start, end, kind);
    }

    fn static_meters(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        window_meters: f64,
        step_meters: f64,
        kind: &'static str,
    ) {
        let ticks = &run.ticks;
        let n = ticks.len();
        let last_valid = last_valid_start(ticks, window_meters);
        let mut i = 0;
        while i < n {
            if i > last_valid {
                self.push_extended(out, run, i, n, kind);
                break;
            }
            let (end, _) = index_at_distance(ticks, self.network, i, window_meters);
            self.push_extended(out, run, i, end + 1, kind);
            let (next, _) = index_at_distance(ticks, self.network, i, step_meters);
            i = next.max(i + 1);
        }
    }

    fn dynamic_meters(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        step_meters: f64,
        kind: &'static str,
        window_meters: impl Fn(&Vehicle) -> f64,
    ) -> Result<(), SegmentError> {
        let cap = self.max_tick_count.ok_or_else(|| {
            SegmentError::UnsupportedInput(format!(
                "{kind} requires a maximum segment tick count"
            ))
        })?;
        let ticks = &run.ticks;
        let n = ticks.len();
        let mut i = 0;
        while i < n {
            let meters = window_meters(self.ego(&ticks[i]));
            if !meters.is_finite() {
                return Err(SegmentError::UnsupportedInput(format!(
                    "non-finite window size {meters} m at tick index {i}"
                )));
            }
            let (end, _) = index_at_distance(ticks, self.network, i, meters);
            let mut e = end + 1;
            if e - i > cap {
                warn!(run_id = %run.id, kind, start = i, cap, "segment truncated to maximum");
                e = i + cap;
            }
            self.push_extended(out, run, i, e, kind);
            let (next, _) = index_at_distance(ticks, self.network, i, step_meters);
            i = next.max(i + 1);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Block-scoped strategies
    // ------------------------------------------------------------------

    fn by_block(&self, out: &mut Vec<Segment>, run: &SimulationRun, kind: &'static str) {
        for (s, e) in self.block_ranges(&run.ticks) {
            self.push_segment(out, run, s, e, kind);
        }
    }

    fn even_size(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        count: usize,
        add_junctions: bool,
        kind: &'static str,
    ) {
        let count = count.max(1);
        for (s, e) in self.block_ranges(&run.ticks) {
            if add_junctions && self.range_has_junction(&run.ticks, s, e) {
                self.push_block(out, run, s, e, kind);
                continue;
            }
            let len = e - s;
            let part = len / count;
            if part == 0 {
                self.push_segment(out, run, s, e, kind);
                continue;
            }
            for j in 0..count {
                let start = s + j * part;
                let end = if j == count - 1 { e } else { start + part };
                self.push_segment(out, run, start, end, kind);
            }
        }
    }

    fn by_length(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        meters: f64,
        add_junctions: bool,
        kind: &'static str,
    ) {
        for (s, e) in self.block_ranges(&run.ticks) {
            if add_junctions && self.range_has_junction(&run.ticks, s, e) {
                self.push_block(out, run, s, e, kind);
                continue;
            }
            let mut seg_start = s;
            let mut acc = 0.0;
            for i in s + 1..e {
                let prev = self.ego(&run.ticks[i - 1]).position_on_lane;
                let cur = self.ego(&run.ticks[i]).position_on_lane;
                acc += (cur - prev).abs();
                if acc >= meters {
                    self.push_segment(out, run, seg_start, i + 1, kind);
                    seg_start = i + 1;
                    acc = 0.0;
                }
            }
            self.push_segment(out, run, seg_start, e, kind);
        }
    }

    fn by_ticks(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        ticks: usize,
        add_junctions: bool,
        kind: &'static str,
    ) {
        let ticks_per_cut = ticks.max(1);
        for (s, e) in self.block_ranges(&run.ticks) {
            if add_junctions && self.range_has_junction(&run.ticks, s, e) {
                self.push_block(out, run, s, e, kind);
                continue;
            }
            let len = e - s;
            let full = len / ticks_per_cut;
            if full <= 1 {
                self.push_segment(out, run, s, e, kind);
                continue;
            }
            for j in 0..full {
                let start = s + j * ticks_per_cut;
                // The last chunk absorbs the remainder.
                let end = if j == full - 1 { e } else { start + ticks_per_cut };
                self.push_segment(out, run, start, end, kind);
            }
        }
    }

    fn by_speed_limits(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        add_junctions: bool,
        kind: &'static str,
    ) {
        let limit_at = |tick: &TickData| -> Option<f64> {
            let ego = self.ego(tick);
            self.network
                .lane(ego.lane)
                .applicable_speed_limit(ego.position_on_lane)
                .map(|sl| sl.speed_limit)
        };
        for (s, e) in self.block_ranges(&run.ticks) {
            if add_junctions && self.range_has_junction(&run.ticks, s, e) {
                self.push_block(out, run, s, e, kind);
                continue;
            }
            let mut seg_start = s;
            let mut current = limit_at(&run.ticks[s]);
            for i in s + 1..e {
                let next = limit_at(&run.ticks[i]);
                if next != current {
                    self.push_segment(out, run, seg_start, i, kind);
                    seg_start = i;
                    current = next;
                }
            }
            self.push_segment(out, run, seg_start, e, kind);
        }
    }

    // ------------------------------------------------------------------
    // Event (bucket) strategies
    // ------------------------------------------------------------------

    fn bucket_cut(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        kind: &'static str,
        bounds: &[f64],
        value: impl Fn(&Self, &TickData) -> Result<f64, SegmentError>,
    ) -> Result<(), SegmentError> {
        let ticks = &run.ticks;
        let mut seg_start = 0;
        let mut current = self.bucket_index(bounds, value(self, &ticks[0])?)?;
        for i in 1..ticks.len() {
            let bucket = self.bucket_index(bounds, value(self, &ticks[i])?)?;
            if bucket != current {
                self.push_segment(out, run, seg_start, i, kind);
                seg_start = i;
                current = bucket;
            }
        }
        self.push_segment(out, run, seg_start, ticks.len(), kind);
        Ok(())
    }

    fn pedestrian_proximity_cut(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        kind: &'static str,
    ) {
        let ticks = &run.ticks;
        let mut seg_start = 0;
        let mut current = self.pedestrian_near_ego(&ticks[0]);
        for i in 1..ticks.len() {
            let near = self.pedestrian_near_ego(&ticks[i]);
            if near != current {
                self.push_segment(out, run, seg_start, i, kind);
                seg_start = i;
                current = near;
            }
        }
        self.push_segment(out, run, seg_start, ticks.len(), kind);
    }

    fn lane_change_windows(&self, out: &mut Vec<Segment>, run: &SimulationRun, kind: &'static str) {
        let ticks = &run.ticks;
        for i in 1..ticks.len() {
            if self.ego(&ticks[i]).lane != self.ego(&ticks[i - 1]).lane {
                let start = i.saturating_sub(LANE_CHANGE_BACKWARD_TICKS);
                let end = (i + LANE_CHANGE_FORWARD_TICKS).min(ticks.len());
                self.push_segment(out, run, start, end, kind);
            }
        }
    }

    // ------------------------------------------------------------------
    // Sliding-window strategies
    // ------------------------------------------------------------------

    fn slide_tick_windows(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        window: usize,
        step: usize,
        add_junctions: bool,
        kind: &'static str,
    ) {
        let ticks = &run.ticks;
        let n = ticks.len();
        let window = window.max(self.min_tick_count).max(1);
        let step = step.max(1);
        if add_junctions {
            self.push_junction_blocks(out, run, kind);
        }
        let mut i = 0;
        while i + window < n {
            if add_junctions {
                // Junction content is covered by the prepended blocks.
                if !self.range_has_junction(ticks, i, i + window) {
                    self.push_segment(out, run, i, i + window, kind);
                }
            } else {
                let end = self.extend_after_end(ticks, i + window);
                self.push_segment(out, run, i, end, kind);
            }
            i += step;
        }
    }

    fn slide_meter_windows(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        window_meters: f64,
        step_meters: f64,
        add_junctions: bool,
        kind: &'static str,
    ) {
        let ticks = &run.ticks;
        if add_junctions {
            self.push_junction_blocks(out, run, kind);
        }
        let last_valid = last_valid_start(ticks, window_meters);
        let mut i = 0;
        while i <= last_valid {
            let (end, _) = index_at_distance(ticks, self.network, i, window_meters);
            let mut e = end + 1;
            if add_junctions {
                if !self.range_has_junction(ticks, i, e) {
                    self.push_segment(out, run, i, e, kind);
                }
            } else {
                e = self.extend_after_end(ticks, e);
                self.push_segment(out, run, i, e, kind);
            }
            let (next, _) = index_at_distance(ticks, self.network, i, step_meters);
            i = next.max(i + 1);
        }
    }

    fn slide_within_blocks(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        window: usize,
        step: usize,
        add_junctions: bool,
        kind: &'static str,
    ) {
        let window = window.max(1);
        let step = step.max(1);
        for (s, e) in self.block_ranges(&run.ticks) {
            if add_junctions && self.range_has_junction(&run.ticks, s, e) {
                self.push_block(out, run, s, e, kind);
                continue;
            }
            if e - s < window {
                // The block cannot fit one window; emit it whole, once.
                self.push_segment(out, run, s, e, kind);
                continue;
            }
            let mut i = s;
            while i + window <= e {
                self.push_segment(out, run, i, i + window, kind);
                i += step;
            }
        }
    }

    fn halving(&self, out: &mut Vec<Segment>, run: &SimulationRun, kind: &'static str) {
        let n = run.ticks.len();
        for divisor in [1usize, 2, 4, 8, 16] {
            let window = n / divisor;
            if window < self.min_tick_count || window == 0 {
                debug!(
                    run_id = %run.id,
                    window,
                    min = self.min_tick_count,
                    "halving window smaller than minimum, pass skipped"
                );
                continue;
            }
            let step = (window / 10).max(1);
            let mut i = 0;
            while i + window <= n {
                self.push_segment(out, run, i, i + window, kind);
                i += step;
            }
        }
    }

    fn rotating(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        step: usize,
        add_junctions: bool,
        kind: &'static str,
    ) {
        let ticks = &run.ticks;
        let n = ticks.len();
        let step = step.max(1);
        let mut rng = StdRng::seed_from_u64(self.rng_seed);
        if add_junctions {
            self.push_junction_blocks(out, run, kind);
        }
        let mut i = 0;
        loop {
            let window = ROTATING_TICK_SIZES[rng.gen_range(0..ROTATING_TICK_SIZES.len())];
            if i + window >= n {
                break;
            }
            self.emit_sampled_window(out, run, i, window, add_junctions, kind);
            i += step;
        }
    }

    fn density_windows(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        step: usize,
        add_junctions: bool,
        kind: &'static str,
    ) {
        let ticks = &run.ticks;
        let n = ticks.len();
        let step = step.max(1);
        if add_junctions {
            self.push_junction_blocks(out, run, kind);
        }
        let mut i = 0;
        while i < n {
            let count = self.vehicles_in_ego_block(&ticks[i]) as f64;
            let bucket = TRAFFIC_DENSITY_BOUNDS
                .iter()
                .position(|b| *b > count)
                .unwrap_or(DENSITY_TICK_SIZES.len() - 1)
                .min(DENSITY_TICK_SIZES.len() - 1);
            let window = DENSITY_TICK_SIZES[bucket];
            if i + window >= n {
                break;
            }
            self.emit_sampled_window(out, run, i, window, add_junctions, kind);
            i += step;
        }
    }

    /// One window of the sampled-size sliding strategies, with the family's
    /// junction handling.
    fn emit_sampled_window(
        &self,
        out: &mut Vec<Segment>,
        run: &SimulationRun,
        start: usize,
        window: usize,
        add_junctions: bool,
        kind: &'static str,
    ) {
        if add_junctions {
            if !self.range_has_junction(&run.ticks, start, start + window) {
                self.push_segment(out, run, start, start + window, kind);
            }
        } else {
            let end = self.extend_after_end(&run.ticks, start + window);
            self.push_segment(out, run, start, end, kind);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{
        BlockDescriptor, LaneDescriptor, LaneType, RoadDescriptor, SpeedLimit,
    };
    use crate::trace::{Actor, Pedestrian, SimTime, Vec3};

    fn lane_desc(lane_id: i32, lane_type: LaneType) -> LaneDescriptor {
        LaneDescriptor {
            lane_id,
            lane_type,
            successor_lanes: Vec::new(),
            predecessor_lanes: Vec::new(),
            speed_limits: Vec::new(),
        }
    }

    /// Block "a": road 1 (two driving lanes, positional limits on the
    /// first), block "j": junction road 7, block "b": road 2 (driving lane
    /// plus a sidewalk lane).
    fn test_network() -> RoadNetwork {
        let mut limited = lane_desc(-1, LaneType::Driving);
        limited.speed_limits = vec![
            SpeedLimit { speed_limit: 30.0, from_meters: 0.0, to_meters: 1_000.0 },
            SpeedLimit { speed_limit: 50.0, from_meters: 1_000.0, to_meters: 10_000.0 },
        ];
        RoadNetwork::build(&[
            BlockDescriptor {
                id: "a".into(),
                roads: vec![RoadDescriptor {
                    road_id: 1,
                    is_junction: false,
                    lanes: vec![limited, lane_desc(-2, LaneType::Driving)],
                }],
            },
            BlockDescriptor {
                id: "j".into(),
                roads: vec![RoadDescriptor {
                    road_id: 7,
                    is_junction: true,
                    lanes: vec![lane_desc(1, LaneType::Driving)],
                }],
            },
            BlockDescriptor {
                id: "b".into(),
                roads: vec![RoadDescriptor {
                    road_id: 2,
                    is_junction: false,
                    lanes: vec![lane_desc(-1, LaneType::Driving), lane_desc(-3, LaneType::Sidewalk)],
                }],
            },
        ])
        .unwrap()
    }

    struct TickState {
        road_id: i64,
        lane_id: i32,
        position: f64,
        speed_kmh: f64,
    }

    fn make_tick(net: &RoadNetwork, i: usize, state: &TickState) -> TickData {
        TickData {
            current_tick: SimTime(i as f64 * 0.1),
            actors: vec![Actor::Vehicle(Vehicle {
                id: 1,
                location: Vec3::new(state.position, 0.0, 0.0),
                is_ego: true,
                velocity: Vec3::new(state.speed_kmh / 3.6, 0.0, 0.0),
                acceleration: Vec3::ZERO,
                lane: net.find_lane(state.road_id, state.lane_id).unwrap(),
                position_on_lane: state.position,
            })],
        }
    }

    /// `n` ticks on road 1, 1 m apart, constant `speed_kmh`.
    fn straight_run(net: &RoadNetwork, n: usize, speed_kmh: f64) -> SimulationRun {
        let ticks = (0..n)
            .map(|i| {
                make_tick(
                    net,
                    i,
                    &TickState { road_id: 1, lane_id: -1, position: i as f64, speed_kmh },
                )
            })
            .collect();
        SimulationRun { id: "run0".into(), ticks }
    }

    /// Road 1 for `a` ticks, junction road 7 for `j` ticks, road 2 after.
    fn junction_run(net: &RoadNetwork, a: usize, j: usize, b: usize) -> SimulationRun {
        let ticks = (0..a + j + b)
            .map(|i| {
                let (road_id, lane_id) = if i < a {
                    (1, -1)
                } else if i < a + j {
                    (7, 1)
                } else {
                    (2, -1)
                };
                make_tick(
                    net,
                    i,
                    &TickState { road_id, lane_id, position: i as f64, speed_kmh: 36.0 },
                )
            })
            .collect();
        SimulationRun { id: "run0".into(), ticks }
    }

    fn lens(segments: &[Segment]) -> Vec<usize> {
        segments.iter().map(Segment::tick_count).collect()
    }

    #[test]
    fn empty_run_yields_empty_output() {
        let net = test_network();
        let seg = Segmenter::new(&net, 10, None);
        let run = SimulationRun { id: "run0".into(), ticks: Vec::new() };
        assert!(seg.segment(&run, &Strategy::ByBlock).unwrap().is_empty());
    }

    #[test]
    fn static_ticks_emits_overlapping_tail_window() {
        let net = test_network();
        let seg = Segmenter::new(&net, 10, None);
        let run = straight_run(&net, 250, 36.0);
        let out = seg
            .segment(&run, &Strategy::StaticLengthTicks { window: 100, step: 100 })
            .unwrap();

        assert_eq!(lens(&out), vec![100, 100, 100]);
        assert_eq!(out[2].ticks[0].current_tick, run.ticks[150].current_tick);
        assert_eq!(out[2].ticks[99].current_tick, run.ticks[249].current_tick);
        for s in &out {
            assert_eq!(s.simulation_run_id, "run0");
            assert_eq!(s.segment_source, "run0");
        }
    }

    #[test]
    fn static_ticks_exact_fit_emits_no_duplicate_tail() {
        let net = test_network();
        let seg = Segmenter::new(&net, 10, None);
        let run = straight_run(&net, 200, 36.0);
        let out = seg
            .segment(&run, &Strategy::StaticLengthTicks { window: 100, step: 100 })
            .unwrap();
        assert_eq!(lens(&out), vec![100, 100]);
    }

    #[test]
    fn static_ticks_extends_across_junctions() {
        let net = test_network();
        let seg = Segmenter::new(&net, 1, None);
        // Ticks 0..5 on road 1, 5..8 in the junction, 8..15 on road 2.
        let run = junction_run(&net, 5, 3, 7);
        let out = seg
            .segment(&run, &Strategy::StaticLengthTicks { window: 6, step: 6 })
            .unwrap();

        // First window [0, 6) ends on a junction tick and extends to 8.
        assert_eq!(out[0].tick_count(), 8);
        // Second window [6, 12) starts on a junction tick and extends back
        // to tick 5.
        assert_eq!(out[1].ticks[0].current_tick, run.ticks[5].current_tick);
    }

    #[test]
    fn by_block_keeps_one_block_per_segment() {
        let net = test_network();
        let seg = Segmenter::new(&net, 1, None);
        let run = junction_run(&net, 5, 3, 7);
        let out = seg.segment(&run, &Strategy::ByBlock).unwrap();
        assert_eq!(lens(&out), vec![5, 3, 7]);
        for s in &out {
            let helper = Segmenter::new(&net, 1, None);
            let blocks: Vec<_> = s.ticks.iter().map(|t| helper.block_of_tick(t)).collect();
            assert!(blocks.windows(2).all(|w| w[0] == w[1]));
        }
    }

    #[test]
    fn whole_run_strategy_copies_the_run() {
        let net = test_network();
        let seg = Segmenter::new(&net, 10, None);
        let run = straight_run(&net, 40, 36.0);
        let out = seg.segment(&run, &Strategy::None).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].ticks, run.ticks);

        // Re-segmenting the emitted whole-run segment yields it again.
        let again = SimulationRun { id: run.id.clone(), ticks: out[0].ticks.clone() };
        let out2 = seg.segment(&again, &Strategy::None).unwrap();
        assert_eq!(out2[0].ticks, out[0].ticks);
    }

    #[test]
    fn speed_buckets_cut_once_on_a_monotone_ramp() {
        let net = test_network();
        let seg = Segmenter::new(&net, 10, None);
        // Speed rises 10 → 40 km/h over 120 ticks; the only bucket bounds
        // crossed are 15 and 35 km/h.
        let ticks: Vec<TickData> = (0..120)
            .map(|i| {
                let speed = 10.0 + 30.0 * i as f64 / 119.0;
                make_tick(
                    &net,
                    i,
                    &TickState { road_id: 1, lane_id: -1, position: i as f64, speed_kmh: speed },
                )
            })
            .collect();
        let run = SimulationRun { id: "run0".into(), ticks };
        let out = seg.segment(&run, &Strategy::ByDynamicSpeed).unwrap();

        assert_eq!(out.len(), 3);
        for s in &out {
            assert!(s.tick_count() >= 10);
            let helper = Segmenter::new(&net, 10, None);
            let buckets: Vec<usize> = s
                .ticks
                .iter()
                .map(|t| {
                    helper
                        .bucket_index(&SPEED_BOUNDS, t.ego().unwrap().eff_velocity_km_per_h())
                        .unwrap()
                })
                .collect();
            assert!(buckets.windows(2).all(|w| w[0] == w[1]));
        }
    }

    #[test]
    fn non_finite_speed_is_rejected() {
        let net = test_network();
        let seg = Segmenter::new(&net, 1, None);
        let mut run = straight_run(&net, 20, 36.0);
        if let Actor::Vehicle(v) = &mut run.ticks[3].actors[0] {
            v.velocity = Vec3::new(f64::NAN, 0.0, 0.0);
        }
        assert!(matches!(
            seg.segment(&run, &Strategy::ByDynamicSpeed),
            Err(SegmentError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn dynamic_speed_meters_windows_match_the_formula() {
        let net = test_network();
        let seg = Segmenter::new(&net, 10, Some(200));
        // 60 km/h at 0.1 s per tick ⇒ 1.666… m per tick; window metres are
        // 60·(1 + 60/300) = 72 m ⇒ 44 steps; a 9.5 m step ⇒ 6 ticks.
        let ticks: Vec<TickData> = (0..200)
            .map(|i| {
                make_tick(
                    &net,
                    i,
                    &TickState {
                        road_id: 1,
                        lane_id: -1,
                        position: i as f64 * (60.0 / 3.6) * 0.1,
                        speed_kmh: 60.0,
                    },
                )
            })
            .collect();
        let run = SimulationRun { id: "run0".into(), ticks };
        let out = seg
            .segment(&run, &Strategy::DynamicMetersSpeed { step: 9.5 })
            .unwrap();

        assert_eq!(out[0].tick_count(), 45);
        assert_eq!(out[1].ticks[0].current_tick, run.ticks[6].current_tick);
    }

    #[test]
    fn dynamic_meters_truncates_to_the_cap() {
        let net = test_network();
        let seg = Segmenter::new(&net, 10, Some(20));
        let run = straight_run(&net, 200, 60.0);
        let out = seg
            .segment(&run, &Strategy::DynamicMetersSpeed { step: 10.0 })
            .unwrap();
        assert!(out.iter().all(|s| s.tick_count() <= 20));
    }

    #[test]
    fn dynamic_meters_without_cap_is_rejected() {
        let net = test_network();
        let seg = Segmenter::new(&net, 10, None);
        let run = straight_run(&net, 50, 36.0);
        assert!(matches!(
            seg.segment(&run, &Strategy::DynamicMetersSpeed { step: 10.0 }),
            Err(SegmentError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn by_ticks_last_chunk_absorbs_remainder() {
        let net = test_network();
        let seg = Segmenter::new(&net, 1, None);
        let run = straight_run(&net, 50, 36.0);
        let out = seg
            .segment(&run, &Strategy::ByTicks { ticks: 15, add_junctions: false })
            .unwrap();
        assert_eq!(lens(&out), vec![15, 15, 20]);
    }

    #[test]
    fn even_size_last_part_absorbs_remainder() {
        let net = test_network();
        let seg = Segmenter::new(&net, 1, None);
        let run = straight_run(&net, 50, 36.0);
        let out = seg
            .segment(&run, &Strategy::EvenSize { count: 3, add_junctions: false })
            .unwrap();
        assert_eq!(lens(&out), vec![16, 16, 18]);
    }

    #[test]
    fn junction_blocks_are_inviolable_with_add_junctions() {
        let net = test_network();
        let seg = Segmenter::new(&net, 1, None);
        let run = junction_run(&net, 12, 4, 12);
        let out = seg
            .segment(&run, &Strategy::EvenSize { count: 2, add_junctions: true })
            .unwrap();
        // Junction block [12, 16) stays whole; the two road blocks split.
        assert_eq!(lens(&out), vec![6, 6, 4, 6, 6]);
    }

    #[test]
    fn speed_limit_changes_cut_blocks() {
        let net = test_network();
        let seg = Segmenter::new(&net, 1, None);
        // Positions 990..1010 m cross the 30 → 50 km/h boundary at 1000 m.
        let ticks: Vec<TickData> = (0..20)
            .map(|i| {
                make_tick(
                    &net,
                    i,
                    &TickState {
                        road_id: 1,
                        lane_id: -1,
                        position: 990.0 + i as f64,
                        speed_kmh: 36.0,
                    },
                )
            })
            .collect();
        let run = SimulationRun { id: "run0".into(), ticks };
        let out = seg
            .segment(&run, &Strategy::BySpeedLimits { add_junctions: false })
            .unwrap();
        assert_eq!(lens(&out), vec![10, 10]);
    }

    #[test]
    fn lane_change_emits_a_bounded_window() {
        let net = test_network();
        let seg = Segmenter::new(&net, 1, None);
        let ticks: Vec<TickData> = (0..160)
            .map(|i| {
                let lane_id = if i < 40 { -1 } else { -2 };
                make_tick(
                    &net,
                    i,
                    &TickState { road_id: 1, lane_id, position: i as f64, speed_kmh: 36.0 },
                )
            })
            .collect();
        let run = SimulationRun { id: "run0".into(), ticks };
        let out = seg.segment(&run, &Strategy::ByDynamicLaneChanges).unwrap();
        assert_eq!(out.len(), 1);
        // Change at i = 40: window [30, 140).
        assert_eq!(out[0].tick_count(), 110);
        assert_eq!(out[0].ticks[0].current_tick, run.ticks[30].current_tick);
    }

    #[test]
    fn pedestrian_proximity_flip_cuts_the_run() {
        let net = test_network();
        let seg = Segmenter::new(&net, 10, None);
        let ticks: Vec<TickData> = (0..40)
            .map(|i| {
                let mut tick = make_tick(
                    &net,
                    i,
                    &TickState { road_id: 1, lane_id: -1, position: 0.0, speed_kmh: 36.0 },
                );
                // From tick 20 on a pedestrian stands on a driving lane 5 m
                // from the ego.
                if i >= 20 {
                    tick.actors.push(Actor::Pedestrian(Pedestrian {
                        id: 50,
                        location: Vec3::new(5.0, 0.0, 0.0),
                        lane: Some(net.find_lane(2, -1).unwrap()),
                    }));
                }
                tick
            })
            .collect();
        let run = SimulationRun { id: "run0".into(), ticks };
        let out = seg
            .segment(&run, &Strategy::ByDynamicPedestrianProximity)
            .unwrap();
        assert_eq!(lens(&out), vec![20, 20]);
    }

    #[test]
    fn sidewalk_pedestrians_do_not_count_as_near() {
        let net = test_network();
        let seg = Segmenter::new(&net, 10, None);
        let ticks: Vec<TickData> = (0..30)
            .map(|i| {
                let mut tick = make_tick(
                    &net,
                    i,
                    &TickState { road_id: 1, lane_id: -1, position: 0.0, speed_kmh: 36.0 },
                );
                if i >= 15 {
                    tick.actors.push(Actor::Pedestrian(Pedestrian {
                        id: 50,
                        location: Vec3::new(2.0, 0.0, 0.0),
                        lane: Some(net.find_lane(2, -3).unwrap()),
                    }));
                }
                tick
            })
            .collect();
        let run = SimulationRun { id: "run0".into(), ticks };
        let out = seg
            .segment(&run, &Strategy::ByDynamicPedestrianProximity)
            .unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn sliding_window_add_junctions_prepends_whole_blocks() {
        let net = test_network();
        let seg = Segmenter::new(&net, 2, None);
        let run = junction_run(&net, 10, 4, 10);
        let out = seg
            .segment(
                &run,
                &Strategy::SlidingWindow { window: 6, step: 3, add_junctions: true },
            )
            .unwrap();

        // The junction block comes first and is the only segment containing
        // junction ticks.
        let helper = Segmenter::new(&net, 2, None);
        assert_eq!(out[0].tick_count(), 4);
        assert!(out[0].ticks.iter().all(|t| helper.tick_on_junction(t)));
        for s in &out[1..] {
            assert!(!s.ticks.iter().any(|t| helper.tick_on_junction(t)));
        }
    }

    #[test]
    fn sliding_window_without_junctions_extends_past_the_end_tick() {
        let net = test_network();
        let seg = Segmenter::new(&net, 2, None);
        let run = junction_run(&net, 5, 3, 10);
        let out = seg
            .segment(
                &run,
                &Strategy::SlidingWindow { window: 6, step: 100, add_junctions: false },
            )
            .unwrap();
        // Window [0, 6): tick 5 is a junction tick, so the extension runs to
        // the first non-junction tick at index 8.
        assert_eq!(out[0].tick_count(), 8);
    }

    #[test]
    fn rotating_is_reproducible_and_uses_listed_sizes() {
        let net = test_network();
        let run = straight_run(&net, 400, 36.0);
        let a = Segmenter::new(&net, 10, None)
            .rng_seed(42)
            .segment(&run, &Strategy::SlidingWindowRotating { step: 50, add_junctions: false })
            .unwrap();
        let b = Segmenter::new(&net, 10, None)
            .rng_seed(42)
            .segment(&run, &Strategy::SlidingWindowRotating { step: 50, add_junctions: false })
            .unwrap();
        assert_eq!(lens(&a), lens(&b));
        assert!(a
            .iter()
            .all(|s| ROTATING_TICK_SIZES.contains(&s.tick_count())));
    }

    #[test]
    fn halving_skips_sizes_below_minimum() {
        let net = test_network();
        let seg = Segmenter::new(&net, 30, None);
        let run = straight_run(&net, 100, 36.0);
        let out = seg.segment(&run, &Strategy::SlidingWindowHalving).unwrap();
        // Sizes 100 and 50 survive; 25, 12, 6 fall below the minimum.
        assert!(out.iter().all(|s| s.tick_count() == 100 || s.tick_count() == 50));
        assert!(out.iter().any(|s| s.tick_count() == 50));
    }

    #[test]
    fn sliding_by_block_emits_unfitting_blocks_whole() {
        let net = test_network();
        let seg = Segmenter::new(&net, 1, None);
        let run = junction_run(&net, 20, 3, 4);
        let out = seg
            .segment(
                &run,
                &Strategy::SlidingWindowByBlock { window: 8, step: 4, add_junctions: false },
            )
            .unwrap();
        // Road-1 block (20 ticks): windows at 0, 4, 8, 12; junction block (3)
        // and road-2 block (4) cannot fit a window and come out whole.
        assert_eq!(lens(&out), vec![8, 8, 8, 8, 3, 4]);
    }

    #[test]
    fn deep_copies_isolate_segments_from_each_other() {
        let net = test_network();
        let seg = Segmenter::new(&net, 1, None);
        let run = straight_run(&net, 30, 36.0);
        let mut out = seg
            .segment(&run, &Strategy::StaticLengthTicks { window: 20, step: 5 })
            .unwrap();
        let before: Vec<TickData> = out[1].ticks.clone();

        // Segment 0 overlaps segment 1; mutating it must not leak.
        if let Actor::Vehicle(v) = &mut out[0].ticks[10].actors[0] {
            v.location = Vec3::new(9999.0, 0.0, 0.0);
        }
        assert_eq!(out[1].ticks, before);
        assert_eq!(run.ticks[10].ego().unwrap().location.x, 10.0);
    }

    #[test]
    fn composite_strategy_concatenates_sub_strategies_in_order() {
        let net = test_network();
        let seg = Segmenter::new(&net, 5, None);
        let run = junction_run(&net, 60, 6, 60);
        let out = seg
            .segment(&run, &Strategy::ByDynamicVariables { add_junctions: true })
            .unwrap();

        let kinds: Vec<&str> = out.iter().map(|s| s.segmentation_type).collect();
        // Sub-strategy tags appear in the fixed dispatch order.
        let first_by_block = kinds.iter().position(|k| *k == "BY_BLOCK").unwrap();
        let first_half_overlap = kinds
            .iter()
            .position(|k| *k == "SLIDING_WINDOW_HALF_OVERLAP")
            .unwrap();
        assert!(first_by_block < first_half_overlap);
        assert!(out.len() > 3);
    }

    #[test]
    fn unknown_strategy_name_is_rejected() {
        let opts = SegmentationOptions {
            segmentation_type: "BY_MOON_PHASE".into(),
            ..Default::default()
        };
        assert!(matches!(
            Strategy::from_options(&opts),
            Err(SegmentError::UnsupportedStrategy(_))
        ));

        let missing = SegmentationOptions {
            segmentation_type: "SLIDING_WINDOW".into(),
            value: Some(100.0),
            secondary_value: None,
            add_junctions: false,
        };
        assert!(matches!(
            Strategy::from_options(&missing),
            Err(SegmentError::UnsupportedStrategy(_))
        ));
    }

    #[test]
    fn options_resolve_to_the_matching_variant() {
        let opts = SegmentationOptions {
            segmentation_type: "SLIDING_WINDOW".into(),
            value: Some(100.0),
            secondary_value: Some(25.0),
            add_junctions: true,
        };
        assert_eq!(
            Strategy::from_options(&opts).unwrap(),
            Strategy::SlidingWindow { window: 100, step: 25, add_junctions: true }
        );

        let opts = SegmentationOptions {
            segmentation_type: "BY_BLOCK".into(),
            ..Default::default()
        };
        assert_eq!(Strategy::from_options(&opts).unwrap(), Strategy::ByBlock);
    }
}
