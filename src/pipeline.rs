//! Pipeline driver: file → raw ticks → cleaned runs → segment stream
//!
//! Three cooperating tasks chained by two typed channels:
//!
//! 1. the **loader** (blocking I/O) walks the map-grouped run descriptors,
//!    builds each map's road network once, decodes dynamic documents, and
//!    pushes raw runs onto an unbounded channel;
//! 2. the **slicer** (CPU-bound) pops raw runs, applies junction cleaning,
//!    conversion, kinematics, and segmentation, and pushes each segment onto
//!    a bounded channel of capacity `simulation_run_prefetch_size` — the
//!    back-pressure point of the whole pipeline;
//! 3. the **consumer** is the public [`SegmentStream`]; an exhausted channel
//!    terminates it.
//!
//! A fourth task logs the throughput counters once per second.
//!
//! Dropping the stream is the cancellation signal: the producers observe the
//! closed channel on their next send and unwind. Fatal errors anywhere are
//! logged as a terminal diagnostic and close the segment channel; non-fatal
//! conditions never interrupt the stream.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cleaner::{clean_junction_data, CleanError};
use crate::convert::{convert_run, fill_kinematics, ConvertError};
use crate::loader::{self, LoaderError};
use crate::map::{MapError, RoadNetwork};
use crate::segment::{SegmentError, Segmenter, Strategy};
use crate::trace::{RawTick, Segment};

/// Errors surfaced by the pipeline. Task-internal failures are logged and
/// close the stream; only configuration problems are returned directly.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A file failed to resolve or decode.
    #[error(transparent)]
    Loader(#[from] LoaderError),
    /// The static data failed to index.
    #[error(transparent)]
    Map(#[from] MapError),
    /// Junction cleaning hit an inconsistent trace.
    #[error(transparent)]
    Clean(#[from] CleanError),
    /// Conversion or kinematics rejected the run.
    #[error(transparent)]
    Convert(#[from] ConvertError),
    /// The segmenter rejected the strategy or the timeline.
    #[error(transparent)]
    Segment(#[from] SegmentError),
    /// `simulation_run_prefetch_size` must be positive.
    #[error("simulation run prefetch size must be positive")]
    ZeroPrefetchSize,
}

// ============================================================================
// Configuration
// ============================================================================

/// The pipeline's recognised options, with the defaults of the recording
/// toolchain. Construct with [`PipelineConfig::new`] and adjust through the
/// fluent setters.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Each map file paired with the dynamic files recorded on it.
    pub map_to_dynamic_files: Vec<(PathBuf, Vec<PathBuf>)>,
    /// Emit one run per vehicle instead of following the recorded ego tags.
    pub use_every_vehicle_as_ego: bool,
    /// Drop threshold for non-junction segments.
    pub min_segment_tick_count: usize,
    /// Truncation cap for the dynamic window strategies.
    pub max_segment_tick_count: Option<usize>,
    /// Flatten all maps and process dynamic files in ascending seed order.
    pub order_files_by_seed: bool,
    /// Capacity of the bounded segment channel.
    pub simulation_run_prefetch_size: usize,
    /// The segmentation strategy to apply to every run.
    pub strategy: Strategy,
    /// Seed for the rotating window strategy.
    pub rng_seed: u64,
}

impl PipelineConfig {
    /// A configuration over the given map → dynamic-files grouping, with
    /// defaults for everything else.
    pub fn new(map_to_dynamic_files: Vec<(PathBuf, Vec<PathBuf>)>) -> Self {
        PipelineConfig {
            map_to_dynamic_files,
            use_every_vehicle_as_ego: false,
            min_segment_tick_count: 10,
            max_segment_tick_count: None,
            order_files_by_seed: false,
            simulation_run_prefetch_size: 500,
            strategy: Strategy::ByBlock,
            rng_seed: 0,
        }
    }

    /// See [`PipelineConfig::use_every_vehicle_as_ego`].
    pub fn every_vehicle_as_ego(mut self, yes: bool) -> Self {
        self.use_every_vehicle_as_ego = yes;
        self
    }

    /// See [`PipelineConfig::min_segment_tick_count`].
    pub fn min_ticks(mut self, min: usize) -> Self {
        self.min_segment_tick_count = min;
        self
    }

    /// See [`PipelineConfig::max_segment_tick_count`].
    pub fn max_ticks(mut self, max: usize) -> Self {
        self.max_segment_tick_count = Some(max);
        self
    }

    /// See [`PipelineConfig::order_files_by_seed`].
    pub fn ordered_by_seed(mut self, yes: bool) -> Self {
        self.order_files_by_seed = yes;
        self
    }

    /// See [`PipelineConfig::simulation_run_prefetch_size`].
    pub fn prefetch_size(mut self, size: usize) -> Self {
        self.simulation_run_prefetch_size = size;
        self
    }

    /// See [`PipelineConfig::strategy`].
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// See [`PipelineConfig::rng_seed`].
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = seed;
        self
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Process-wide throughput counters, updated on every channel push/pop.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    read_simulation_runs: AtomicUsize,
    simulation_runs_buffer: AtomicUsize,
    sliced_simulation_runs: AtomicUsize,
    segments_buffer: AtomicUsize,
    finished: AtomicBool,
}

/// A point-in-time copy of [`PipelineMetrics`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Raw runs decoded so far.
    pub read_simulation_runs: usize,
    /// Raw runs decoded but not yet sliced.
    pub simulation_runs_buffer: usize,
    /// Runs fully segmented so far.
    pub sliced_simulation_runs: usize,
    /// Segments produced but not yet consumed.
    pub segments_buffer: usize,
    /// Whether the slicer has finished.
    pub is_finished: bool,
}

impl PipelineMetrics {
    /// Copy the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            read_simulation_runs: self.read_simulation_runs.load(Ordering::Relaxed),
            simulation_runs_buffer: self.simulation_runs_buffer.load(Ordering::Relaxed),
            sliced_simulation_runs: self.sliced_simulation_runs.load(Ordering::Relaxed),
            segments_buffer: self.segments_buffer.load(Ordering::Relaxed),
            is_finished: self.finished.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Stream & launch
// ============================================================================

/// One decoded run travelling the raw channel.
struct RawRun {
    run_id: String,
    network: Arc<RoadNetwork>,
    ticks: Vec<RawTick>,
}

/// The lazy, finite segment stream — the pipeline's only public product.
///
/// Dropping the stream cancels the pipeline.
pub struct SegmentStream {
    rx: mpsc::Receiver<Segment>,
    metrics: Arc<PipelineMetrics>,
    printer: JoinHandle<()>,
}

impl SegmentStream {
    /// The next segment, or `None` once the pipeline has drained.
    pub async fn next(&mut self) -> Option<Segment> {
        let segment = self.rx.recv().await;
        if segment.is_some() {
            self.metrics.segments_buffer.fetch_sub(1, Ordering::Relaxed);
        }
        segment
    }

    /// Blocking variant of [`SegmentStream::next`] for synchronous callers.
    ///
    /// Must not be called from within an async task.
    pub fn blocking_next(&mut self) -> Option<Segment> {
        let segment = self.rx.blocking_recv();
        if segment.is_some() {
            self.metrics.segments_buffer.fetch_sub(1, Ordering::Relaxed);
        }
        segment
    }

    /// The current throughput counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Adapt the stream into a blocking iterator for synchronous callers.
    pub fn into_blocking_iter(self) -> BlockingSegments {
        BlockingSegments { stream: self }
    }
}

impl Drop for SegmentStream {
    fn drop(&mut self) {
        self.printer.abort();
        self.rx.close();
    }
}

/// Blocking iterator adapter over a [`SegmentStream`].
pub struct BlockingSegments {
    stream: SegmentStream,
}

impl Iterator for BlockingSegments {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        self.stream.blocking_next()
    }
}

/// Options the slicer needs per run.
#[derive(Clone)]
struct SliceOptions {
    use_every_vehicle_as_ego: bool,
    min_segment_tick_count: usize,
    max_segment_tick_count: Option<usize>,
    rng_seed: u64,
    strategy: Strategy,
}

/// Start the pipeline and hand back its segment stream.
///
/// Must be called within a tokio runtime; the loader and slicer run on the
/// blocking pool, the status printer on the async executor.
pub fn launch(config: PipelineConfig) -> Result<SegmentStream, PipelineError> {
    if config.simulation_run_prefetch_size == 0 {
        return Err(PipelineError::ZeroPrefetchSize);
    }

    let metrics = Arc::new(PipelineMetrics::default());
    let (raw_tx, raw_rx) = mpsc::unbounded_channel::<RawRun>();
    let (segment_tx, segment_rx) = mpsc::channel::<Segment>(config.simulation_run_prefetch_size);

    let descriptors = run_descriptors(&config);
    let slice_options = SliceOptions {
        use_every_vehicle_as_ego: config.use_every_vehicle_as_ego,
        min_segment_tick_count: config.min_segment_tick_count,
        max_segment_tick_count: config.max_segment_tick_count,
        rng_seed: config.rng_seed,
        strategy: config.strategy.clone(),
    };

    let loader_metrics = Arc::clone(&metrics);
    tokio::task::spawn_blocking(move || load_runs(descriptors, raw_tx, loader_metrics));

    let slicer_metrics = Arc::clone(&metrics);
    tokio::task::spawn_blocking(move || {
        slice_runs(raw_rx, segment_tx, slice_options, slicer_metrics)
    });

    let printer_metrics = Arc::clone(&metrics);
    let printer = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            let snap = printer_metrics.snapshot();
            info!(
                read_simulation_runs = snap.read_simulation_runs,
                simulation_runs_buffer = snap.simulation_runs_buffer,
                sliced_simulation_runs = snap.sliced_simulation_runs,
                segments_buffer = snap.segments_buffer,
                is_finished = snap.is_finished,
                "pipeline status"
            );
            if snap.is_finished {
                break;
            }
        }
    });

    Ok(SegmentStream { rx: segment_rx, metrics, printer })
}

/// `(map file, dynamic file)` pairs in processing order.
fn run_descriptors(config: &PipelineConfig) -> Vec<(PathBuf, PathBuf)> {
    let mut descriptors: Vec<(PathBuf, PathBuf)> = config
        .map_to_dynamic_files
        .iter()
        .flat_map(|(map, dynamics)| {
            dynamics.iter().map(move |d| (map.clone(), d.clone()))
        })
        .collect();
    if config.order_files_by_seed {
        // Unparsable seeds sort last in their original relative order; the
        // loader reports them when it actually opens the file.
        descriptors
            .sort_by_key(|(_, dynamic)| loader::seed_of(dynamic).unwrap_or(u64::MAX));
    }
    descriptors
}

fn load_runs(
    descriptors: Vec<(PathBuf, PathBuf)>,
    raw_tx: mpsc::UnboundedSender<RawRun>,
    metrics: Arc<PipelineMetrics>,
) {
    let mut networks: HashMap<PathBuf, Arc<RoadNetwork>> = HashMap::new();

    for (map_path, dynamic_path) in descriptors {
        let network = match networks.get(&map_path) {
            Some(n) => Arc::clone(n),
            None => {
                let built = loader::load_blocks(&map_path)
                    .map_err(PipelineError::from)
                    .and_then(|blocks| Ok(RoadNetwork::build(&blocks)?));
                match built {
                    Ok(n) => {
                        let n = Arc::new(n);
                        networks.insert(map_path.clone(), Arc::clone(&n));
                        n
                    }
                    Err(e) => {
                        error!(map = %map_path.display(), error = %e, "static data failed to load, stopping");
                        return;
                    }
                }
            }
        };

        let ticks = match loader::load_ticks(&dynamic_path) {
            Ok(t) => t,
            Err(e) => {
                error!(file = %dynamic_path.display(), error = %e, "dynamic data failed to load, stopping");
                return;
            }
        };

        let run_id = dynamic_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dynamic_path.display().to_string());

        metrics.read_simulation_runs.fetch_add(1, Ordering::Relaxed);
        metrics.simulation_runs_buffer.fetch_add(1, Ordering::Relaxed);
        if raw_tx.send(RawRun { run_id, network, ticks }).is_err() {
            // Consumer went away; unwind quietly.
            return;
        }
    }
}

fn slice_runs(
    mut raw_rx: mpsc::UnboundedReceiver<RawRun>,
    segment_tx: mpsc::Sender<Segment>,
    options: SliceOptions,
    metrics: Arc<PipelineMetrics>,
) {
    while let Some(raw_run) = raw_rx.blocking_recv() {
        metrics.simulation_runs_buffer.fetch_sub(1, Ordering::Relaxed);
        let run_id = raw_run.run_id.clone();
        match slice_one(raw_run, &options) {
            Ok(segments) => {
                for segment in segments {
                    metrics.segments_buffer.fetch_add(1, Ordering::Relaxed);
                    if segment_tx.blocking_send(segment).is_err() {
                        metrics.segments_buffer.fetch_sub(1, Ordering::Relaxed);
                        return;
                    }
                }
                metrics.sliced_simulation_runs.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "run failed to slice, closing the stream");
                break;
            }
        }
    }
    metrics.finished.store(true, Ordering::Relaxed);
    // Dropping `segment_tx` closes the channel; `recv` returning `None` is
    // the consumer's termination signal.
}

fn slice_one(mut raw_run: RawRun, options: &SliceOptions) -> Result<Vec<Segment>, PipelineError> {
    clean_junction_data(&mut raw_run.ticks, &raw_run.network)?;
    let mut runs = convert_run(
        &raw_run.ticks,
        &raw_run.network,
        options.use_every_vehicle_as_ego,
        &raw_run.run_id,
    )?;

    let segmenter = Segmenter::new(
        &raw_run.network,
        options.min_segment_tick_count,
        options.max_segment_tick_count,
    )
    .rng_seed(options.rng_seed);

    let mut segments = Vec::new();
    for run in &mut runs {
        fill_kinematics(run)?;
        segments.extend(segmenter.segment(run, &options.strategy)?);
    }
    Ok(segments)
}

// ============================================================================
// Tests
// ============================================================================
