//! Stage runner and the orchestrator that drives it.
//!
//! [`run_generation`] is the only place the stages are sequenced. The
//! [`Pipeline`] runs it on a background [`GenerationWorker`] when one can be
//! spawned, and on the calling thread otherwise.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};

use log::{debug, warn};
use rand::SeedableRng;
use rand_pcg::Pcg32;
use serde::Serialize;

use crate::error::Result;
use crate::options::GenerationOptions;
use crate::pixels::PixelBuffer;
use crate::quantize::quantize;
use crate::region::{Region, finalize_regions};
use crate::scene::{SceneOptions, VectorScene, build_vector_scene};
use crate::segment::{MergeSettings, segment_regions};
use crate::smooth::smooth_labels;
use crate::source::{SourceImage, encode_source_image};
use crate::worker::{GenerationRequest, GenerationWorker, WorkerEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Quantize,
    Smooth,
    SmoothSkip,
    Segment,
    Finalize,
    Complete,
}

impl Stage {
    pub fn id(self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Quantize => "quantize",
            Stage::Smooth => "smooth",
            Stage::SmoothSkip => "smooth-skip",
            Stage::Segment => "segment",
            Stage::Finalize => "finalize",
            Stage::Complete => "complete",
        }
    }

    /// Overall completion fraction reported when the stage begins.
    pub fn progress(self) -> f64 {
        match self {
            Stage::Prepare => 0.0,
            Stage::Quantize => 0.15,
            Stage::Smooth | Stage::SmoothSkip => 0.45,
            Stage::Segment => 0.75,
            Stage::Finalize => 0.9,
            Stage::Complete => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Prepare => "Preparing image…",
            Stage::Quantize => "Quantizing colours",
            Stage::Smooth => "Smoothing regions",
            Stage::SmoothSkip => "Skipping smoothing",
            Stage::Segment => "Segmenting regions",
            Stage::Finalize => "Finalizing metadata",
            Stage::Complete => "Generation complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub job: JobId,
    pub stage: Stage,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        self.stage.progress()
    }

    pub fn label(&self) -> &'static str {
        self.stage.label()
    }
}

/// Shared cancellation flag for one job.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Wall-clock milliseconds per stage. Always zero on wasm32, where
/// `std::time::Instant` is unavailable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTimings {
    pub quantize_ms: f64,
    pub smoothing_ms: f64,
    pub segment_ms: f64,
    pub total_ms: f64,
}

#[cfg(not(target_arch = "wasm32"))]
struct Stopwatch(std::time::Instant);

#[cfg(not(target_arch = "wasm32"))]
impl Stopwatch {
    fn start() -> Self {
        Self(std::time::Instant::now())
    }

    fn elapsed_ms(&self) -> f64 {
        self.0.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(target_arch = "wasm32")]
struct Stopwatch;

#[cfg(target_arch = "wasm32")]
impl Stopwatch {
    fn start() -> Self {
        Stopwatch
    }

    fn elapsed_ms(&self) -> f64 {
        0.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaletteEntry {
    /// One-based, matching [`Region::color_id`].
    pub id: u16,
    pub hex: String,
    pub rgb: [u8; 3],
}

/// A finished puzzle.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PuzzleData {
    pub width: u32,
    pub height: u32,
    /// Size of the image before it was prepared.
    pub original_width: u32,
    pub original_height: u32,
    pub palette: Vec<PaletteEntry>,
    pub regions: Vec<Region>,
    pub region_map: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_scene: Option<VectorScene>,
    /// `None` when encoding failed.
    pub source_image: Option<SourceImage>,
    pub timings: StageTimings,
}

impl PuzzleData {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Run every stage on the current thread.
///
/// Reports every stage up to [`Stage::Finalize`]; [`Pipeline::generate`]
/// reports [`Stage::Complete`] once the result is known to be current.
/// Returns `None` as soon as `cancel` is observed between stages.
pub fn run_generation(
    job: JobId,
    pixels: &PixelBuffer,
    options: &GenerationOptions,
    cancel: &CancelToken,
    on_progress: &mut dyn FnMut(Progress),
) -> Option<PuzzleData> {
    let options = options.normalized();
    let (width, height) = (pixels.width(), pixels.height());
    let total = Stopwatch::start();
    let mut timings = StageTimings::default();
    let mut report = |stage: Stage| on_progress(Progress { job, stage });

    report(Stage::Prepare);
    if cancel.is_cancelled() {
        return None;
    }

    report(Stage::Quantize);
    debug!(
        "job {job}: quantizing {width}x{height} with {} into {} colours",
        options.algorithm.id(),
        options.target_colors
    );
    let clock = Stopwatch::start();
    let mut rng = match options.seed {
        Some(seed) => Pcg32::seed_from_u64(seed),
        None => Pcg32::from_rng(&mut rand::rng()),
    };
    let quantized = quantize(pixels, &options, &mut rng);
    timings.quantize_ms = clock.elapsed_ms();
    if cancel.is_cancelled() {
        return None;
    }

    report(if options.smoothing_passes > 0 { Stage::Smooth } else { Stage::SmoothSkip });
    let clock = Stopwatch::start();
    let labels = smooth_labels(&quantized.labels, width, height, options.smoothing_passes);
    timings.smoothing_ms = clock.elapsed_ms();
    if cancel.is_cancelled() {
        return None;
    }

    report(Stage::Segment);
    let clock = Stopwatch::start();
    let merge = MergeSettings::from_options(&options);
    let segmentation = segment_regions(width, height, &labels, &merge);
    timings.segment_ms = clock.elapsed_ms();
    if cancel.is_cancelled() {
        return None;
    }

    report(Stage::Finalize);
    let regions = finalize_regions(segmentation.regions, width);
    let palette = quantized
        .centroids
        .iter()
        .enumerate()
        .map(|(i, c)| PaletteEntry {
            id: i as u16 + 1,
            hex: format!("#{c:x}"),
            rgb: [c.red, c.green, c.blue],
        })
        .collect();
    let vector_scene = options.vector_scene.then(|| {
        let scene_options = SceneOptions { zoom_levels: options.max_zoom_levels };
        build_vector_scene(width, height, &regions, &segmentation.region_map, &scene_options)
    });
    let source_image = match encode_source_image(pixels, options.source_image_max_bytes) {
        Ok(source) => Some(source),
        Err(e) => {
            debug!("job {job}: source image skipped: {e}");
            None
        }
    };
    timings.total_ms = total.elapsed_ms();
    if cancel.is_cancelled() {
        return None;
    }

    debug!(
        "job {job}: {} regions, quantize {:.1}ms, smoothing {:.1}ms, segment {:.1}ms, \
         total {:.1}ms",
        regions.len(),
        timings.quantize_ms,
        timings.smoothing_ms,
        timings.segment_ms,
        timings.total_ms
    );

    Some(PuzzleData {
        width,
        height,
        original_width: pixels.original_width(),
        original_height: pixels.original_height(),
        palette,
        regions,
        region_map: segmentation.region_map,
        vector_scene,
        source_image,
        timings,
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Background worker, falling back to the calling thread.
    #[default]
    Auto,
    /// Always the calling thread.
    Synchronous,
}

enum WorkerOutcome {
    Finished(PuzzleData),
    Cancelled,
    Unavailable(String),
}

/// Owns the background worker and the latest-job bookkeeping.
///
/// Starting a job cancels the previous one. Results of a job that is no
/// longer the latest are discarded.
pub struct Pipeline {
    mode: ExecutionMode,
    worker: Mutex<Option<GenerationWorker>>,
    latest_job: AtomicU64,
    current_cancel: Mutex<Option<CancelToken>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_mode(ExecutionMode::Auto)
    }

    pub fn with_mode(mode: ExecutionMode) -> Self {
        Self {
            mode,
            worker: Mutex::new(None),
            latest_job: AtomicU64::new(0),
            current_cancel: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Generate a puzzle, streaming progress to `on_progress`.
    ///
    /// `Ok(None)` means the job was cancelled or superseded by a newer call.
    pub fn generate<F>(
        &self,
        pixels: &PixelBuffer,
        options: &GenerationOptions,
        mut on_progress: F,
    ) -> Result<Option<PuzzleData>>
    where
        F: FnMut(Progress),
    {
        let options = options.normalized();
        let job = JobId(self.latest_job.fetch_add(1, Ordering::AcqRel) + 1);
        let cancel = CancelToken::new();
        if let Some(previous) = lock(&self.current_cancel).replace(cancel.clone()) {
            previous.cancel();
        }

        let mut result = None;
        let mut finished = false;
        if self.mode == ExecutionMode::Auto {
            match self.run_on_worker(job, pixels, &options, &cancel, &mut on_progress) {
                WorkerOutcome::Finished(data) => {
                    result = Some(data);
                    finished = true;
                }
                WorkerOutcome::Cancelled => finished = true,
                WorkerOutcome::Unavailable(reason) => {
                    warn!(
                        "job {job}: worker unavailable ({reason}), running on the calling thread"
                    );
                    self.dispose_worker();
                }
            }
        }
        if !finished {
            result = run_generation(job, pixels, &options, &cancel, &mut on_progress);
        }

        if self.latest_job.load(Ordering::Acquire) != job.0 {
            debug!("job {job}: superseded by a newer job, discarding result");
            return Ok(None);
        }
        if result.is_some() {
            on_progress(Progress { job, stage: Stage::Complete });
        } else {
            debug!("job {job}: cancelled");
        }
        Ok(result)
    }

    fn run_on_worker(
        &self,
        job: JobId,
        pixels: &PixelBuffer,
        options: &GenerationOptions,
        cancel: &CancelToken,
        on_progress: &mut dyn FnMut(Progress),
    ) -> WorkerOutcome {
        let (reply, events) = mpsc::channel();
        {
            let mut worker = lock(&self.worker);
            if worker.is_none() {
                match GenerationWorker::spawn() {
                    Ok(w) => *worker = Some(w),
                    Err(e) => return WorkerOutcome::Unavailable(e.to_string()),
                }
            }
            let Some(worker) = worker.as_ref() else {
                return WorkerOutcome::Unavailable("worker missing".to_owned());
            };
            let request = GenerationRequest {
                job,
                pixels: pixels.clone(),
                options: options.clone(),
                cancel: cancel.clone(),
                reply,
            };
            if let Err(e) = worker.submit(request) {
                return WorkerOutcome::Unavailable(e.to_string());
            }
        }

        for event in events.iter() {
            match event {
                WorkerEvent::Progress(p) => on_progress(p),
                WorkerEvent::Finished(data) => return WorkerOutcome::Finished(*data),
                WorkerEvent::Cancelled => return WorkerOutcome::Cancelled,
                WorkerEvent::Failed(reason) => return WorkerOutcome::Unavailable(reason),
            }
        }
        WorkerOutcome::Unavailable("worker disconnected".to_owned())
    }

    fn dispose_worker(&self) {
        let worker = lock(&self.worker).take();
        drop(worker);
    }

    /// Cancel the job in flight, if any.
    pub fn cancel(&self) {
        if let Some(token) = lock(&self.current_cancel).as_ref() {
            token.cancel();
        }
    }

    /// Cancel outstanding work and stop the worker thread. A later
    /// `generate` call spawns a fresh worker.
    pub fn shutdown(&self) {
        self.cancel();
        self.dispose_worker();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
