//! Real-time frame pipeline.
//!
//! `Pipeline` owns one producer thread that reads frames, runs the detector,
//! updates session statistics, annotates, feeds the active recording and
//! publishes the annotated frame. Presentation code drives it through the
//! `&self` command and query methods from any thread.
//!
//! Each piece of shared state sits behind its own guard so a reader never
//! blocks the producer for longer than one slot swap:
//! - published frame: `Mutex<Option<Arc<FrameBuffer>>>`, latest wins
//! - statistics: `SharedStats`
//! - recording: `Mutex<RecordingController>`
//! - confidence threshold: `AtomicU32` holding `f32` bits
//! - stop request: `AtomicBool`
//!
//! `stop()` joins the producer, so camera and sink are released before it
//! returns.

use chrono::Local;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::annotate::Annotator;
use crate::artifacts::write_screenshot;
use crate::config::PipelineConfig;
use crate::detect::Detector;
use crate::error::PipelineError;
use crate::frame::FrameBuffer;
use crate::ingest::FrameSource;
use crate::record::{RecordingController, SinkFactory};
use crate::stats::{FpsCounter, SessionStats, SharedStats};

const WORKER_THREAD_NAME: &str = "livedetect-pipeline";

/// How often a waiting `toggle_recording` re-checks that the worker is alive.
const TOGGLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Running,
}

type ToggleReply = mpsc::Sender<Result<PathBuf, PipelineError>>;

/// State shared between the command surface and the producer thread.
struct PipelineShared {
    frame: Mutex<Option<Arc<FrameBuffer>>>,
    stats: SharedStats,
    recording: Mutex<RecordingController>,
    threshold: AtomicU32,
    stop: AtomicBool,
    state: Mutex<PipelineState>,
    /// Pending toggle-on request, answered by the producer with a fresh frame.
    toggle_request: Mutex<Option<ToggleReply>>,
}

impl PipelineShared {
    fn confidence(&self) -> f32 {
        f32::from_bits(self.threshold.load(Ordering::Acquire))
    }

    fn state(&self) -> PipelineState {
        *lock(&self.state)
    }

    fn take_toggle_request(&self) -> Option<ToggleReply> {
        lock(&self.toggle_request).take()
    }
}

/// Source and detector travel into the producer thread while running and
/// come back through its `JoinHandle`.
struct WorkerParts {
    source: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
}

struct Control {
    parts: Option<WorkerParts>,
    worker: Option<JoinHandle<WorkerParts>>,
}

pub struct Pipeline {
    shared: Arc<PipelineShared>,
    control: Mutex<Control>,
    /// Serialises recording toggles so at most one request is pending.
    toggle_gate: Mutex<()>,
    annotator: Annotator,
    output_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        sink_factory: Box<dyn SinkFactory>,
        config: &PipelineConfig,
    ) -> Self {
        let output_dir = config.recording.output_dir.clone();
        let recording = RecordingController::new(sink_factory, output_dir.clone())
            .with_fps(config.recording.fps);
        let shared = PipelineShared {
            frame: Mutex::new(None),
            stats: SharedStats::new(),
            recording: Mutex::new(recording),
            threshold: AtomicU32::new(clamp_confidence(config.detector.confidence).to_bits()),
            stop: AtomicBool::new(false),
            state: Mutex::new(PipelineState::Stopped),
            toggle_request: Mutex::new(None),
        };
        Self {
            shared: Arc::new(shared),
            control: Mutex::new(Control {
                parts: Some(WorkerParts { source, detector }),
                worker: None,
            }),
            toggle_gate: Mutex::new(()),
            annotator: Annotator::new(config.line_width),
            output_dir,
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Stopped → Running. A no-op when already running.
    ///
    /// Fails with `CameraUnavailable` when the source cannot be opened; the
    /// pipeline then stays stopped and the statistics are left untouched.
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut control = lock(&self.control);
        let worker_alive = control
            .worker
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if worker_alive && self.shared.state() == PipelineState::Running {
            return Ok(());
        }
        self.reclaim_worker(&mut control);

        let Some(mut parts) = control.parts.take() else {
            return Err(PipelineError::camera_unavailable(
                "<lost>",
                "source was dropped by a panicked worker",
            ));
        };
        let device = parts.source.device().to_string();
        if let Err(err) = parts.source.open() {
            log::error!("{}", err);
            control.parts = Some(parts);
            return Err(err);
        }
        if let Err(err) = parts.detector.warm_up() {
            log::warn!("detector {} warm-up failed: {:#}", parts.detector.name(), err);
        }
        log::info!(
            "pipeline starting: source={} detector={} confidence={:.2}",
            device,
            parts.detector.name(),
            self.shared.confidence()
        );

        self.shared.stats.reset();
        self.shared.stop.store(false, Ordering::SeqCst);
        *lock(&self.shared.state) = PipelineState::Running;

        let shared = self.shared.clone();
        let annotator = self.annotator.clone();
        let spawned = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(parts, &shared, &annotator));
        match spawned {
            Ok(handle) => {
                control.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                *lock(&self.shared.state) = PipelineState::Stopped;
                self.shared.stats.mark_stopped();
                Err(PipelineError::camera_unavailable(
                    device,
                    format!("cannot spawn pipeline thread: {}", err),
                ))
            }
        }
    }

    /// Running → Stopped. Blocks until the producer has closed the recording
    /// and released the source. Idempotent.
    pub fn stop(&self) {
        let mut control = lock(&self.control);
        self.shared.stop.store(true, Ordering::SeqCst);
        self.reclaim_worker(&mut control);
    }

    /// Flip recording. Returns the new recording state.
    ///
    /// Turning recording on is carried out by the producer, which opens the
    /// sink sized to the next captured frame. Fails with `NotRunning` while
    /// stopped and `SinkOpenFailed` when the file cannot be created; in both
    /// cases recording stays off.
    pub fn toggle_recording(&self) -> Result<bool, PipelineError> {
        let _gate = lock(&self.toggle_gate);
        if self.shared.state() != PipelineState::Running {
            return Err(PipelineError::NotRunning);
        }
        if lock(&self.shared.recording).stop().is_some() {
            return Ok(false);
        }

        let (tx, rx) = mpsc::channel();
        *lock(&self.shared.toggle_request) = Some(tx);
        loop {
            match rx.recv_timeout(TOGGLE_POLL_INTERVAL) {
                Ok(result) => return result.map(|_| true),
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.state() != PipelineState::Running {
                        self.shared.take_toggle_request();
                        return match rx.try_recv() {
                            Ok(result) => result.map(|_| true),
                            Err(_) => Err(PipelineError::NotRunning),
                        };
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(PipelineError::NotRunning),
            }
        }
    }

    /// Write the published frame as a JPEG. `None` when no frame has been
    /// published yet or the write failed.
    pub fn take_screenshot(&self) -> Option<PathBuf> {
        match self.try_screenshot() {
            Ok(path) => path,
            Err(err) => {
                log::error!("{}", err);
                None
            }
        }
    }

    /// Like `take_screenshot`, but reports write failures.
    pub fn try_screenshot(&self) -> Result<Option<PathBuf>, PipelineError> {
        let Some(frame) = self.current_frame() else {
            log::debug!("screenshot skipped: no frame published yet");
            return Ok(None);
        };
        write_screenshot(&frame, &self.output_dir, Local::now().naive_local()).map(Some)
    }

    /// Takes effect on the next inference. Clamped to [0, 1]; NaN is ignored.
    pub fn set_confidence(&self, confidence: f32) {
        if confidence.is_nan() {
            log::warn!("ignoring NaN confidence threshold");
            return;
        }
        self.shared
            .threshold
            .store(clamp_confidence(confidence).to_bits(), Ordering::Release);
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Latest annotated frame, or `None` if none was ever produced.
    pub fn current_frame(&self) -> Option<Arc<FrameBuffer>> {
        lock(&self.shared.frame).clone()
    }

    pub fn stats_snapshot(&self) -> SessionStats {
        self.shared.stats.snapshot()
    }

    pub fn top_labels(&self, n: usize) -> Vec<(String, u64)> {
        self.shared.stats.top_n(n)
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.shared.recording).is_recording()
    }

    pub fn recording_path(&self) -> Option<PathBuf> {
        lock(&self.shared.recording)
            .current_path()
            .map(Path::to_path_buf)
    }

    pub fn confidence(&self) -> f32 {
        self.shared.confidence()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Join a producer that has exited (or been asked to) and take back the
    /// source and detector.
    fn reclaim_worker(&self, control: &mut Control) {
        let Some(handle) = control.worker.take() else {
            return;
        };
        match handle.join() {
            Ok(parts) => control.parts = Some(parts),
            Err(_) => {
                log::error!("pipeline thread panicked; source and detector dropped");
                lock(&self.shared.recording).stop();
                self.shared.stats.mark_stopped();
                *lock(&self.shared.state) = PipelineState::Stopped;
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Producer thread
// ----------------------------------------------------------------------------

fn run_worker(
    mut parts: WorkerParts,
    shared: &PipelineShared,
    annotator: &Annotator,
) -> WorkerParts {
    let _exit = WorkerExit { shared };
    let mut fps = FpsCounter::new();
    loop {
        if shared.stop.load(Ordering::SeqCst) {
            log::info!("pipeline stop requested");
            break;
        }
        if let Err(err) = process_frame(&mut parts, shared, annotator, &mut fps) {
            log::warn!("pipeline ending: {}", err);
            break;
        }
    }
    parts.source.close();
    parts
}

/// Producer exit bookkeeping. Runs on every exit path, unwinding included.
struct WorkerExit<'a> {
    shared: &'a PipelineShared,
}

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        let shared = self.shared;
        if std::thread::panicking() {
            log::error!("pipeline thread panicked; shutting down");
        }
        lock(&shared.recording).stop();
        shared.stats.mark_stopped();
        *lock(&shared.state) = PipelineState::Stopped;
        if let Some(reply) = shared.take_toggle_request() {
            let _ = reply.send(Err(PipelineError::NotRunning));
        }
        let stats = shared.stats.snapshot();
        log::info!(
            "pipeline stopped: {} detections, {} labels",
            stats.total_detections,
            stats.label_histogram.len()
        );
    }
}

/// One iteration. An error means the stream is over.
fn process_frame(
    parts: &mut WorkerParts,
    shared: &PipelineShared,
    annotator: &Annotator,
    fps: &mut FpsCounter,
) -> Result<(), PipelineError> {
    let frame = parts.source.read()?;

    if let Some(reply) = shared.take_toggle_request() {
        let result = lock(&shared.recording).start(&frame, Local::now().naive_local());
        if let Err(err) = &result {
            log::error!("{}", err);
        }
        let _ = reply.send(result);
    }

    let threshold = shared.confidence();
    let detector = &mut parts.detector;
    let name = detector.name();
    let detections = match panic::catch_unwind(AssertUnwindSafe(|| {
        detector.infer(&frame, threshold)
    })) {
        Ok(Ok(detections)) => detections,
        Ok(Err(err)) => {
            return Err(PipelineError::stream_ended(format!(
                "detector {} failed: {:#}",
                name, err
            )))
        }
        Err(payload) => {
            return Err(PipelineError::stream_ended(format!(
                "detector {} panicked: {}",
                name,
                panic_message(payload.as_ref())
            )))
        }
    };

    let labels: Vec<String> = detections.iter().map(|d| d.label.clone()).collect();
    let count = u32::try_from(labels.len()).unwrap_or(u32::MAX);
    shared.stats.record_frame(count, &labels);
    fps.frame_processed(&shared.stats, Instant::now());

    let annotated = annotator.draw(&frame, &detections);
    {
        let mut recording = lock(&shared.recording);
        if let Err(err) = recording.write(&annotated) {
            log::warn!("{}; closing recording", err);
            recording.stop();
        }
    }

    *lock(&shared.frame) = Some(Arc::new(annotated));
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        return 0.0;
    }
    confidence.clamp(0.0, 1.0)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
