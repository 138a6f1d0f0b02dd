//! livedetect - run the live detection pipeline against a camera
//!
//! This binary:
//! 1. Loads `PipelineConfig` (file + environment) and applies CLI overrides
//! 2. Opens the camera and the chosen detector backend
//! 3. Runs the pipeline until Ctrl-C, end of stream or `--duration`
//! 4. Logs session statistics periodically and prints a final summary

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use livedetect::{
    format_elapsed, CameraSource, Detector, FileSinkFactory, Pipeline, PipelineConfig,
    PipelineState, SessionStats, StubDetector,
};

/// Main loop wake-up interval.
const TICK: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Bright-region detector, no model required.
    Stub,
    /// YOLOv8 ONNX model via tract (feature: backend-tract).
    Tract,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML config file, read instead of LIVEDETECT_CONFIG. LIVEDETECT_* overrides still apply.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Camera device path or stub://<name>.
    #[arg(long)]
    device: Option<String>,
    /// Detector backend.
    #[arg(long, value_enum, default_value_t = Backend::Stub)]
    backend: Backend,
    /// ONNX model path for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Confidence threshold in [0, 1].
    #[arg(long)]
    confidence: Option<f32>,
    /// Directory for recordings and screenshots.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Stop after this many seconds.
    #[arg(long)]
    duration: Option<u64>,
    /// Start recording as soon as the pipeline runs.
    #[arg(long)]
    record: bool,
    /// Take a screenshot every N seconds.
    #[arg(long)]
    screenshot_every: Option<u64>,
    /// Seconds between statistics log lines.
    #[arg(long, default_value_t = 5)]
    stats_interval: u64,
    /// Print the final statistics as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = resolve_config(&args)?;
    let detector = build_detector(args.backend, &cfg)?;
    let source = CameraSource::new(cfg.camera_config());
    let sink_factory = FileSinkFactory::new(cfg.recording.jpeg_quality);
    let pipeline = Pipeline::new(Box::new(source), detector, Box::new(sink_factory), &cfg);

    pipeline
        .start()
        .with_context(|| format!("cannot start pipeline on {}", cfg.camera.device))?;
    if args.record {
        match pipeline.toggle_recording() {
            Ok(_) => {}
            Err(err) => log::error!("recording not started: {}", err),
        }
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    let started = Instant::now();
    let deadline = args.duration.map(|secs| started + Duration::from_secs(secs));
    let stats_interval = Duration::from_secs(args.stats_interval.max(1));
    let screenshot_interval = args.screenshot_every.map(Duration::from_secs);
    let mut last_stats = Instant::now();
    let mut last_screenshot = Instant::now();

    log::info!(
        "livedetect running (Ctrl-C to stop), artifacts go to {}",
        pipeline.output_dir().display()
    );
    loop {
        match rx.recv_timeout(TICK) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received, stopping pipeline...");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        if pipeline.state() == PipelineState::Stopped {
            log::warn!("pipeline stopped on its own (stream ended)");
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::info!("duration elapsed, stopping pipeline...");
            break;
        }
        if last_stats.elapsed() >= stats_interval {
            log_stats(&pipeline.stats_snapshot(), pipeline.top_labels(5));
            last_stats = Instant::now();
        }
        if let Some(interval) = screenshot_interval {
            if last_screenshot.elapsed() >= interval {
                pipeline.take_screenshot();
                last_screenshot = Instant::now();
            }
        }
    }

    let recording = pipeline.recording_path();
    pipeline.stop();
    if let Some(path) = recording {
        log::info!("recording saved to {}", path.display());
    }

    let stats = pipeline.stats_snapshot();
    log_stats(&stats, pipeline.top_labels(5));
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}

fn resolve_config(args: &Args) -> Result<PipelineConfig> {
    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::load()?,
    };
    if let Some(device) = &args.device {
        cfg.camera.device = device.clone();
    }
    if let Some(model) = &args.model {
        cfg.detector.model_path = Some(model.clone());
    }
    if let Some(confidence) = args.confidence {
        cfg.detector.confidence = confidence;
    }
    if let Some(dir) = &args.output_dir {
        cfg.recording.output_dir = dir.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn build_detector(backend: Backend, cfg: &PipelineConfig) -> Result<Box<dyn Detector>> {
    match backend {
        Backend::Stub => Ok(Box::new(StubDetector::new())),
        Backend::Tract => build_tract_detector(cfg),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract_detector(cfg: &PipelineConfig) -> Result<Box<dyn Detector>> {
    let model = cfg
        .detector
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("--model (or LIVEDETECT_MODEL) is required for the tract backend"))?;
    let detector = livedetect::TractDetector::new(model, 640, 640)?
        .with_iou_threshold(cfg.detector.iou_threshold);
    Ok(Box::new(detector))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract_detector(_cfg: &PipelineConfig) -> Result<Box<dyn Detector>> {
    Err(anyhow!(
        "tract backend not available; rebuild with --features backend-tract"
    ))
}

fn log_stats(stats: &SessionStats, top: Vec<(String, u64)>) {
    let elapsed = stats
        .elapsed
        .map(format_elapsed)
        .unwrap_or_else(|| "--:--:--".to_string());
    let top = top
        .iter()
        .map(|(label, count)| format!("{}={}", label, count))
        .collect::<Vec<_>>()
        .join(", ");
    log::info!(
        "[{}] fps={} current={} total={} top=[{}]",
        elapsed,
        stats.fps,
        stats.current_count(),
        stats.total_detections,
        top
    );
}
