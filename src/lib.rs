//! Live Detect
//!
//! This crate runs a live camera stream through an object detector frame by
//! frame, keeps per-session statistics, and optionally persists annotated
//! frames as a recording or single screenshots.
//!
//! # Architecture
//!
//! One producer thread owns the camera and the detector. Everything a
//! presentation layer reads (latest frame, statistics, recording state) is
//! published through independently guarded slots, so readers poll at their
//! own cadence without stalling capture.
//!
//! The pipeline upholds these properties:
//!
//! 1. **Bounded memory**: the rolling per-frame count history holds at most 100 entries.
//! 2. **Monotonic counters**: totals and the label histogram only grow within a session.
//! 3. **Exclusive recording**: at most one sink is open, sized by its first frame.
//! 4. **Synchronous stop**: `Pipeline::stop` returns only after camera and sink are released.
//!
//! # Module Structure
//!
//! - `frame`: `FrameBuffer`, `Detection`, `BoundingBox`
//! - `ingest`: frame sources (synthetic `stub://`, V4L2 devices)
//! - `detect`: detector backends (stub, scripted, YOLOv8 via tract)
//! - `annotate`: overlay drawing
//! - `stats`: session statistics and FPS sampling
//! - `record`: recording state machine and MJPEG sink
//! - `artifacts`: timestamped file names and screenshots
//! - `pipeline`: the frame loop and its command surface

pub mod annotate;
pub mod artifacts;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod record;
pub mod stats;

pub use annotate::Annotator;
pub use config::PipelineConfig;
pub use detect::{Detector, ScriptedDetector, StubDetector};
pub use error::PipelineError;
pub use frame::{BoundingBox, Detection, FrameBuffer};
pub use ingest::{CameraConfig, CameraSource, FrameSource};
pub use pipeline::{Pipeline, PipelineState};
pub use record::{FileSinkFactory, RecordingController, SinkFactory, VideoSink};
pub use stats::{format_elapsed, SessionStats, SharedStats, StatsAggregator};

#[cfg(feature = "backend-tract")]
pub use detect::TractDetector;
