//! Video recording.
//!
//! `RecordingController` is a two-state machine (Idle, Recording) guarding one
//! exclusive `VideoSink`. A session's resolution is fixed by the first frame
//! it was started with; frames of any other size are rejected rather than
//! written into the sink.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use image::codecs::jpeg::JpegEncoder;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::artifacts::{first_free_path, recording_path};
use crate::error::PipelineError;
use crate::frame::FrameBuffer;

/// Nominal frame rate of recorded video.
pub const RECORDING_FPS: u32 = 20;

/// Parameters a sink is opened with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Destination for recorded frames.
pub trait VideoSink: Send {
    fn write_frame(&mut self, frame: &FrameBuffer) -> Result<()>;

    /// Flush and close. The sink is unusable afterwards.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens sinks for new recording sessions.
pub trait SinkFactory: Send {
    fn open(&self, path: &Path, spec: SinkSpec) -> Result<Box<dyn VideoSink>>;
}

// ----------------------------------------------------------------------------
// Motion-JPEG file sink
// ----------------------------------------------------------------------------

/// Motion-JPEG elementary stream: one baseline JPEG per frame, back to back.
/// Playable with `ffplay -f mjpeg -framerate 20 <file>`.
pub struct MjpegSink {
    writer: BufWriter<File>,
    spec: SinkSpec,
    quality: u8,
    frames_written: u64,
    path: PathBuf,
}

impl MjpegSink {
    pub fn create(path: &Path, spec: SinkSpec, quality: u8) -> Result<Self> {
        if spec.width == 0 || spec.height == 0 || spec.fps == 0 {
            return Err(anyhow!("invalid sink parameters {:?}", spec));
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            spec,
            quality: quality.clamp(1, 100),
            frames_written: 0,
            path: path.to_path_buf(),
        })
    }
}

impl VideoSink for MjpegSink {
    fn write_frame(&mut self, frame: &FrameBuffer) -> Result<()> {
        if frame.dimensions() != (self.spec.width, self.spec.height) {
            return Err(anyhow!(
                "frame {}x{} does not match sink {}x{}",
                frame.width(),
                frame.height(),
                self.spec.width,
                self.spec.height
            ));
        }
        JpegEncoder::new_with_quality(&mut self.writer, self.quality)
            .encode_image(&frame.to_rgb_image())
            .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer.flush().context("flush recording")?;
        self.writer
            .get_ref()
            .sync_all()
            .context("sync recording")?;
        log::debug!(
            "MjpegSink: closed {} ({} frames)",
            self.path.display(),
            self.frames_written
        );
        Ok(())
    }
}

/// Creates `MjpegSink`s, making the output directory on demand.
#[derive(Clone, Debug)]
pub struct FileSinkFactory {
    quality: u8,
}

impl FileSinkFactory {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }
}

impl Default for FileSinkFactory {
    fn default() -> Self {
        Self::new(85)
    }
}

impl SinkFactory for FileSinkFactory {
    fn open(&self, path: &Path, spec: SinkSpec) -> Result<Box<dyn VideoSink>> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(Box::new(MjpegSink::create(path, spec, self.quality)?))
    }
}

// ----------------------------------------------------------------------------
// RecordingController
// ----------------------------------------------------------------------------

struct RecordingSession {
    sink: Box<dyn VideoSink>,
    path: PathBuf,
    spec: SinkSpec,
    frames_written: u64,
}

enum RecordingState {
    Idle,
    Recording(RecordingSession),
}

pub struct RecordingController {
    factory: Box<dyn SinkFactory>,
    output_dir: PathBuf,
    fps: u32,
    state: RecordingState,
}

impl RecordingController {
    pub fn new(factory: Box<dyn SinkFactory>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            factory,
            output_dir: output_dir.into(),
            fps: RECORDING_FPS,
            state: RecordingState::Idle,
        }
    }

    /// Frame rate stamped on new sessions. Zero keeps the default.
    pub fn with_fps(mut self, fps: u32) -> Self {
        if fps > 0 {
            self.fps = fps;
        }
        self
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecordingState::Recording(_))
    }

    pub fn current_path(&self) -> Option<&Path> {
        match &self.state {
            RecordingState::Recording(session) => Some(&session.path),
            RecordingState::Idle => None,
        }
    }

    /// Idle → Recording. The first frame fixes the session resolution.
    ///
    /// Already recording: returns the current path unchanged. On failure the
    /// controller stays Idle with nothing open.
    pub fn start(
        &mut self,
        first_frame: &FrameBuffer,
        now: NaiveDateTime,
    ) -> Result<PathBuf, PipelineError> {
        if let RecordingState::Recording(session) = &self.state {
            return Ok(session.path.clone());
        }
        let path = first_free_path(recording_path(&self.output_dir, now));
        let spec = SinkSpec {
            width: first_frame.width(),
            height: first_frame.height(),
            fps: self.fps,
        };
        let sink = self
            .factory
            .open(&path, spec)
            .map_err(|err| PipelineError::sink_open_failed(&path, format!("{:#}", err)))?;

        log::info!(
            "recording started: {} ({}x{} @ {} fps)",
            path.display(),
            spec.width,
            spec.height,
            spec.fps
        );
        self.state = RecordingState::Recording(RecordingSession {
            sink,
            path: path.clone(),
            spec,
            frames_written: 0,
        });
        Ok(path)
    }

    /// Write one annotated frame. No-op while Idle.
    pub fn write(&mut self, frame: &FrameBuffer) -> Result<(), PipelineError> {
        let RecordingState::Recording(session) = &mut self.state else {
            return Ok(());
        };
        let expected = (session.spec.width, session.spec.height);
        if frame.dimensions() != expected {
            return Err(PipelineError::ResolutionChanged {
                expected,
                actual: frame.dimensions(),
            });
        }
        session
            .sink
            .write_frame(frame)
            .map_err(|err| PipelineError::SinkWriteFailed {
                path: session.path.clone(),
                reason: format!("{:#}", err),
            })?;
        session.frames_written += 1;
        Ok(())
    }

    /// Recording → Idle: flush and close the sink. No-op while Idle.
    ///
    /// Returns the finished file path. The controller is Idle afterwards
    /// even when closing the sink fails.
    pub fn stop(&mut self) -> Option<PathBuf> {
        let RecordingState::Recording(session) =
            std::mem::replace(&mut self.state, RecordingState::Idle)
        else {
            return None;
        };
        match session.sink.finish() {
            Ok(()) => log::info!(
                "recording stopped: {} ({} frames)",
                session.path.display(),
                session.frames_written
            ),
            Err(err) => log::error!(
                "recording {} closed with error: {:#}",
                session.path.display(),
                err
            ),
        }
        Some(session.path)
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::{Arc, Mutex};

    fn fixed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .unwrap()
    }

    struct FailingFactory;

    impl SinkFactory for FailingFactory {
        fn open(&self, _path: &Path, _spec: SinkSpec) -> Result<Box<dyn VideoSink>> {
            Err(anyhow!("disk full"))
        }
    }

    #[derive(Default)]
    struct Log {
        frames: u64,
        finished: bool,
    }

    struct LogSink(Arc<Mutex<Log>>);

    impl VideoSink for LogSink {
        fn write_frame(&mut self, _frame: &FrameBuffer) -> Result<()> {
            self.0.lock().unwrap().frames += 1;
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<()> {
            self.0.lock().unwrap().finished = true;
            Ok(())
        }
    }

    struct LogFactory(Arc<Mutex<Log>>);

    impl SinkFactory for LogFactory {
        fn open(&self, _path: &Path, _spec: SinkSpec) -> Result<Box<dyn VideoSink>> {
            Ok(Box::new(LogSink(self.0.clone())))
        }
    }

    #[test]
    fn start_write_stop_produces_closed_mjpeg() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = RecordingController::new(Box::new(FileSinkFactory::default()), dir.path());
        let frame = FrameBuffer::filled(64, 48, [0, 128, 255]);

        let path = rec.start(&frame, fixed_time()).unwrap();
        assert_eq!(path, dir.path().join("detection_20250102_030405.mjpeg"));
        assert!(rec.is_recording());
        rec.write(&frame).unwrap();
        rec.write(&frame).unwrap();

        assert_eq!(rec.stop(), Some(path.clone()));
        assert!(!rec.is_recording());

        let bytes = std::fs::read(&path).unwrap();
        let starts = bytes.windows(2).filter(|w| **w == [0xFFu8, 0xD8]).count();
        assert!(starts >= 2);
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn toggle_on_off_without_frames_leaves_empty_closed_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = RecordingController::new(Box::new(FileSinkFactory::default()), dir.path());
        let path = rec
            .start(&FrameBuffer::filled(8, 8, [0, 0, 0]), fixed_time())
            .unwrap();

        assert_eq!(rec.stop(), Some(path.clone()));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        // The file can be reopened for writing: no handle is left dangling.
        std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    }

    #[test]
    fn restart_within_one_second_keeps_first_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = RecordingController::new(Box::new(FileSinkFactory::default()), dir.path());
        let frame = FrameBuffer::filled(16, 16, [40, 80, 120]);

        let first = rec.start(&frame, fixed_time()).unwrap();
        rec.write(&frame).unwrap();
        rec.stop();
        let first_bytes = std::fs::read(&first).unwrap();
        assert!(!first_bytes.is_empty());

        let second = rec.start(&frame, fixed_time()).unwrap();
        rec.stop();

        assert_eq!(second, dir.path().join("detection_20250102_030405_2.mjpeg"));
        assert_eq!(std::fs::read(&first).unwrap(), first_bytes);
        assert_eq!(std::fs::metadata(&second).unwrap().len(), 0);
    }

    #[test]
    fn mjpeg_sink_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken.mjpeg");
        std::fs::write(&path, b"keep me").unwrap();

        let spec = SinkSpec {
            width: 8,
            height: 8,
            fps: RECORDING_FPS,
        };
        assert!(MjpegSink::create(&path, spec, 80).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn sink_open_failure_stays_idle() {
        let mut rec = RecordingController::new(Box::new(FailingFactory), "out");
        let err = rec
            .start(&FrameBuffer::filled(8, 8, [0, 0, 0]), fixed_time())
            .unwrap_err();

        assert!(matches!(err, PipelineError::SinkOpenFailed { .. }));
        assert!(!rec.is_recording());
        assert_eq!(rec.stop(), None);
    }

    #[test]
    fn resolution_change_is_rejected() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut rec = RecordingController::new(Box::new(LogFactory(log.clone())), "out");
        rec.start(&FrameBuffer::filled(8, 8, [0, 0, 0]), fixed_time())
            .unwrap();

        let err = rec.write(&FrameBuffer::filled(4, 4, [0, 0, 0])).unwrap_err();
        assert_eq!(
            err,
            PipelineError::ResolutionChanged {
                expected: (8, 8),
                actual: (4, 4)
            }
        );
        assert_eq!(log.lock().unwrap().frames, 0);
    }

    #[test]
    fn write_while_idle_is_noop_and_drop_closes_sink() {
        let log = Arc::new(Mutex::new(Log::default()));
        {
            let mut rec = RecordingController::new(Box::new(LogFactory(log.clone())), "out");
            rec.write(&FrameBuffer::filled(8, 8, [0, 0, 0])).unwrap();
            rec.start(&FrameBuffer::filled(8, 8, [0, 0, 0]), fixed_time())
                .unwrap();
            rec.write(&FrameBuffer::filled(8, 8, [0, 0, 0])).unwrap();
        }
        let log = log.lock().unwrap();
        assert_eq!(log.frames, 1);
        assert!(log.finished);
    }

    #[test]
    fn start_while_recording_keeps_session() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut rec = RecordingController::new(Box::new(LogFactory(log)), "out");
        let first = rec
            .start(&FrameBuffer::filled(8, 8, [0, 0, 0]), fixed_time())
            .unwrap();
        let second = rec
            .start(&FrameBuffer::filled(16, 16, [0, 0, 0]), fixed_time())
            .unwrap();
        assert_eq!(first, second);
        assert!(rec.write(&FrameBuffer::filled(8, 8, [0, 0, 0])).is_ok());
    }
}
