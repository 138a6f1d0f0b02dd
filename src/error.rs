//! Failure taxonomy for the pipeline command surface.
//!
//! Every variant is recovered locally by the component that detects it and
//! surfaced to the caller as a return value. None of them terminate the
//! process.

use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineError {
    /// No camera responded when the source was opened. The pipeline stays stopped.
    CameraUnavailable { device: String, reason: String },
    /// A mid-run read (or inference) failed. Triggers a graceful stop.
    StreamEnded { reason: String },
    /// The video sink could not be created. Recording stays idle.
    SinkOpenFailed { path: PathBuf, reason: String },
    /// Writing to an open sink failed (disk full, device removed).
    SinkWriteFailed { path: PathBuf, reason: String },
    /// A frame arrived with dimensions different from the recording session's.
    ResolutionChanged {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// A command that needs a running pipeline was issued while stopped.
    NotRunning,
    /// Writing a screenshot to disk failed.
    ScreenshotFailed { path: PathBuf, reason: String },
}

impl PipelineError {
    pub fn camera_unavailable(device: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::CameraUnavailable {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    pub fn stream_ended(reason: impl fmt::Display) -> Self {
        Self::StreamEnded {
            reason: reason.to_string(),
        }
    }

    pub fn sink_open_failed(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::SinkOpenFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Short stable code, used as the log prefix.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CameraUnavailable { .. } => "camera_unavailable",
            Self::StreamEnded { .. } => "stream_ended",
            Self::SinkOpenFailed { .. } => "sink_open_failed",
            Self::SinkWriteFailed { .. } => "sink_write_failed",
            Self::ResolutionChanged { .. } => "resolution_changed",
            Self::NotRunning => "not_running",
            Self::ScreenshotFailed { .. } => "screenshot_failed",
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CameraUnavailable { device, reason } => {
                write!(f, "{}: camera {} unavailable: {}", self.code(), device, reason)
            }
            Self::StreamEnded { reason } => write!(f, "{}: {}", self.code(), reason),
            Self::SinkOpenFailed { path, reason } => write!(
                f,
                "{}: cannot open {}: {}",
                self.code(),
                path.display(),
                reason
            ),
            Self::SinkWriteFailed { path, reason } => write!(
                f,
                "{}: cannot write {}: {}",
                self.code(),
                path.display(),
                reason
            ),
            Self::ResolutionChanged { expected, actual } => write!(
                f,
                "{}: session is {}x{}, frame is {}x{}",
                self.code(),
                expected.0,
                expected.1,
                actual.0,
                actual.1
            ),
            Self::NotRunning => write!(f, "{}: pipeline is stopped", self.code()),
            Self::ScreenshotFailed { path, reason } => write!(
                f,
                "{}: cannot write {}: {}",
                self.code(),
                path.display(),
                reason
            ),
        }
    }
}

impl std::error::Error for PipelineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_code_prefix() {
        let err = PipelineError::camera_unavailable("/dev/video0", "no such device");
        assert_eq!(
            err.to_string(),
            "camera_unavailable: camera /dev/video0 unavailable: no such device"
        );

        let err = PipelineError::ResolutionChanged {
            expected: (640, 480),
            actual: (320, 240),
        };
        assert!(err.to_string().starts_with("resolution_changed:"));
    }

    #[test]
    fn errors_convert_into_anyhow() {
        let err: anyhow::Error = PipelineError::NotRunning.into();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::NotRunning)
        );
    }
}
