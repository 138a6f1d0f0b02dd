//! Frame acquisition.
//!
//! A `FrameSource` owns the camera handle and produces raw RGB frames on
//! demand. The pipeline holds the source only while it is running:
//! - `open` fails fast with `CameraUnavailable` when no device responds
//! - `read` failing means the stream ended (camera unplugged, file exhausted)
//! - `close` releases the device and is safe to call repeatedly
//!
//! `CameraSource` picks a backend from the device string:
//! - `stub://<name>` synthetic scene (tests, demos)
//! - `/dev/videoN` V4L2 capture (feature: camera-v4l2)

pub mod camera;
pub mod normalize;

pub use camera::{CameraConfig, CameraSource, CameraStats};

use crate::error::PipelineError;
use crate::frame::FrameBuffer;

pub trait FrameSource: Send {
    /// Human-readable device identifier, used in logs and errors.
    fn device(&self) -> &str;

    /// Acquire the device. Fails fast if nothing responds.
    fn open(&mut self) -> Result<(), PipelineError>;

    /// Read the next frame. Any failure is reported as `StreamEnded`.
    fn read(&mut self) -> Result<FrameBuffer, PipelineError>;

    /// Release the device. No-op when already closed.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn device(&self) -> &str {
        (**self).device()
    }

    fn open(&mut self) -> Result<(), PipelineError> {
        (**self).open()
    }

    fn read(&mut self) -> Result<FrameBuffer, PipelineError> {
        (**self).read()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
