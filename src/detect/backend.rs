use anyhow::Result;

use crate::frame::{Detection, FrameBuffer};

/// Object detector consumed by the pipeline.
///
/// Inference is stateless per call from the pipeline's point of view. The
/// confidence threshold is passed on every call because it can change at any
/// time from outside the pipeline; implementations must not cache it.
///
/// Latency is unbounded. The pipeline makes no frame-budget assumption.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame, keeping only detections at or above `confidence_threshold`.
    ///
    /// Implementations must treat the frame as read-only.
    fn infer(&mut self, frame: &FrameBuffer, confidence_threshold: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn infer(&mut self, frame: &FrameBuffer, confidence_threshold: f32) -> Result<Vec<Detection>> {
        (**self).infer(frame, confidence_threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
