use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::Detector;
use crate::frame::{BoundingBox, Detection, FrameBuffer};

/// Detector that replays a fixed script of per-frame detections.
///
/// Each `infer` call pops the next entry. Once the script is exhausted it
/// returns no detections, or an error when built with `fail_when_exhausted`.
/// The threshold is honoured so scripted runs react to `set_confidence`.
pub struct ScriptedDetector {
    script: VecDeque<Vec<Detection>>,
    fail_when_exhausted: bool,
    calls: u64,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: script.into(),
            fail_when_exhausted: false,
            calls: 0,
        }
    }

    /// Script built from label lists; every detection gets confidence 0.9
    /// and a fixed 10x10 box.
    pub fn from_labels(frames: &[&[&str]]) -> Self {
        let script = frames
            .iter()
            .map(|labels| {
                labels
                    .iter()
                    .enumerate()
                    .map(|(i, label)| {
                        Detection::new(
                            *label,
                            0.9,
                            BoundingBox::new(i as f32 * 12.0, 0.0, 10.0, 10.0),
                        )
                    })
                    .collect()
            })
            .collect();
        Self::new(script)
    }

    pub fn fail_when_exhausted(mut self) -> Self {
        self.fail_when_exhausted = true;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(&mut self, _frame: &FrameBuffer, confidence_threshold: f32) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(detections) => Ok(detections
                .into_iter()
                .filter(|d| d.confidence >= confidence_threshold)
                .collect()),
            None if self.fail_when_exhausted => {
                Err(anyhow!("script exhausted after {} frames", self.calls - 1))
            }
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_script_then_fails() {
        let frame = FrameBuffer::filled(4, 4, [0, 0, 0]);
        let mut detector =
            ScriptedDetector::from_labels(&[&["cat", "cat"], &[]]).fail_when_exhausted();

        assert_eq!(detector.infer(&frame, 0.5).unwrap().len(), 2);
        assert!(detector.infer(&frame, 0.5).unwrap().is_empty());
        assert!(detector.infer(&frame, 0.5).is_err());
        assert_eq!(detector.calls(), 3);
    }

    #[test]
    fn threshold_filters_scripted_detections() {
        let frame = FrameBuffer::filled(4, 4, [0, 0, 0]);
        let mut detector = ScriptedDetector::from_labels(&[&["cat"]]);
        assert!(detector.infer(&frame, 0.95).unwrap().is_empty());
    }
}
