use anyhow::Result;

use crate::detect::backend::Detector;
use crate::frame::{BoundingBox, Detection, FrameBuffer};

/// Lanes the stub scans, top to bottom: (label, peak confidence).
const LANES: [(&str, f32); 2] = [("person", 0.9), ("car", 0.6)];

/// Stub detector for the synthetic camera.
///
/// Splits the frame into horizontal lanes and reports the bounding box of
/// saturated white pixels in each lane. Confidence is the lane's peak value
/// scaled by how densely the box is filled.
#[derive(Default)]
pub struct StubDetector;

impl StubDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, frame: &FrameBuffer, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let lane_height = frame.height() / LANES.len() as u32;
        let mut detections = Vec::new();
        if lane_height == 0 {
            return Ok(detections);
        }

        for (lane, (label, peak)) in LANES.iter().enumerate() {
            let top = lane as u32 * lane_height;
            let Some((bbox, filled)) = saturated_extent(frame, top, top + lane_height) else {
                continue;
            };
            let confidence = peak * filled as f32 / bbox.area().max(1.0);
            if confidence >= confidence_threshold {
                detections.push(Detection::new(*label, confidence, bbox));
            }
        }
        Ok(detections)
    }
}

/// Bounding box and pixel count of saturated pixels in rows `top..bottom`.
fn saturated_extent(frame: &FrameBuffer, top: u32, bottom: u32) -> Option<(BoundingBox, u32)> {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut count = 0u32;

    for y in top..bottom.min(frame.height()) {
        for x in 0..frame.width() {
            if frame.pixel(x, y) == Some([255, 255, 255]) {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                count += 1;
            }
        }
    }

    if count == 0 {
        return None;
    }
    let bbox = BoundingBox::new(
        min_x as f32,
        min_y as f32,
        (max_x - min_x + 1) as f32,
        (max_y - min_y + 1) as f32,
    );
    Some((bbox, count))
}
