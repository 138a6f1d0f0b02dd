//! Frame and detection types.
//!
//! - `FrameBuffer`: owned RGB8 pixel grid. Stages hand it along by value; once
//!   annotated it is wrapped in an `Arc` and never mutated again.
//! - `Detection`: one recognised object (label, confidence, pixel-space box).

use anyhow::{anyhow, Result};
use image::RgbImage;

/// Fixed capture width. Not negotiated with the device.
pub const CAPTURE_WIDTH: u32 = 640;

/// Fixed capture height. Not negotiated with the device.
pub const CAPTURE_HEIGHT: u32 = 480;

/// Channel depth of every buffer in the pipeline (packed RGB8).
pub const RGB_CHANNELS: u8 = 3;

// ----------------------------------------------------------------------------
// FrameBuffer
// ----------------------------------------------------------------------------

/// Owned pixel grid, row-major packed RGB8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl FrameBuffer {
    /// Wrap packed RGB8 pixels. Fails if the length does not match the dimensions.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            channels: RGB_CHANNELS,
            data,
        })
    }

    /// Solid-colour frame.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            channels: RGB_CHANNELS,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Pixel at (x, y), or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Copy the pixels into an `image` buffer for drawing or encoding.
    pub fn to_rgb_image(&self) -> RgbImage {
        // Length is validated at construction, so this cannot fail.
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            channels: RGB_CHANNELS,
            data: image.into_raw(),
        }
    }
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS as usize))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Detections
// ----------------------------------------------------------------------------

/// Axis-aligned box in pixel space: top-left corner plus size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.w).min(other.x + other.w);
        let bottom = (self.y + self.h).min(other.y + other.h);
        let inter = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One recognised object in a single frame. Not retained past the frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    /// In [0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_rejects_wrong_length() {
        assert!(FrameBuffer::from_rgb(4, 4, vec![0; 47]).is_err());
        let frame = FrameBuffer::from_rgb(4, 4, vec![0; 48]).unwrap();
        assert_eq!(frame.dimensions(), (4, 4));
        assert_eq!(frame.channels(), 3);
    }

    #[test]
    fn pixel_lookup_is_bounds_checked() {
        let frame = FrameBuffer::filled(2, 2, [10, 20, 30]);
        assert_eq!(frame.pixel(1, 1), Some([10, 20, 30]));
        assert_eq!(frame.pixel(2, 0), None);
    }

    #[test]
    fn rgb_image_round_trip_keeps_pixels() {
        let frame = FrameBuffer::filled(3, 2, [1, 2, 3]);
        let back = FrameBuffer::from_rgb_image(frame.to_rgb_image());
        assert_eq!(back, frame);
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn detection_confidence_is_clamped() {
        let det = Detection::new("cat", 1.4, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(det.confidence, 1.0);
    }
}
