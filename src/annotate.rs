//! Detection overlays.
//!
//! `Annotator::draw` never touches the source frame: it copies the pixels,
//! draws onto the copy and returns it, so the annotated frame can be handed
//! to display, recording and screenshots without aliasing the capture buffer.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::frame::{Detection, FrameBuffer};

const PALETTE: [[u8; 3]; 8] = [
    [0, 255, 0],
    [255, 64, 64],
    [64, 160, 255],
    [255, 200, 0],
    [200, 64, 255],
    [0, 220, 220],
    [255, 128, 0],
    [160, 255, 96],
];

/// Height of the confidence tab drawn above each box.
const TAB_HEIGHT: u32 = 6;

#[derive(Clone, Debug)]
pub struct Annotator {
    line_width: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self { line_width: 2 }
    }
}

impl Annotator {
    pub fn new(line_width: u32) -> Self {
        Self {
            line_width: line_width.max(1),
        }
    }

    pub fn draw(&self, frame: &FrameBuffer, detections: &[Detection]) -> FrameBuffer {
        let mut image = frame.to_rgb_image();
        for detection in detections {
            self.draw_detection(&mut image, detection);
        }
        FrameBuffer::from_rgb_image(image)
    }

    fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        let max_x = (width - 1) as f32;
        let max_y = (height - 1) as f32;
        let left = detection.bbox.x.clamp(0.0, max_x).round() as i32;
        let top = detection.bbox.y.clamp(0.0, max_y).round() as i32;
        let right = (detection.bbox.x + detection.bbox.w).clamp(0.0, max_x).round() as i32;
        let bottom = (detection.bbox.y + detection.bbox.h).clamp(0.0, max_y).round() as i32;
        let box_w = (right - left + 1).max(1) as u32;
        let box_h = (bottom - top + 1).max(1) as u32;
        let color = Rgb(label_color(&detection.label));

        for inset in 0..self.line_width.min(box_w / 2).min(box_h / 2).max(1) {
            let rect = Rect::at(left + inset as i32, top + inset as i32)
                .of_size((box_w - 2 * inset).max(1), (box_h - 2 * inset).max(1));
            draw_hollow_rect_mut(image, rect, color);
        }

        // Tab above the box (inside it when the box touches the top edge),
        // as wide as the box scaled by confidence.
        let tab_w = ((box_w as f32 * detection.confidence).round() as u32).max(1);
        let tab_y = if top >= TAB_HEIGHT as i32 {
            top - TAB_HEIGHT as i32
        } else {
            top
        };
        draw_filled_rect_mut(image, Rect::at(left, tab_y).of_size(tab_w, TAB_HEIGHT), color);
    }
}

/// Stable colour per label.
pub fn label_color(label: &str) -> [u8; 3] {
    let hash = label
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    PALETTE[hash as usize % PALETTE.len()]
}
