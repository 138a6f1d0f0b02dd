#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::labels::class_name;
use crate::detect::nms::non_max_suppression;
use crate::frame::{BoundingBox, Detection, FrameBuffer};

/// Grey used to pad the letterboxed model input.
const PAD_VALUE: f32 = 144.0 / 255.0;
const BOX_OFFSET: usize = 4;

/// Tract-based YOLOv8 detector.
///
/// Loads a local ONNX export (`[1, 3, H, W]` in, `[1, 4 + classes, anchors]`
/// out) and runs it on the CPU. Boxes are mapped back to frame pixels.
pub struct TractDetector {
    model: TypedRunnableModel<TypedModel>,
    input_width: u32,
    input_height: u32,
    iou_threshold: f32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractDetector: loaded {} ({}x{} input)",
            model_path.display(),
            input_width,
            input_height
        );
        Ok(Self {
            model,
            input_width,
            input_height,
            iou_threshold: 0.45,
        })
    }

    /// Override the default NMS IoU threshold.
    pub fn with_iou_threshold(mut self, iou: f32) -> Self {
        self.iou_threshold = iou;
        self
    }

    fn scale_ratio(&self, frame: &FrameBuffer) -> f32 {
        (self.input_width as f32 / frame.width() as f32)
            .min(self.input_height as f32 / frame.height() as f32)
    }

    fn build_input(&self, frame: &FrameBuffer, ratio: f32) -> Result<Tensor> {
        let resized_w = ((frame.width() as f32 * ratio).round() as u32).clamp(1, self.input_width);
        let resized_h =
            ((frame.height() as f32 * ratio).round() as u32).clamp(1, self.input_height);
        let resized = image::imageops::resize(
            &frame.to_rgb_image(),
            resized_w,
            resized_h,
            FilterType::Triangle,
        );

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, self.input_width as usize),
            |(_, channel, y, x)| {
                if (x as u32) < resized_w && (y as u32) < resized_h {
                    resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
                } else {
                    PAD_VALUE
                }
            },
        );
        Ok(input.into_tensor())
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        frame: &FrameBuffer,
        ratio: f32,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape().to_vec();
        if shape.len() != 3 || shape[1] <= BOX_OFFSET {
            return Err(anyhow!("unexpected YOLOv8 output shape {:?}", shape));
        }
        let (rows, anchors) = (shape[1], shape[2]);
        let frame_w = frame.width() as f32;
        let frame_h = frame.height() as f32;

        let mut detections = Vec::new();
        for anchor in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for row in BOX_OFFSET..rows {
                let score = preds[[0, row, anchor]];
                if score > best.1 {
                    best = (row - BOX_OFFSET, score);
                }
            }
            let (class_id, confidence) = best;
            if confidence < confidence_threshold {
                continue;
            }

            let cx = preds[[0, 0, anchor]] / ratio;
            let cy = preds[[0, 1, anchor]] / ratio;
            let w = preds[[0, 2, anchor]] / ratio;
            let h = preds[[0, 3, anchor]] / ratio;
            let x = (cx - w / 2.0).clamp(0.0, frame_w);
            let y = (cy - h / 2.0).clamp(0.0, frame_h);
            let bbox = BoundingBox::new(x, y, w.min(frame_w - x), h.min(frame_h - y));
            detections.push(Detection::new(class_name(class_id), confidence, bbox));
        }

        non_max_suppression(&mut detections, self.iou_threshold);
        Ok(detections)
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &FrameBuffer, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let ratio = self.scale_ratio(frame);
        let input = self.build_input(frame, ratio)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame, ratio, confidence_threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = FrameBuffer::filled(self.input_width, self.input_height, [0, 0, 0]);
        self.infer(&blank, 1.0).map(|_| ())
    }
}
