use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::frame::{CAPTURE_HEIGHT, CAPTURE_WIDTH};
use crate::ingest::CameraConfig;
use crate::record::RECORDING_FPS;

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_OUTPUT_DIR: &str = "recordings";
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_LINE_WIDTH: u32 = 2;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    recording: Option<RecordingConfigFile>,
    annotate: Option<AnnotateConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    model_path: Option<PathBuf>,
    confidence: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RecordingConfigFile {
    output_dir: Option<PathBuf>,
    fps: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnnotateConfigFile {
    line_width: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub recording: RecordingSettings,
    pub line_width: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    pub device: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub model_path: Option<PathBuf>,
    pub confidence: f32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSettings {
    /// Directory receiving recordings and screenshots.
    pub output_dir: PathBuf,
    pub fps: u32,
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_file(PipelineConfigFile::default())
    }
}

impl PipelineConfig {
    /// Defaults, then the TOML file named by `LIVEDETECT_CONFIG`, then
    /// `LIVEDETECT_*` environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LIVEDETECT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like [`PipelineConfig::load`] but reads `path` instead of the file
    /// named by `LIVEDETECT_CONFIG`. `LIVEDETECT_*` overrides still apply.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let recording = file.recording.unwrap_or_default();
        Self {
            camera: CameraSettings {
                device: camera.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
                width: camera.width.unwrap_or(CAPTURE_WIDTH),
                height: camera.height.unwrap_or(CAPTURE_HEIGHT),
            },
            detector: DetectorSettings {
                model_path: detector.model_path,
                confidence: detector.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                iou_threshold: detector.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            },
            recording: RecordingSettings {
                output_dir: recording
                    .output_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
                fps: recording.fps.unwrap_or(RECORDING_FPS),
                jpeg_quality: recording.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            line_width: file
                .annotate
                .and_then(|annotate| annotate.line_width)
                .unwrap_or(DEFAULT_LINE_WIDTH),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("LIVEDETECT_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(dir) = std::env::var("LIVEDETECT_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.recording.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(model) = std::env::var("LIVEDETECT_MODEL") {
            if !model.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(model));
            }
        }
        if let Ok(confidence) = std::env::var("LIVEDETECT_CONFIDENCE") {
            self.detector.confidence = confidence.trim().parse().map_err(|_| {
                anyhow!("LIVEDETECT_CONFIDENCE must be a number between 0 and 1")
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detector.confidence) {
            return Err(anyhow!(
                "confidence must be within [0, 1], got {}",
                self.detector.confidence
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.iou_threshold) {
            return Err(anyhow!(
                "iou_threshold must be within [0, 1], got {}",
                self.detector.iou_threshold
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.recording.fps == 0 {
            return Err(anyhow!("recording fps must be greater than zero"));
        }
        if self.recording.jpeg_quality == 0 || self.recording.jpeg_quality > 100 {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        Ok(())
    }

    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            device: self.camera.device.clone(),
            target_fps: self.camera.target_fps,
            width: self.camera.width,
            height: self.camera.height,
            frame_limit: None,
        }
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
