//! Camera frame source.
//!
//! `CameraSource` is the `FrameSource` the pipeline uses for live capture.
//!
//! The camera source is responsible for:
//! - Opening the device at the fixed capture resolution
//! - Converting device pixels to packed RGB8
//! - Reporting end-of-stream when the device stops delivering frames
//!
//! The camera source MUST NOT:
//! - Retain frames beyond handoff to the pipeline
//! - Negotiate a resolution other than the configured one

use anyhow::{anyhow, Result};
#[cfg(feature = "camera-v4l2")]
use anyhow::Context;
#[cfg(feature = "camera-v4l2")]
use ouroboros::self_referencing;
use rand::Rng;
use std::time::{Duration, Instant};

use super::FrameSource;
use crate::error::PipelineError;
use crate::frame::{FrameBuffer, CAPTURE_HEIGHT, CAPTURE_WIDTH};

/// Synthetic device name that never responds. Used to exercise `CameraUnavailable`.
pub const OFFLINE_STUB_DEVICE: &str = "stub://offline";

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or `stub://<name>`.
    pub device: String,
    /// Frame pacing for synthetic sources. 0 means "as fast as possible".
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Synthetic only: end the stream after this many frames.
    pub frame_limit: Option<u64>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: CAPTURE_WIDTH,
            height: CAPTURE_HEIGHT,
            frame_limit: None,
        }
    }
}

/// Camera frame source.
///
/// Uses libv4l for real devices, with a synthetic fallback for `stub://` paths.
pub struct CameraSource {
    device: String,
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "camera-v4l2")]
    Device(DeviceCamera),
    #[cfg(not(feature = "camera-v4l2"))]
    Unsupported,
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Self {
        let device = config.device.clone();
        let backend = if config.device.starts_with("stub://") {
            CameraBackend::Synthetic(SyntheticCamera::new(config))
        } else {
            #[cfg(feature = "camera-v4l2")]
            {
                CameraBackend::Device(DeviceCamera::new(config))
            }
            #[cfg(not(feature = "camera-v4l2"))]
            {
                CameraBackend::Unsupported
            }
        };
        Self { device, backend }
    }

    /// Check if the source is healthy.
    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_open(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(source) => source.is_healthy(),
            #[cfg(not(feature = "camera-v4l2"))]
            CameraBackend::Unsupported => false,
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> CameraStats {
        let frames_captured = match &self.backend {
            CameraBackend::Synthetic(source) => source.frame_count,
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(source) => source.frame_count,
            #[cfg(not(feature = "camera-v4l2"))]
            CameraBackend::Unsupported => 0,
        };
        CameraStats {
            frames_captured,
            device: self.device.clone(),
        }
    }
}

impl FrameSource for CameraSource {
    fn device(&self) -> &str {
        &self.device
    }

    fn open(&mut self) -> Result<(), PipelineError> {
        let result = match &mut self.backend {
            CameraBackend::Synthetic(source) => source.open(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(source) => source.open(),
            #[cfg(not(feature = "camera-v4l2"))]
            CameraBackend::Unsupported => {
                Err(anyhow!("device capture requires the camera-v4l2 feature"))
            }
        };
        result.map_err(|err| {
            PipelineError::camera_unavailable(&self.device, format!("{:#}", err))
        })
    }

    fn read(&mut self) -> Result<FrameBuffer, PipelineError> {
        let result = match &mut self.backend {
            CameraBackend::Synthetic(source) => source.read(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(source) => source.read(),
            #[cfg(not(feature = "camera-v4l2"))]
            CameraBackend::Unsupported => Err(anyhow!("device not open")),
        };
        result.map_err(|err| PipelineError::stream_ended(format!("{}: {:#}", self.device, err)))
    }

    fn close(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(source) => source.close(),
            #[cfg(not(feature = "camera-v4l2"))]
            CameraBackend::Unsupported => {}
        }
    }

    fn is_open(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_open(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(source) => source.state.is_some(),
            #[cfg(not(feature = "camera-v4l2"))]
            CameraBackend::Unsupported => false,
        }
    }
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub device: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

/// Side of the bright square objects drawn into the synthetic scene.
const OBJECT_SIZE: u32 = 48;

/// Synthetic scene: a dim noisy gradient with saturated white squares
/// sliding across two horizontal lanes. The top lane always holds one
/// object; the bottom lane holds one every other 50-frame scene.
struct SyntheticCamera {
    config: CameraConfig,
    open: bool,
    frame_count: u64,
    scene_state: u8,
    last_frame_at: Option<Instant>,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            open: false,
            frame_count: 0,
            scene_state: 0,
            last_frame_at: None,
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.config.device == OFFLINE_STUB_DEVICE {
            return Err(anyhow!(
                "no synthetic device responds at {}",
                self.config.device
            ));
        }
        self.open = true;
        self.frame_count = 0;
        self.scene_state = 0;
        log::info!(
            "CameraSource: opened {} ({}x{}, synthetic)",
            self.config.device,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn read(&mut self) -> Result<FrameBuffer> {
        if !self.open {
            return Err(anyhow!("device not open"));
        }
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return Err(anyhow!("synthetic stream ended after {} frames", limit));
            }
        }
        self.pace();
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        FrameBuffer::from_rgb(
            self.config.width,
            self.config.height,
            self.generate_synthetic_pixels(),
        )
    }

    fn close(&mut self) {
        if self.open {
            log::info!(
                "CameraSource: closed {} after {} frames",
                self.config.device,
                self.frame_count
            );
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn pace(&mut self) {
        if self.config.target_fps == 0 {
            return;
        }
        let interval = Duration::from_secs(1) / self.config.target_fps;
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let width = self.config.width;
        let height = self.config.height;
        let mut rng = rand::thread_rng();
        let mut pixels = vec![0u8; width as usize * height as usize * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i as u32 % width;
            let y = i as u32 / width;
            let noise: u8 = rng.gen_range(0..8);
            px[0] = ((x * 160 / width.max(1)) as u8).saturating_add(noise);
            px[1] = ((y * 160 / height.max(1)) as u8).saturating_add(noise);
            px[2] = 60u8.saturating_add(noise);
        }

        let travel = width.saturating_sub(OBJECT_SIZE).max(1) as u64;
        let top_x = ((self.frame_count * 4) % travel) as u32;
        let top_y = (height / 4).saturating_sub(OBJECT_SIZE / 2);
        fill_square(&mut pixels, width, height, top_x, top_y);

        if self.scene_state % 2 == 1 {
            let bottom_x = (travel - (self.frame_count * 6) % travel) as u32;
            let bottom_y = (height * 3 / 4).saturating_sub(OBJECT_SIZE / 2);
            fill_square(&mut pixels, width, height, bottom_x, bottom_y);
        }
        pixels
    }
}

fn fill_square(pixels: &mut [u8], width: u32, height: u32, left: u32, top: u32) {
    for y in top..(top + OBJECT_SIZE).min(height) {
        for x in left..(left + OBJECT_SIZE).min(width) {
            let idx = (y as usize * width as usize + x as usize) * 3;
            pixels[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
        }
    }
}

// ----------------------------------------------------------------------------
// Production V4L2 source using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-v4l2")]
struct DeviceCamera {
    config: CameraConfig,
    state: Option<DeviceCameraState>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
    pixel_format: super::normalize::PixelFormat,
}

#[cfg(feature = "camera-v4l2")]
#[self_referencing]
struct DeviceCameraState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "camera-v4l2")]
impl DeviceCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
            pixel_format: super::normalize::PixelFormat::Rgb24,
        }
    }

    fn open(&mut self) -> Result<()> {
        use super::normalize::PixelFormat;
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraSource: RGB3 rejected by {}: {}, falling back to YUYV",
                    self.config.device,
                    err
                );
                format.fourcc = v4l::FourCC::new(b"YUYV");
                device
                    .set_format(&format)
                    .context("set v4l2 YUYV format")?
            }
        };

        self.pixel_format = if format.fourcc == v4l::FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else {
            PixelFormat::Rgb24
        };
        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceCameraStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "CameraSource: opened {} ({}x{}, {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.pixel_format
        );
        Ok(())
    }

    fn read(&mut self) -> Result<FrameBuffer> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not open")?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;

        let rgb = super::normalize::normalize_to_rgb(
            buf,
            self.active_width,
            self.active_height,
            self.pixel_format,
        )?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        FrameBuffer::from_rgb(self.active_width, self.active_height, rgb)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "CameraSource: released {} after {} frames",
                self.config.device,
                self.frame_count
            );
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= Duration::from_secs(2)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            target_fps: 0,
            width: 640,
            height: 480,
            frame_limit: None,
        }
    }

    #[test]
    fn camera_source_produces_frames() -> Result<(), PipelineError> {
        let mut source = CameraSource::new(stub_config());
        source.open()?;

        let frame = source.read()?;
        assert_eq!(frame.dimensions(), (640, 480));
        assert_eq!(frame.channels(), 3);
        assert_eq!(source.stats().frames_captured, 1);

        Ok(())
    }

    #[test]
    fn offline_device_fails_open() {
        let mut source = CameraSource::new(CameraConfig {
            device: OFFLINE_STUB_DEVICE.to_string(),
            ..stub_config()
        });
        let err = source.open().unwrap_err();
        assert!(matches!(err, PipelineError::CameraUnavailable { .. }));
        assert!(!source.is_open());
    }

    #[test]
    fn read_before_open_is_end_of_stream() {
        let mut source = CameraSource::new(stub_config());
        assert!(matches!(
            source.read(),
            Err(PipelineError::StreamEnded { .. })
        ));
    }

    #[test]
    fn frame_limit_ends_stream() -> Result<(), PipelineError> {
        let mut source = CameraSource::new(CameraConfig {
            frame_limit: Some(2),
            ..stub_config()
        });
        source.open()?;
        source.read()?;
        source.read()?;
        assert!(matches!(
            source.read(),
            Err(PipelineError::StreamEnded { .. })
        ));
        Ok(())
    }

    #[test]
    fn close_is_idempotent() -> Result<(), PipelineError> {
        let mut source = CameraSource::new(stub_config());
        source.open()?;
        source.close();
        source.close();
        assert!(!source.is_open());
        assert!(!source.is_healthy());
        Ok(())
    }

    #[test]
    fn synthetic_scene_contains_saturated_object() -> Result<(), PipelineError> {
        let mut source = CameraSource::new(stub_config());
        source.open()?;
        let frame = source.read()?;
        let saturated = frame
            .as_bytes()
            .chunks_exact(3)
            .filter(|px| **px == [255u8, 255, 255])
            .count();
        assert_eq!(saturated, (OBJECT_SIZE * OBJECT_SIZE) as usize);
        Ok(())
    }

    #[cfg(not(feature = "camera-v4l2"))]
    #[test]
    fn device_path_without_v4l2_is_unavailable() {
        let mut source = CameraSource::new(CameraConfig::default());
        assert!(matches!(
            source.open(),
            Err(PipelineError::CameraUnavailable { .. })
        ));
    }
}
