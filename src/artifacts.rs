//! Filesystem artifacts: timestamped names and screenshots.

use chrono::NaiveDateTime;
use image::codecs::jpeg::JpegEncoder;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::frame::FrameBuffer;

pub const RECORDING_PREFIX: &str = "detection";
pub const RECORDING_EXTENSION: &str = "mjpeg";
pub const SCREENSHOT_PREFIX: &str = "screenshot";
pub const SCREENSHOT_EXTENSION: &str = "jpg";

const SCREENSHOT_QUALITY: u8 = 90;

/// Second-level timestamp used in artifact names.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `<prefix>_<YYYYMMDD_HHMMSS>.<extension>`
pub fn artifact_name(prefix: &str, extension: &str, now: NaiveDateTime) -> String {
    format!("{}_{}.{}", prefix, now.format(TIMESTAMP_FORMAT), extension)
}

pub fn recording_path(dir: &Path, now: NaiveDateTime) -> PathBuf {
    dir.join(artifact_name(RECORDING_PREFIX, RECORDING_EXTENSION, now))
}

pub fn screenshot_path(dir: &Path, now: NaiveDateTime) -> PathBuf {
    dir.join(artifact_name(SCREENSHOT_PREFIX, SCREENSHOT_EXTENSION, now))
}

/// `path` when nothing exists there yet, otherwise the first free
/// `<stem>_<n>.<ext>` with n counting up from 2. Names are second-precision,
/// so two artifacts taken within one second would otherwise collide.
pub fn first_free_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    (2u32..)
        .map(|n| path.with_file_name(format!("{}_{}.{}", stem, n, extension)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

/// Write `frame` as a JPEG screenshot. Synchronous; returns the written path.
/// Never overwrites an existing file.
pub fn write_screenshot(
    frame: &FrameBuffer,
    dir: &Path,
    now: NaiveDateTime,
) -> Result<PathBuf, PipelineError> {
    let path = first_free_path(screenshot_path(dir, now));
    let fail = |reason: String| PipelineError::ScreenshotFailed {
        path: path.clone(),
        reason,
    };
    std::fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| fail(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, SCREENSHOT_QUALITY)
        .encode_image(&frame.to_rgb_image())
        .map_err(|e| fail(e.to_string()))?;
    writer.flush().map_err(|e| fail(e.to_string()))?;
    log::info!("screenshot written to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fixed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(14, 5, 7))
            .unwrap()
    }

    #[test]
    fn names_use_second_precision_timestamp() {
        assert_eq!(
            artifact_name(RECORDING_PREFIX, RECORDING_EXTENSION, fixed_time()),
            "detection_20240309_140507.mjpeg"
        );
        assert_eq!(
            screenshot_path(Path::new("/tmp/out"), fixed_time()),
            PathBuf::from("/tmp/out/screenshot_20240309_140507.jpg")
        );
    }

    #[test]
    fn screenshot_is_a_decodable_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let frame = FrameBuffer::filled(32, 24, [200, 30, 30]);

        let path = write_screenshot(&frame, dir.path(), fixed_time()).unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn screenshots_within_one_second_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let dark = FrameBuffer::filled(8, 8, [0, 0, 0]);
        let bright = FrameBuffer::filled(8, 8, [250, 250, 250]);

        let first = write_screenshot(&dark, dir.path(), fixed_time()).unwrap();
        let first_bytes = std::fs::read(&first).unwrap();
        let second = write_screenshot(&bright, dir.path(), fixed_time()).unwrap();

        assert_eq!(first, dir.path().join("screenshot_20240309_140507.jpg"));
        assert_eq!(second, dir.path().join("screenshot_20240309_140507_2.jpg"));
        assert_eq!(std::fs::read(&first).unwrap(), first_bytes);
    }

    #[test]
    fn screenshot_into_unwritable_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();

        let frame = FrameBuffer::filled(4, 4, [0, 0, 0]);
        let err = write_screenshot(&frame, &blocker, fixed_time()).unwrap_err();
        assert!(matches!(err, PipelineError::ScreenshotFailed { .. }));
    }
}
