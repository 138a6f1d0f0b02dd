use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use livedetect::config::PipelineConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "LIVEDETECT_CONFIG",
        "LIVEDETECT_DEVICE",
        "LIVEDETECT_OUTPUT_DIR",
        "LIVEDETECT_CONFIDENCE",
        "LIVEDETECT_MODEL",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, body.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
        [camera]
        device = "stub://porch"
        target_fps = 15
        width = 320
        height = 240

        [detector]
        model_path = "models/yolov8n.onnx"
        confidence = 0.4
        iou_threshold = 0.5

        [recording]
        output_dir = "/var/lib/livedetect"
        fps = 10
        jpeg_quality = 70

        [annotate]
        line_width = 3
        "#,
    );

    std::env::set_var("LIVEDETECT_CONFIG", file.path());
    std::env::set_var("LIVEDETECT_DEVICE", "/dev/video2");
    std::env::set_var("LIVEDETECT_CONFIDENCE", "0.65");

    let cfg = PipelineConfig::load().expect("load config");

    assert_eq!(cfg.camera.device, "/dev/video2");
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!((cfg.camera.width, cfg.camera.height), (320, 240));
    assert_eq!(
        cfg.detector.model_path,
        Some(PathBuf::from("models/yolov8n.onnx"))
    );
    assert!((cfg.detector.confidence - 0.65).abs() < 1e-6);
    assert!((cfg.detector.iou_threshold - 0.5).abs() < 1e-6);
    assert_eq!(cfg.recording.output_dir, PathBuf::from("/var/lib/livedetect"));
    assert_eq!(cfg.recording.fps, 10);
    assert_eq!(cfg.recording.jpeg_quality, 70);
    assert_eq!(cfg.line_width, 3);

    let camera = cfg.camera_config();
    assert_eq!(camera.device, "/dev/video2");
    assert_eq!(camera.frame_limit, None);

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LIVEDETECT_OUTPUT_DIR", "captures");
    std::env::set_var("LIVEDETECT_MODEL", "yolo.onnx");

    let cfg = PipelineConfig::load().expect("load config");
    assert_eq!(cfg.camera.device, "/dev/video0");
    assert_eq!(cfg.recording.output_dir, PathBuf::from("captures"));
    assert_eq!(cfg.detector.model_path, Some(PathBuf::from("yolo.onnx")));
    assert_eq!(cfg.recording.fps, 20);

    clear_env();
}

#[test]
fn rejects_invalid_confidence() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LIVEDETECT_CONFIDENCE", "high");
    assert!(PipelineConfig::load().is_err());

    std::env::set_var("LIVEDETECT_CONFIDENCE", "1.2");
    let err = PipelineConfig::load().unwrap_err();
    assert!(err.to_string().contains("confidence"));

    clear_env();
}

#[test]
fn rejects_malformed_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("[camera\ndevice = ");
    std::env::set_var("LIVEDETECT_CONFIG", file.path());
    let err = PipelineConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    let file = write_config("[recording]\nfps = 0\n");
    assert!(PipelineConfig::from_path(file.path()).is_err());

    clear_env();
}

#[test]
fn explicit_config_path_still_takes_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
        [camera]
        device = "stub://garage"

        [recording]
        output_dir = "from-file"
        "#,
    );
    let ignored = write_config("[camera]\ndevice = \"stub://ignored\"\n");
    std::env::set_var("LIVEDETECT_CONFIG", ignored.path());
    std::env::set_var("LIVEDETECT_DEVICE", "/dev/video4");

    let cfg = PipelineConfig::from_path(file.path()).expect("load config");
    assert_eq!(cfg.camera.device, "/dev/video4");
    assert_eq!(cfg.recording.output_dir, PathBuf::from("from-file"));

    std::env::set_var("LIVEDETECT_CONFIDENCE", "2.0");
    assert!(PipelineConfig::from_path(file.path()).is_err());

    clear_env();
}
