use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use firewatch::config::{AppConfig, EoDetectorKind, InputMode};
use firewatch::fusion::FrameSize;
use firewatch::protocol::PayloadEncoding;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FIREWATCH_CONFIG",
        "FIREWATCH_STREAM_HOST",
        "FIREWATCH_STREAM_PORT",
        "FIREWATCH_MAX_PACKET_MB",
        "FIREWATCH_IR_MODE",
        "FIREWATCH_RGB_MODE",
        "FIREWATCH_BUFFER_SLOTS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "ir": { "size": [320, 240], "input": { "mode": "files", "paths": "a.tiff; b.tiff", "loop": false } },
        "rgb": { "size": [1280, 720], "input": { "frame_interval_ms": 20 } },
        "buffer": { "slots": 2 },
        "stream": { "port": 7000, "encoding": "flagged", "compress": false },
        "coord": { "offset_x": 12.5, "scale_y": 0.9 },
        "fusion": { "hotspot_threshold_c": 120.0, "eo_detector": "none" }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("FIREWATCH_CONFIG", file.path());
    std::env::set_var("FIREWATCH_STREAM_HOST", "127.0.0.1");
    std::env::set_var("FIREWATCH_BUFFER_SLOTS", "3");

    let cfg = AppConfig::load().expect("load config");

    assert_eq!(cfg.ir.size, FrameSize::new(320, 240));
    assert_eq!(cfg.ir.input.mode, InputMode::Files);
    assert_eq!(
        cfg.ir.input.paths,
        vec![PathBuf::from("a.tiff"), PathBuf::from("b.tiff")]
    );
    assert!(!cfg.ir.input.looping);
    assert_eq!(cfg.rgb.size, FrameSize::new(1280, 720));
    assert_eq!(cfg.rgb.input.mode, InputMode::Mock);
    assert_eq!(cfg.rgb.input.frame_interval, Duration::from_millis(20));
    assert_eq!(cfg.buffer_slots, 3);
    assert_eq!(cfg.stream.bind_addr(), "127.0.0.1:7000");
    assert_eq!(cfg.stream.encoding, PayloadEncoding::Flagged);
    assert!(!cfg.stream.compress);
    assert_eq!(cfg.coord.offset_x, 12.5);
    assert_eq!(cfg.coord.scale_x, 1.0);
    assert_eq!(cfg.coord.scale_y, 0.9);
    assert_eq!(cfg.fusion.hotspot_threshold_c, 120.0);
    assert_eq!(cfg.fusion.eo_detector, EoDetectorKind::None);

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
[rgb.input]
mode = "files"
paths = ["frames/0001.png", "frames/0002.png"]

[stream]
max_packet_mb = 8.0
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = AppConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.rgb.input.paths.len(), 2);
    assert_eq!(cfg.stream.max_packet_bytes(), 8 * 1024 * 1024);
}

#[test]
fn env_mode_override_is_validated() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    std::env::set_var("FIREWATCH_IR_MODE", "live");
    let err = AppConfig::load().expect_err("live without device");
    assert!(err.to_string().contains("device"));

    std::env::set_var("FIREWATCH_IR_MODE", "webcam");
    assert!(AppConfig::load().is_err());

    clear_env();
    std::env::set_var("FIREWATCH_STREAM_PORT", "not-a-port");
    assert!(AppConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_non_positive_packet_bound() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    std::env::set_var("FIREWATCH_MAX_PACKET_MB", "0");
    assert!(AppConfig::load().is_err());

    clear_env();
}
