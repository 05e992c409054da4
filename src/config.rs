use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::fusion::{FovAdjust, FrameSize};
use crate::protocol::PayloadEncoding;

const DEFAULT_IR_SIZE: [u32; 2] = [160, 120];
const DEFAULT_RGB_SIZE: [u32; 2] = [960, 540];
const DEFAULT_FRAME_INTERVAL_MS: u64 = 33;
const DEFAULT_BUFFER_SLOTS: usize = 1;
const DEFAULT_STREAM_HOST: &str = "0.0.0.0";
const DEFAULT_STREAM_PORT: u16 = 9999;
const DEFAULT_MAX_PACKET_MB: f64 = 4.0;
const DEFAULT_SEND_INTERVAL_MS: u64 = 33;
const DEFAULT_FUSION_INTERVAL_MS: u64 = 50;
const DEFAULT_READ_TIMEOUT_MS: u64 = 100;
const DEFAULT_HOTSPOT_THRESHOLD_C: f32 = 80.0;
const DEFAULT_MAX_HOTSPOTS: usize = 16;
const DEFAULT_MIN_SEPARATION_PX: f32 = 4.0;
const DEFAULT_JPEG_QUALITY: u8 = 80;

// ----------------------------------------------------------------------------
// File representation: every field optional
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    ir: Option<CameraConfigFile>,
    rgb: Option<CameraConfigFile>,
    buffer: Option<BufferConfigFile>,
    stream: Option<StreamConfigFile>,
    coord: Option<CoordConfigFile>,
    fusion: Option<FusionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    size: Option<[u32; 2]>,
    input: Option<InputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct InputConfigFile {
    mode: Option<InputMode>,
    paths: Option<PathsFile>,
    device: Option<String>,
    #[serde(rename = "loop")]
    looping: Option<bool>,
    frame_interval_ms: Option<u64>,
}

/// `paths` may be a list or a single `;`-separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PathsFile {
    List(Vec<String>),
    Joined(String),
}

#[derive(Debug, Deserialize, Default)]
struct BufferConfigFile {
    slots: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    host: Option<String>,
    port: Option<u16>,
    max_packet_mb: Option<f64>,
    encoding: Option<PayloadEncoding>,
    compress: Option<bool>,
    send_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CoordConfigFile {
    offset_x: Option<f32>,
    offset_y: Option<f32>,
    scale_x: Option<f32>,
    scale_y: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct FusionConfigFile {
    interval_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    hotspot_threshold_c: Option<f32>,
    max_hotspots: Option<usize>,
    min_separation_px: Option<f32>,
    eo_detector: Option<EoDetectorKind>,
    jpeg_quality: Option<u8>,
}

// ----------------------------------------------------------------------------
// Resolved settings
// ----------------------------------------------------------------------------

/// Where a camera's frames come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    #[default]
    Mock,
    Files,
    Live,
}

impl InputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            InputMode::Mock => "mock",
            InputMode::Files => "files",
            InputMode::Live => "live",
        }
    }
}

impl FromStr for InputMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(InputMode::Mock),
            "files" => Ok(InputMode::Files),
            "live" => Ok(InputMode::Live),
            other => Err(anyhow!(
                "unknown input mode '{}' (expected mock, files or live)",
                other
            )),
        }
    }
}

/// Which EO detector the fusion stage runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EoDetectorKind {
    #[default]
    FlameColor,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputSettings {
    pub mode: InputMode,
    pub paths: Vec<PathBuf>,
    pub device: Option<String>,
    pub looping: bool,
    /// Zero disables pacing.
    pub frame_interval: Duration,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            mode: InputMode::Mock,
            paths: Vec::new(),
            device: None,
            looping: true,
            frame_interval: Duration::from_millis(DEFAULT_FRAME_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub size: FrameSize,
    pub input: InputSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub host: String,
    pub port: u16,
    pub max_packet_mb: f64,
    pub encoding: PayloadEncoding,
    pub compress: bool,
    pub send_interval: Duration,
}

impl StreamSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_packet_bytes(&self) -> usize {
        (self.max_packet_mb * 1024.0 * 1024.0) as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionSettings {
    pub interval: Duration,
    pub read_timeout: Duration,
    pub hotspot_threshold_c: f32,
    pub max_hotspots: usize,
    pub min_separation_px: f32,
    pub eo_detector: EoDetectorKind,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub ir: CameraSettings,
    pub rgb: CameraSettings,
    pub buffer_slots: usize,
    pub stream: StreamSettings,
    pub coord: FovAdjust,
    pub fusion: FusionSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_file(AppConfigFile::default())
    }
}

impl AppConfig {
    /// File named by `FIREWATCH_CONFIG` (if any), then env overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FIREWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => AppConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        let buffer_slots = file
            .buffer
            .and_then(|buffer| buffer.slots)
            .unwrap_or(DEFAULT_BUFFER_SLOTS);

        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            host: stream_file
                .host
                .unwrap_or_else(|| DEFAULT_STREAM_HOST.to_string()),
            port: stream_file.port.unwrap_or(DEFAULT_STREAM_PORT),
            max_packet_mb: stream_file.max_packet_mb.unwrap_or(DEFAULT_MAX_PACKET_MB),
            encoding: stream_file.encoding.unwrap_or_default(),
            compress: stream_file.compress.unwrap_or(true),
            send_interval: Duration::from_millis(
                stream_file
                    .send_interval_ms
                    .unwrap_or(DEFAULT_SEND_INTERVAL_MS),
            ),
        };

        let coord_file = file.coord.unwrap_or_default();
        let coord = FovAdjust {
            offset_x: coord_file.offset_x.unwrap_or(0.0),
            offset_y: coord_file.offset_y.unwrap_or(0.0),
            scale_x: coord_file.scale_x.unwrap_or(1.0),
            scale_y: coord_file.scale_y.unwrap_or(1.0),
        };

        let fusion_file = file.fusion.unwrap_or_default();
        let fusion = FusionSettings {
            interval: Duration::from_millis(
                fusion_file
                    .interval_ms
                    .unwrap_or(DEFAULT_FUSION_INTERVAL_MS),
            ),
            read_timeout: Duration::from_millis(
                fusion_file
                    .read_timeout_ms
                    .unwrap_or(DEFAULT_READ_TIMEOUT_MS),
            ),
            hotspot_threshold_c: fusion_file
                .hotspot_threshold_c
                .unwrap_or(DEFAULT_HOTSPOT_THRESHOLD_C),
            max_hotspots: fusion_file.max_hotspots.unwrap_or(DEFAULT_MAX_HOTSPOTS),
            min_separation_px: fusion_file
                .min_separation_px
                .unwrap_or(DEFAULT_MIN_SEPARATION_PX),
            eo_detector: fusion_file.eo_detector.unwrap_or_default(),
            jpeg_quality: fusion_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        Self {
            ir: camera_from_file(file.ir, DEFAULT_IR_SIZE),
            rgb: camera_from_file(file.rgb, DEFAULT_RGB_SIZE),
            buffer_slots,
            stream,
            coord,
            fusion,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("FIREWATCH_STREAM_HOST") {
            if !host.trim().is_empty() {
                self.stream.host = host.trim().to_string();
            }
        }
        if let Ok(port) = std::env::var("FIREWATCH_STREAM_PORT") {
            self.stream.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("FIREWATCH_STREAM_PORT must be a port number"))?;
        }
        if let Ok(max_mb) = std::env::var("FIREWATCH_MAX_PACKET_MB") {
            self.stream.max_packet_mb = max_mb
                .trim()
                .parse()
                .map_err(|_| anyhow!("FIREWATCH_MAX_PACKET_MB must be a number of megabytes"))?;
        }
        if let Ok(mode) = std::env::var("FIREWATCH_IR_MODE") {
            if !mode.trim().is_empty() {
                self.ir.input.mode = mode.parse()?;
            }
        }
        if let Ok(mode) = std::env::var("FIREWATCH_RGB_MODE") {
            if !mode.trim().is_empty() {
                self.rgb.input.mode = mode.parse()?;
            }
        }
        if let Ok(slots) = std::env::var("FIREWATCH_BUFFER_SLOTS") {
            self.buffer_slots = slots
                .trim()
                .parse()
                .map_err(|_| anyhow!("FIREWATCH_BUFFER_SLOTS must be a positive integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (role, camera) in [("ir", &self.ir), ("rgb", &self.rgb)] {
            if camera.size.is_degenerate() {
                return Err(anyhow!(
                    "{}.size must be non-zero, got {}x{}",
                    role,
                    camera.size.width,
                    camera.size.height
                ));
            }
            match camera.input.mode {
                InputMode::Files if camera.input.paths.is_empty() => {
                    return Err(anyhow!("{}.input.paths is required in files mode", role));
                }
                InputMode::Live if camera.input.device.is_none() => {
                    return Err(anyhow!("{}.input.device is required in live mode", role));
                }
                _ => {}
            }
        }
        if self.buffer_slots == 0 {
            return Err(anyhow!("buffer.slots must be at least 1"));
        }
        if !self.stream.max_packet_mb.is_finite() || self.stream.max_packet_mb <= 0.0 {
            return Err(anyhow!("stream.max_packet_mb must be greater than zero"));
        }
        if self.stream.max_packet_bytes() == 0 {
            return Err(anyhow!("stream.max_packet_mb is below one byte"));
        }
        if self.fusion.jpeg_quality == 0 || self.fusion.jpeg_quality > 100 {
            return Err(anyhow!("fusion.jpeg_quality must be within 1..=100"));
        }
        if !self.fusion.hotspot_threshold_c.is_finite() {
            return Err(anyhow!("fusion.hotspot_threshold_c must be finite"));
        }
        self.coord
            .validate()
            .map_err(|err| anyhow!("invalid coord section: {}", err))?;
        Ok(())
    }
}

fn camera_from_file(file: Option<CameraConfigFile>, default_size: [u32; 2]) -> CameraSettings {
    let file = file.unwrap_or_default();
    let [width, height] = file.size.unwrap_or(default_size);
    let input_file = file.input.unwrap_or_default();
    let defaults = InputSettings::default();
    CameraSettings {
        size: FrameSize::new(width, height),
        input: InputSettings {
            mode: input_file.mode.unwrap_or(defaults.mode),
            paths: match input_file.paths {
                Some(PathsFile::List(paths)) => paths
                    .iter()
                    .map(|entry| entry.trim())
                    .filter(|entry| !entry.is_empty())
                    .map(PathBuf::from)
                    .collect(),
                Some(PathsFile::Joined(joined)) => split_paths(&joined),
                None => defaults.paths,
            },
            device: input_file
                .device
                .filter(|device| !device.trim().is_empty()),
            looping: input_file.looping.unwrap_or(defaults.looping),
            frame_interval: input_file
                .frame_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.frame_interval),
        },
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_paths(value: &str) -> Vec<PathBuf> {
    value
        .split(';')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.ir.size, FrameSize::new(160, 120));
        assert_eq!(cfg.rgb.size, FrameSize::new(960, 540));
        assert_eq!(cfg.ir.input.mode, InputMode::Mock);
        assert_eq!(cfg.buffer_slots, 1);
        assert_eq!(cfg.stream.bind_addr(), "0.0.0.0:9999");
        assert_eq!(cfg.stream.max_packet_bytes(), 4 * 1024 * 1024);
        assert_eq!(cfg.stream.encoding, PayloadEncoding::Legacy);
        assert_eq!(cfg.coord, FovAdjust::IDENTITY);
        assert_eq!(cfg.fusion.eo_detector, EoDetectorKind::FlameColor);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn joined_paths_are_split_on_semicolons() {
        assert_eq!(
            split_paths(" a.png;;b.png ;"),
            vec![PathBuf::from("a.png"), PathBuf::from("b.png")]
        );
    }

    #[test]
    fn validate_rejects_files_mode_without_paths() {
        let mut cfg = AppConfig::default();
        cfg.rgb.input.mode = InputMode::Files;
        assert!(cfg.validate().is_err());
        cfg.rgb.input.paths = vec![PathBuf::from("frame.png")];
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_geometry_and_bounds() {
        let mut cfg = AppConfig::default();
        cfg.ir.size = FrameSize::new(0, 120);
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.buffer_slots = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.stream.max_packet_mb = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.coord.scale_y = -1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.ir.input.mode = InputMode::Live;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn input_mode_parses_case_insensitively() -> Result<()> {
        assert_eq!("LIVE".parse::<InputMode>()?, InputMode::Live);
        assert!("camera".parse::<InputMode>().is_err());
        Ok(())
    }
}
