//! Frame capture sources.
//!
//! - Mock sources (synthetic scenes, default)
//! - Image sequences played back from local files
//! - V4L2 devices (feature: ingest-v4l2)
//!
//! Each source runs inside its own `CaptureWorker` thread and publishes into the
//! `FrameSlot` for its modality. Sources never block on the consumer.

mod file;
mod mock;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;
mod worker;

use anyhow::{anyhow, Result};

use crate::config::{CameraSettings, InputMode};
use crate::frame::{Frame, Modality};

pub use file::ImageSequenceSource;
pub use mock::{MockRgbSource, MockThermalSource, DEFAULT_FIRE_POSITION};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;
pub use worker::{CaptureStats, CaptureWorker};

/// Which camera a source feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceRole {
    Rgb,
    Ir,
}

impl SourceRole {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceRole::Rgb => "rgb",
            SourceRole::Ir => "ir",
        }
    }

    /// Modality of the frames a source in this role produces.
    pub fn modality(self) -> Modality {
        match self {
            SourceRole::Rgb => Modality::Rgb,
            SourceRole::Ir => Modality::IrRaw16,
        }
    }
}

/// A pull-based frame producer.
pub trait CaptureSource: Send {
    fn name(&self) -> &str;

    fn modality(&self) -> Modality;

    /// Next frame, or `Ok(None)` when nothing is available right now (for
    /// example an exhausted, non-looping sequence).
    fn capture(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying device. Safe to call more than once.
    fn cleanup(&mut self) {}
}

/// Build the source a camera's settings ask for.
pub fn create_source(role: SourceRole, settings: &CameraSettings) -> Result<Box<dyn CaptureSource>> {
    let size = settings.size;
    match settings.input.mode {
        InputMode::Mock => Ok(match role {
            SourceRole::Rgb => Box::new(MockRgbSource::new(size.width, size.height)),
            SourceRole::Ir => Box::new(MockThermalSource::new(size.width, size.height)),
        }),
        InputMode::Files => Ok(Box::new(ImageSequenceSource::new(
            role,
            settings.input.paths.clone(),
            size,
            settings.input.looping,
        )?)),
        InputMode::Live => {
            let device = settings
                .input
                .device
                .clone()
                .ok_or_else(|| anyhow!("{} live input requires a device", role.as_str()))?;
            open_live(role, device, settings)
        }
    }
}

#[cfg(feature = "ingest-v4l2")]
fn open_live(
    role: SourceRole,
    device: String,
    settings: &CameraSettings,
) -> Result<Box<dyn CaptureSource>> {
    let interval_ms = settings.input.frame_interval.as_millis();
    let target_fps = if interval_ms == 0 {
        0
    } else {
        (1000 / interval_ms).max(1) as u32
    };
    let mut source = V4l2Source::new(v4l2::V4l2Config {
        device,
        role,
        target_fps,
        width: settings.size.width,
        height: settings.size.height,
    })?;
    source.connect()?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_live(
    role: SourceRole,
    device: String,
    _settings: &CameraSettings,
) -> Result<Box<dyn CaptureSource>> {
    Err(anyhow!(
        "{} live input from {} requires the ingest-v4l2 feature",
        role.as_str(),
        device
    ))
}
