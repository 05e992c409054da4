//! V4L2 live capture.
//!
//! RGB cameras are opened in `RGB3`. Radiometric IR cores are opened in `Y16`
//! and their little-endian samples are kept as raw16. A `stub://` device path
//! selects a synthetic backend built on the mock scenes.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::{CaptureSource, MockRgbSource, MockThermalSource, SourceRole};
use crate::frame::{unix_now, Frame, Modality, PixelData};

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    pub role: SourceRole,
    /// Requested frame rate. Zero leaves the driver default.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

/// Statistics for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Stats {
    pub frames_captured: u64,
    pub device: String,
}

pub struct V4l2Source {
    name: String,
    backend: V4l2Backend,
}

enum V4l2Backend {
    Synthetic(Box<dyn CaptureSource>, u64),
    Device(DeviceV4l2Source),
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Result<Self> {
        let name = format!("v4l2-{}:{}", config.role.as_str(), config.device);
        let backend = if config.device.starts_with("stub://") {
            let mock: Box<dyn CaptureSource> = match config.role {
                SourceRole::Rgb => Box::new(MockRgbSource::new(config.width, config.height)),
                SourceRole::Ir => Box::new(MockThermalSource::new(config.width, config.height)),
            };
            V4l2Backend::Synthetic(mock, 0)
        } else {
            V4l2Backend::Device(DeviceV4l2Source::new(config))
        };
        Ok(Self { name, backend })
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            V4l2Backend::Synthetic(..) => {
                log::info!("V4l2Source: connected to {} (synthetic)", self.name);
                Ok(())
            }
            V4l2Backend::Device(source) => source.connect(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            V4l2Backend::Synthetic(..) => true,
            V4l2Backend::Device(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> V4l2Stats {
        match &self.backend {
            V4l2Backend::Synthetic(_, frames) => V4l2Stats {
                frames_captured: *frames,
                device: self.name.clone(),
            },
            V4l2Backend::Device(source) => source.stats(),
        }
    }
}

impl CaptureSource for V4l2Source {
    fn name(&self) -> &str {
        &self.name
    }

    fn modality(&self) -> Modality {
        match &self.backend {
            V4l2Backend::Synthetic(mock, _) => mock.modality(),
            V4l2Backend::Device(source) => source.config.role.modality(),
        }
    }

    fn capture(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            V4l2Backend::Synthetic(mock, frames) => {
                *frames += 1;
                mock.capture()
            }
            V4l2Backend::Device(source) => source.next_frame().map(Some),
        }
    }

    fn cleanup(&mut self) {
        if let V4l2Backend::Device(source) = &mut self.backend {
            if source.state.take().is_some() {
                log::info!("V4l2Source: released {}", source.config.device);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Device backend using libv4l
// ----------------------------------------------------------------------------

struct DeviceV4l2Source {
    config: V4l2Config,
    state: Option<DeviceV4l2State>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceV4l2Source {
    fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn fourcc(&self) -> v4l::FourCC {
        match self.config.role {
            SourceRole::Rgb => v4l::FourCC::new(b"RGB3"),
            SourceRole::Ir => v4l::FourCC::new(b"Y16 "),
        }
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = self.fourcc();

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        if format.fourcc != self.fourcc() {
            return Err(anyhow!(
                "v4l2 device {} does not support {} capture (driver chose {})",
                self.config.device,
                self.fourcc(),
                format.fourcc
            ));
        }

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceV4l2StateBuilder {
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
            "V4l2Source: connected to {} ({}x{} {})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.fourcc()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;

        let pixel_count = (self.active_width * self.active_height) as usize;
        let pixels = match self.config.role {
            SourceRole::Rgb => {
                let bytes = buf
                    .get(..pixel_count * 3)
                    .ok_or_else(|| anyhow!("short RGB3 buffer ({} bytes)", buf.len()))?;
                PixelData::Rgb8(bytes.to_vec())
            }
            SourceRole::Ir => {
                let bytes = buf
                    .get(..pixel_count * 2)
                    .ok_or_else(|| anyhow!("short Y16 buffer ({} bytes)", buf.len()))?;
                PixelData::Gray16(
                    bytes
                        .chunks_exact(2)
                        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                        .collect(),
                )
            }
        };

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        Frame::new(
            self.config.role.modality(),
            self.active_width,
            self.active_height,
            unix_now(),
            pixels,
        )
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> V4l2Stats {
        V4l2Stats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(role: SourceRole) -> V4l2Config {
        V4l2Config {
            device: "stub://test".to_string(),
            role,
            target_fps: 10,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn stub_source_produces_role_frames() -> Result<()> {
        let mut source = V4l2Source::new(stub_config(SourceRole::Ir))?;
        source.connect()?;

        let frame = source.capture()?.expect("frame");
        assert_eq!(frame.modality, Modality::IrRaw16);
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(source.stats().frames_captured, 1);
        assert!(source.is_healthy());
        Ok(())
    }

    #[test]
    fn missing_device_fails_to_connect() -> Result<()> {
        let mut source = V4l2Source::new(V4l2Config {
            device: "/dev/does-not-exist".to_string(),
            ..stub_config(SourceRole::Rgb)
        })?;
        assert!(source.connect().is_err());
        assert!(!source.is_healthy());
        source.cleanup();
        Ok(())
    }
}
