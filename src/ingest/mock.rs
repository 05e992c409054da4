//! Synthetic sources for running the pipeline without hardware.
//!
//! Both mock cameras place their "fire" at the same normalised position, so a
//! mock pipeline sees aligned IR and EO evidence and reports a confirmed fire.

use anyhow::Result;
use rand::Rng;

use super::CaptureSource;
use crate::detect::RadiometricCalibration;
use crate::frame::{unix_now, Frame, Modality, PixelData};

/// Normalised `(x, y)` position of the synthetic fire in both mock cameras.
pub const DEFAULT_FIRE_POSITION: (f32, f32) = (0.5, 0.5);

const BACKGROUND_RGB: [u8; 3] = [40, 40, 40];
const FLAME_RGB: [u8; 3] = [255, 120, 0];
const AMBIENT_C: f32 = 25.0;
const FIRE_PEAK_C: f32 = 150.0;
const FIRE_FALLOFF_C_PER_PX: f32 = 8.0;
/// Ambient noise amplitude, raw units.
const THERMAL_NOISE: u16 = 20;

fn fire_center(position: (f32, f32), width: u32, height: u32) -> (i64, i64) {
    (
        (position.0.clamp(0.0, 1.0) * width as f32) as i64,
        (position.1.clamp(0.0, 1.0) * height as f32) as i64,
    )
}

/// Dark scene with an orange square.
pub struct MockRgbSource {
    width: u32,
    height: u32,
    fire: Option<(f32, f32)>,
}

impl MockRgbSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fire: Some(DEFAULT_FIRE_POSITION),
        }
    }

    /// Move the flame, or remove it with `None`.
    pub fn with_fire_at(mut self, position: Option<(f32, f32)>) -> Self {
        self.fire = position;
        self
    }

    fn render(&self) -> Vec<u8> {
        let (width, height) = (self.width as i64, self.height as i64);
        let mut pixels = BACKGROUND_RGB.repeat((width * height) as usize);
        let Some(position) = self.fire else {
            return pixels;
        };
        let (cx, cy) = fire_center(position, self.width, self.height);
        let half = (width / 20).max(1);
        for y in (cy - half).max(0)..(cy + half).min(height) {
            for x in (cx - half).max(0)..(cx + half).min(width) {
                let offset = ((y * width + x) * 3) as usize;
                pixels[offset..offset + 3].copy_from_slice(&FLAME_RGB);
            }
        }
        pixels
    }
}

impl CaptureSource for MockRgbSource {
    fn name(&self) -> &str {
        "mock-rgb"
    }

    fn modality(&self) -> Modality {
        Modality::Rgb
    }

    fn capture(&mut self) -> Result<Option<Frame>> {
        let frame = Frame::new(
            Modality::Rgb,
            self.width,
            self.height,
            unix_now(),
            PixelData::Rgb8(self.render()),
        )?;
        Ok(Some(frame))
    }
}

/// Radiometric raw16 scene (centikelvin) with a hot blob peaking at the centre.
pub struct MockThermalSource {
    width: u32,
    height: u32,
    fire: Option<(f32, f32)>,
    calibration: RadiometricCalibration,
}

impl MockThermalSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fire: Some(DEFAULT_FIRE_POSITION),
            calibration: RadiometricCalibration::CENTIKELVIN,
        }
    }

    pub fn with_fire_at(mut self, position: Option<(f32, f32)>) -> Self {
        self.fire = position;
        self
    }

    fn render(&self) -> Vec<u16> {
        let mut rng = rand::thread_rng();
        let ambient = self.calibration.to_raw(AMBIENT_C);
        let (width, height) = (self.width as i64, self.height as i64);
        let mut raw: Vec<u16> = (0..width * height)
            .map(|_| ambient.saturating_add(rng.gen_range(0..=THERMAL_NOISE)))
            .collect();

        let Some(position) = self.fire else {
            return raw;
        };
        let (cx, cy) = fire_center(position, self.width, self.height);
        let radius = (width / 40).max(3);
        for y in (cy - radius).max(0)..=(cy + radius).min(height - 1) {
            for x in (cx - radius).max(0)..=(cx + radius).min(width - 1) {
                let distance = (((x - cx).pow(2) + (y - cy).pow(2)) as f32).sqrt();
                if distance > radius as f32 {
                    continue;
                }
                let celsius = FIRE_PEAK_C - distance * FIRE_FALLOFF_C_PER_PX;
                raw[(y * width + x) as usize] = self.calibration.to_raw(celsius);
            }
        }
        raw
    }
}

impl CaptureSource for MockThermalSource {
    fn name(&self) -> &str {
        "mock-thermal"
    }

    fn modality(&self) -> Modality {
        Modality::IrRaw16
    }

    fn capture(&mut self) -> Result<Option<Frame>> {
        let frame = Frame::new(
            Modality::IrRaw16,
            self.width,
            self.height,
            unix_now(),
            PixelData::Gray16(self.render()),
        )?;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_mock_paints_flame_at_centre() -> Result<()> {
        let mut source = MockRgbSource::new(40, 20);
        let frame = source.capture()?.expect("frame");
        let PixelData::Rgb8(pixels) = frame.pixels() else {
            panic!("expected rgb");
        };
        let centre = ((10 * 40 + 20) * 3) as usize;
        assert_eq!(&pixels[centre..centre + 3], &FLAME_RGB);
        assert_eq!(&pixels[0..3], &BACKGROUND_RGB);
        Ok(())
    }

    #[test]
    fn thermal_mock_peaks_at_centre() -> Result<()> {
        let mut source = MockThermalSource::new(160, 120);
        let frame = source.capture()?.expect("frame");
        let PixelData::Gray16(raw) = frame.pixels() else {
            panic!("expected raw16");
        };
        let calibration = RadiometricCalibration::CENTIKELVIN;
        let peak = raw[60 * 160 + 80];
        assert!((calibration.to_celsius(peak) - FIRE_PEAK_C).abs() < 0.1);
        assert!(calibration.to_celsius(raw[0]) < 30.0);
        Ok(())
    }

    #[test]
    fn fire_can_be_removed() -> Result<()> {
        let mut source = MockThermalSource::new(16, 16).with_fire_at(None);
        let frame = source.capture()?.expect("frame");
        let PixelData::Gray16(raw) = frame.pixels() else {
            panic!("expected raw16");
        };
        let calibration = RadiometricCalibration::CENTIKELVIN;
        assert!(raw.iter().all(|&v| calibration.to_celsius(v) < 30.0));
        Ok(())
    }
}
