use anyhow::{anyhow, Result};

use super::HotspotDetector;
use crate::frame::{Frame, PixelData};
use crate::fusion::IrHotspot;

/// Linear raw-to-Celsius conversion.
///
/// The default matches radiometric cores that report centikelvin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RadiometricCalibration {
    pub scale: f32,
    pub offset_c: f32,
}

impl RadiometricCalibration {
    pub const CENTIKELVIN: RadiometricCalibration = RadiometricCalibration {
        scale: 0.01,
        offset_c: -273.15,
    };

    pub fn to_celsius(&self, raw: u16) -> f32 {
        raw as f32 * self.scale + self.offset_c
    }

    pub fn to_raw(&self, celsius: f32) -> u16 {
        ((celsius - self.offset_c) / self.scale)
            .round()
            .clamp(0.0, u16::MAX as f32) as u16
    }
}

impl Default for RadiometricCalibration {
    fn default() -> Self {
        Self::CENTIKELVIN
    }
}

/// Threshold + non-maximum suppression over a raw16 frame.
///
/// Pixels at or above `threshold_c` are candidates. Candidates are taken hottest
/// first and kept only if no kept hotspot lies within `min_separation_px`.
#[derive(Clone, Debug)]
pub struct ThresholdHotspotDetector {
    pub threshold_c: f32,
    pub max_hotspots: usize,
    pub min_separation_px: f32,
    pub calibration: RadiometricCalibration,
}

impl ThresholdHotspotDetector {
    pub fn new(threshold_c: f32) -> Self {
        Self {
            threshold_c,
            max_hotspots: 16,
            min_separation_px: 4.0,
            calibration: RadiometricCalibration::default(),
        }
    }

    pub fn with_limits(mut self, max_hotspots: usize, min_separation_px: f32) -> Self {
        self.max_hotspots = max_hotspots;
        self.min_separation_px = min_separation_px.max(0.0);
        self
    }
}

impl HotspotDetector for ThresholdHotspotDetector {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<IrHotspot>> {
        let PixelData::Gray16(raw) = frame.pixels() else {
            return Err(anyhow!(
                "hotspot detection needs a raw16 frame, got {}",
                frame.modality.as_str()
            ));
        };
        if self.max_hotspots == 0 {
            return Ok(Vec::new());
        }

        let threshold_raw = self.calibration.to_raw(self.threshold_c);
        let width = frame.width as usize;
        let mut candidates: Vec<(usize, u16)> = raw
            .iter()
            .enumerate()
            .filter(|(_, value)| **value >= threshold_raw)
            .map(|(index, value)| (index, *value))
            .collect();
        // Hottest first; ties keep scan order.
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let min_sq = self.min_separation_px * self.min_separation_px;
        let mut hotspots: Vec<IrHotspot> = Vec::new();
        for (index, value) in candidates {
            let x = (index % width) as f32;
            let y = (index / width) as f32;
            let too_close = hotspots.iter().any(|h| {
                let (dx, dy) = (h.x - x, h.y - y);
                dx * dx + dy * dy < min_sq
            });
            if too_close {
                continue;
            }
            hotspots.push(IrHotspot::new(
                x,
                y,
                self.calibration.to_celsius(value),
                value as f32,
            ));
            if hotspots.len() >= self.max_hotspots {
                break;
            }
        }
        Ok(hotspots)
    }
}
