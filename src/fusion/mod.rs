//! IR/RGB detection fusion.
//!
//! Each fusion cycle is independent: a list of IR hotspots and a list of EO
//! (visible-light) boxes go in, a `FusionResult` comes out. IR thermal evidence
//! is required for any positive verdict; EO boxes can only confirm it.

mod engine;
mod error;
mod mapper;

use serde::{Deserialize, Serialize};

pub use engine::FusionEngine;
pub use error::FusionError;
pub use mapper::{CoordinateMapper, FovAdjust, FrameSize};

/// A thermally significant point in IR pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IrHotspot {
    pub x: f32,
    pub y: f32,
    /// Calibrated temperature, already thresholded upstream.
    pub temperature_c: f32,
    /// Uncalibrated sensor reading.
    pub temperature_raw: f32,
}

impl IrHotspot {
    pub fn new(x: f32, y: f32, temperature_c: f32, temperature_raw: f32) -> Self {
        Self {
            x,
            y,
            temperature_c,
            temperature_raw,
        }
    }
}

/// Axis-aligned visible-light detection box in RGB pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EoDetection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
}

impl EoDetection {
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
        }
    }

    /// Closed-interval containment: edges count as inside.
    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }
}

/// Overall verdict of one fusion cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FireStatus {
    #[default]
    NoFire,
    FireIrOnly,
    /// Reserved on the wire. `FusionEngine` never produces it: EO evidence alone
    /// does not raise an alert.
    FireEoOnly,
    FireConfirmed,
}

impl FireStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FireStatus::NoFire => "NO_FIRE",
            FireStatus::FireIrOnly => "FIRE_IR_ONLY",
            FireStatus::FireEoOnly => "FIRE_EO_ONLY",
            FireStatus::FireConfirmed => "FIRE_CONFIRMED",
        }
    }
}

/// A hotspot paired with the first EO box that contained its mapped position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusionMatch {
    pub hotspot: IrHotspot,
    pub detection: EoDetection,
}

/// Result of one fusion cycle. No identity carries over between cycles.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    pub fire_detected: bool,
    pub status: FireStatus,
    pub confirmed_count: u32,
    pub ir_only_count: u32,
    pub eo_only_count: u32,
    pub matches: Vec<FusionMatch>,
}

impl FusionResult {
    pub fn no_fire() -> Self {
        Self::default()
    }
}
