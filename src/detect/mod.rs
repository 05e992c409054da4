//! Per-frame detection feeding the fusion stage.
//!
//! Real deployments plug trained models in behind these traits. The bundled
//! implementations are simple heuristics so the pipeline runs end to end.

mod flame;
mod thermal;

use anyhow::Result;

use crate::frame::Frame;
use crate::fusion::{EoDetection, IrHotspot};

pub use flame::{FlameColorDetector, NullEoDetector};
pub use thermal::{RadiometricCalibration, ThresholdHotspotDetector};

/// Extracts thermal hotspots from a raw16 IR frame.
///
/// Returned hotspots are already filtered; fusion does not re-threshold.
pub trait HotspotDetector: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<IrHotspot>>;
}

/// Produces visible-light fire/smoke boxes from an RGB frame.
pub trait EoDetector: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<EoDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
