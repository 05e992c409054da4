//! IR to RGB pixel coordinate mapping.
//!
//! Independent per-axis linear scaling, `x' = x * W_rgb / W_ir` and
//! `y' = y * H_rgb / H_ir`, optionally followed by a field-of-view scale and
//! offset. This assumes boresight-aligned sensors; it is not a homography.

use serde::{Deserialize, Serialize};

use super::error::FusionError;

/// Frame dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<(u32, u32)> for FrameSize {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Residual field-of-view correction applied after resolution scaling.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FovAdjust {
    pub offset_x: f32,
    pub offset_y: f32,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl FovAdjust {
    pub const IDENTITY: FovAdjust = FovAdjust {
        offset_x: 0.0,
        offset_y: 0.0,
        scale_x: 1.0,
        scale_y: 1.0,
    };

    pub fn validate(&self) -> Result<(), FusionError> {
        for (name, scale) in [("scale_x", self.scale_x), ("scale_y", self.scale_y)] {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(FusionError::invalid_geometry(format!(
                    "fov {} must be finite and positive, got {}",
                    name, scale
                )));
            }
        }
        for (name, offset) in [("offset_x", self.offset_x), ("offset_y", self.offset_y)] {
            if !offset.is_finite() {
                return Err(FusionError::invalid_geometry(format!(
                    "fov {} must be finite",
                    name
                )));
            }
        }
        Ok(())
    }
}

impl Default for FovAdjust {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Stateless IR to RGB mapper, fixed at construction.
#[derive(Clone, Copy, Debug)]
pub struct CoordinateMapper {
    ir_size: FrameSize,
    rgb_size: FrameSize,
    fov: FovAdjust,
}

impl CoordinateMapper {
    pub fn new(ir_size: FrameSize, rgb_size: FrameSize) -> Result<Self, FusionError> {
        Self::with_fov(ir_size, rgb_size, FovAdjust::IDENTITY)
    }

    pub fn with_fov(
        ir_size: FrameSize,
        rgb_size: FrameSize,
        fov: FovAdjust,
    ) -> Result<Self, FusionError> {
        if ir_size.is_degenerate() {
            return Err(FusionError::invalid_geometry(format!(
                "ir frame size {}x{} has a zero dimension",
                ir_size.width, ir_size.height
            )));
        }
        if rgb_size.is_degenerate() {
            return Err(FusionError::invalid_geometry(format!(
                "rgb frame size {}x{} has a zero dimension",
                rgb_size.width, rgb_size.height
            )));
        }
        fov.validate()?;
        Ok(Self {
            ir_size,
            rgb_size,
            fov,
        })
    }

    pub fn ir_size(&self) -> FrameSize {
        self.ir_size
    }

    pub fn rgb_size(&self) -> FrameSize {
        self.rgb_size
    }

    pub fn fov(&self) -> FovAdjust {
        self.fov
    }

    /// Map an IR pixel coordinate into RGB pixel space.
    pub fn ir_to_rgb(&self, x: f32, y: f32) -> (f32, f32) {
        let sx = x as f64 * self.rgb_size.width as f64 / self.ir_size.width as f64;
        let sy = y as f64 * self.rgb_size.height as f64 / self.ir_size.height as f64;
        (
            (sx * self.fov.scale_x as f64 + self.fov.offset_x as f64) as f32,
            (sy * self.fov.scale_y as f64 + self.fov.offset_y as f64) as f32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> CoordinateMapper {
        CoordinateMapper::new(FrameSize::new(160, 120), FrameSize::new(960, 540)).unwrap()
    }

    #[test]
    fn origin_maps_to_origin() {
        assert_eq!(mapper().ir_to_rgb(0.0, 0.0), (0.0, 0.0));
    }

    #[test]
    fn far_corner_maps_to_far_corner() {
        assert_eq!(mapper().ir_to_rgb(160.0, 120.0), (960.0, 540.0));
    }

    #[test]
    fn scales_each_axis_independently() {
        let (x, y) = mapper().ir_to_rgb(20.0, 20.0);
        assert_eq!(x, 120.0);
        assert_eq!(y, 90.0);
    }

    #[test]
    fn zero_dimensions_fail_fast() {
        assert!(CoordinateMapper::new(FrameSize::new(0, 120), FrameSize::new(960, 540)).is_err());
        assert!(CoordinateMapper::new(FrameSize::new(160, 120), FrameSize::new(960, 0)).is_err());
    }

    #[test]
    fn fov_adjust_applies_after_scaling() {
        let fov = FovAdjust {
            offset_x: 10.0,
            offset_y: -5.0,
            scale_x: 0.5,
            scale_y: 2.0,
        };
        let mapper =
            CoordinateMapper::with_fov(FrameSize::new(100, 100), FrameSize::new(200, 200), fov)
                .unwrap();
        assert_eq!(mapper.ir_to_rgb(10.0, 10.0), (20.0, 35.0));
    }

    #[test]
    fn fov_adjust_rejects_bad_scale() {
        let fov = FovAdjust {
            scale_x: 0.0,
            ..FovAdjust::IDENTITY
        };
        assert!(
            CoordinateMapper::with_fov(FrameSize::new(1, 1), FrameSize::new(1, 1), fov).is_err()
        );
        let fov = FovAdjust {
            scale_y: f32::NAN,
            ..FovAdjust::IDENTITY
        };
        assert!(fov.validate().is_err());
    }
}
