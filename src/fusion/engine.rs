use super::error::FusionError;
use super::mapper::{CoordinateMapper, FovAdjust, FrameSize};
use super::{EoDetection, FireStatus, FusionMatch, FusionResult, IrHotspot};

/// Fuses one IR hotspot list with one EO detection list per call.
///
/// Matching is greedy and per hotspot: each hotspot takes the first EO box (in
/// input order) that contains its mapped position. One box may confirm several
/// hotspots. No state survives between calls.
#[derive(Clone, Copy, Debug)]
pub struct FusionEngine {
    mapper: CoordinateMapper,
}

impl FusionEngine {
    pub fn new(ir_size: FrameSize, rgb_size: FrameSize) -> Result<Self, FusionError> {
        Ok(Self {
            mapper: CoordinateMapper::new(ir_size, rgb_size)?,
        })
    }

    pub fn with_fov(
        ir_size: FrameSize,
        rgb_size: FrameSize,
        fov: FovAdjust,
    ) -> Result<Self, FusionError> {
        Ok(Self {
            mapper: CoordinateMapper::with_fov(ir_size, rgb_size, fov)?,
        })
    }

    pub fn from_mapper(mapper: CoordinateMapper) -> Self {
        Self { mapper }
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    pub fn fuse(&self, ir_hotspots: &[IrHotspot], eo_detections: &[EoDetection]) -> FusionResult {
        if ir_hotspots.is_empty() {
            // Thermal evidence is required; EO boxes are only tallied.
            return FusionResult {
                eo_only_count: eo_detections.len() as u32,
                ..FusionResult::no_fire()
            };
        }

        let mut eo_matched = vec![false; eo_detections.len()];
        let mut matches = Vec::new();
        let mut ir_only_count = 0u32;

        for hotspot in ir_hotspots {
            let (rx, ry) = self.mapper.ir_to_rgb(hotspot.x, hotspot.y);
            let hit = eo_detections
                .iter()
                .position(|detection| detection.contains(rx, ry));
            match hit {
                Some(index) => {
                    eo_matched[index] = true;
                    matches.push(FusionMatch {
                        hotspot: *hotspot,
                        detection: eo_detections[index],
                    });
                }
                None => ir_only_count += 1,
            }
        }

        let confirmed_count = matches.len() as u32;
        let eo_only_count = eo_matched.iter().filter(|matched| !**matched).count() as u32;
        let status = if confirmed_count > 0 {
            FireStatus::FireConfirmed
        } else {
            FireStatus::FireIrOnly
        };

        FusionResult {
            fire_detected: status != FireStatus::NoFire,
            status,
            confirmed_count,
            ir_only_count,
            eo_only_count,
            matches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> FusionEngine {
        FusionEngine::new(FrameSize::new(160, 120), FrameSize::new(960, 540)).unwrap()
    }

    #[test]
    fn both_lists_empty_is_no_fire() {
        let res = engine().fuse(&[], &[]);
        assert_eq!(res, FusionResult::no_fire());
        assert!(!res.fire_detected);
    }

    #[test]
    fn eo_only_never_raises_fire() {
        let eo = [
            EoDetection::new(0.0, 0.0, 100.0, 100.0, 0.9),
            EoDetection::new(500.0, 200.0, 40.0, 40.0, 0.6),
        ];
        let res = engine().fuse(&[], &eo);

        assert!(!res.fire_detected);
        assert_eq!(res.status, FireStatus::NoFire);
        assert_eq!(res.confirmed_count, 0);
        assert_eq!(res.ir_only_count, 0);
        assert_eq!(res.eo_only_count, 2);
        assert!(res.matches.is_empty());
    }

    #[test]
    fn ir_without_eo_is_ir_only() {
        let ir = [
            IrHotspot::new(10.0, 10.0, 100.0, 98.0),
            IrHotspot::new(30.0, 40.0, 95.0, 93.0),
        ];
        let res = engine().fuse(&ir, &[]);

        assert!(res.fire_detected);
        assert_eq!(res.status, FireStatus::FireIrOnly);
        assert_eq!(res.confirmed_count, 0);
        assert_eq!(res.ir_only_count, 2);
    }

    #[test]
    fn centered_box_confirms_hotspot() {
        let engine = engine();
        let hotspot = IrHotspot::new(80.0, 60.0, 120.0, 118.0);
        let (rx, ry) = engine.mapper().ir_to_rgb(hotspot.x, hotspot.y);
        let bbox = EoDetection::new(rx - 10.0, ry - 10.0, 20.0, 20.0, 0.95);

        let res = engine.fuse(&[hotspot], &[bbox]);

        assert!(res.fire_detected);
        assert_eq!(res.status, FireStatus::FireConfirmed);
        assert_eq!(res.confirmed_count, 1);
        assert_eq!(res.ir_only_count, 0);
        assert_eq!(res.eo_only_count, 0);
        assert_eq!(res.matches, vec![FusionMatch { hotspot, detection: bbox }]);
    }

    #[test]
    fn mixed_scene_counts_each_side() {
        // Second hotspot maps to (120, 90).
        let ir = [
            IrHotspot::new(10.0, 10.0, 50.0, 48.0),
            IrHotspot::new(20.0, 20.0, 90.0, 88.0),
        ];
        let eo = [EoDetection::new(100.0, 70.0, 40.0, 40.0, 0.8)];

        let res = engine().fuse(&ir, &eo);

        assert_eq!(res.status, FireStatus::FireConfirmed);
        assert_eq!(res.confirmed_count, 1);
        assert_eq!(res.ir_only_count, 1);
        assert_eq!(res.eo_only_count, 0);
        assert_eq!(res.matches[0].hotspot, ir[1]);
    }

    #[test]
    fn one_box_confirms_several_hotspots() {
        let ir = [
            IrHotspot::new(10.0, 10.0, 90.0, 0.0),
            IrHotspot::new(11.0, 11.0, 91.0, 0.0),
        ];
        let eo = [
            EoDetection::new(0.0, 0.0, 200.0, 200.0, 0.7),
            EoDetection::new(700.0, 400.0, 10.0, 10.0, 0.7),
        ];

        let res = engine().fuse(&ir, &eo);

        assert_eq!(res.confirmed_count, 2);
        assert_eq!(res.eo_only_count, 1);
        assert_eq!(res.matches.len(), 2);
    }

    #[test]
    fn first_containing_box_wins() {
        let ir = [IrHotspot::new(10.0, 10.0, 90.0, 0.0)];
        let eo = [
            EoDetection::new(0.0, 0.0, 30.0, 30.0, 0.2),
            EoDetection::new(50.0, 40.0, 30.0, 30.0, 0.9),
            EoDetection::new(0.0, 0.0, 500.0, 500.0, 0.9),
        ];

        let res = engine().fuse(&ir, &eo);

        assert_eq!(res.matches.len(), 1);
        assert_eq!(res.matches[0].detection, eo[1]);
        assert_eq!(res.eo_only_count, 2);
    }

    #[test]
    fn box_edges_are_inclusive() {
        // (10, 10) maps to (60, 45).
        let ir = [IrHotspot::new(10.0, 10.0, 90.0, 0.0)];
        let eo = [EoDetection::new(60.0, 45.0, 5.0, 5.0, 0.5)];
        assert_eq!(engine().fuse(&ir, &eo).confirmed_count, 1);
    }

    #[test]
    fn degenerate_sizes_rejected() {
        assert!(FusionEngine::new(FrameSize::new(160, 0), FrameSize::new(960, 540)).is_err());
        assert!(FusionEngine::new(FrameSize::new(160, 120), FrameSize::new(0, 540)).is_err());
    }
}
