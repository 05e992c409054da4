use anyhow::{anyhow, Result};

use super::EoDetector;
use crate::frame::{Frame, PixelData};
use crate::fusion::EoDetection;

/// Colour heuristic for visible flame.
///
/// The frame is split into square cells; a cell is "hot" when enough of its
/// pixels are flame coloured. 4-connected hot cells merge into one box whose
/// confidence is the flame pixel fraction over the merged cells.
#[derive(Clone, Debug)]
pub struct FlameColorDetector {
    pub cell_size: u32,
    pub min_cell_fraction: f32,
}

impl FlameColorDetector {
    pub fn new() -> Self {
        Self {
            cell_size: 16,
            min_cell_fraction: 0.5,
        }
    }
}

impl Default for FlameColorDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn is_flame(r: u8, g: u8, b: u8) -> bool {
    r >= 180 && (40..=220).contains(&g) && b <= 120 && r > g && g > b
}

impl EoDetector for FlameColorDetector {
    fn name(&self) -> &'static str {
        "flame-color"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<EoDetection>> {
        let PixelData::Rgb8(pixels) = frame.pixels() else {
            return Err(anyhow!(
                "flame detection needs an rgb frame, got {}",
                frame.modality.as_str()
            ));
        };
        let cell = self.cell_size.max(1) as usize;
        let (width, height) = (frame.width as usize, frame.height as usize);
        let cols = width.div_ceil(cell);
        let rows = height.div_ceil(cell);

        // (flame pixels, total pixels) per cell
        let mut counts = vec![(0u32, 0u32); cols * rows];
        for y in 0..height {
            for x in 0..width {
                let offset = (y * width + x) * 3;
                let entry = &mut counts[(y / cell) * cols + x / cell];
                entry.1 += 1;
                if is_flame(pixels[offset], pixels[offset + 1], pixels[offset + 2]) {
                    entry.0 += 1;
                }
            }
        }
        let hot: Vec<bool> = counts
            .iter()
            .map(|&(flame, total)| total > 0 && flame as f32 / total as f32 >= self.min_cell_fraction)
            .collect();

        let mut visited = vec![false; hot.len()];
        let mut detections = Vec::new();
        for start in 0..hot.len() {
            if !hot[start] || visited[start] {
                continue;
            }
            visited[start] = true;
            let mut stack = vec![start];
            let (mut min_c, mut max_c) = (start % cols, start % cols);
            let (mut min_r, mut max_r) = (start / cols, start / cols);
            let (mut flame, mut total) = (0u32, 0u32);

            while let Some(index) = stack.pop() {
                let (c, r) = (index % cols, index / cols);
                min_c = min_c.min(c);
                max_c = max_c.max(c);
                min_r = min_r.min(r);
                max_r = max_r.max(r);
                flame += counts[index].0;
                total += counts[index].1;

                let mut neighbours = Vec::with_capacity(4);
                if c > 0 {
                    neighbours.push(index - 1);
                }
                if c + 1 < cols {
                    neighbours.push(index + 1);
                }
                if r > 0 {
                    neighbours.push(index - cols);
                }
                if r + 1 < rows {
                    neighbours.push(index + cols);
                }
                for next in neighbours {
                    if hot[next] && !visited[next] {
                        visited[next] = true;
                        stack.push(next);
                    }
                }
            }

            let x0 = min_c * cell;
            let y0 = min_r * cell;
            let x1 = ((max_c + 1) * cell).min(width);
            let y1 = ((max_r + 1) * cell).min(height);
            detections.push(EoDetection::new(
                x0 as f32,
                y0 as f32,
                (x1 - x0) as f32,
                (y1 - y0) as f32,
                (flame as f32 / total.max(1) as f32).clamp(0.0, 1.0),
            ));
        }
        Ok(detections)
    }
}

/// EO detector that never reports anything. Fusion then runs IR-only.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullEoDetector;

impl EoDetector for NullEoDetector {
    fn name(&self) -> &'static str {
        "none"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<EoDetection>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Modality;

    fn scene(width: u32, height: u32, flames: &[(u32, u32, u32, u32)]) -> Frame {
        let mut pixels = vec![40u8; (width * height * 3) as usize];
        for &(fx, fy, fw, fh) in flames {
            for y in fy..fy + fh {
                for x in fx..fx + fw {
                    let offset = ((y * width + x) * 3) as usize;
                    pixels[offset..offset + 3].copy_from_slice(&[255, 120, 0]);
                }
            }
        }
        Frame::new(Modality::Rgb, width, height, 0.0, PixelData::Rgb8(pixels)).unwrap()
    }

    #[test]
    fn plain_scene_has_no_detections() {
        let mut detector = FlameColorDetector::new();
        assert!(detector.detect(&scene(64, 48, &[])).unwrap().is_empty());
    }

    #[test]
    fn merges_adjacent_cells_into_one_box() {
        let mut detector = FlameColorDetector::new();
        let detections = detector
            .detect(&scene(64, 48, &[(16, 16, 32, 16), (0, 32, 16, 16)]))
            .unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0], EoDetection::new(16.0, 16.0, 32.0, 16.0, 1.0));
        assert_eq!(detections[1], EoDetection::new(0.0, 32.0, 16.0, 16.0, 1.0));
    }

    #[test]
    fn partial_cells_lower_confidence() {
        let mut detector = FlameColorDetector::new();
        let detections = detector.detect(&scene(32, 16, &[(0, 0, 24, 16)])).unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].width, 32.0);
        assert!((detections[0].confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn null_detector_is_empty() {
        let frame = scene(16, 16, &[(0, 0, 16, 16)]);
        assert!(NullEoDetector.detect(&frame).unwrap().is_empty());
    }
}
