//! Image-sequence playback from local files.
//!
//! RGB roles decode to 8-bit RGB. IR roles decode to 16-bit luma, so a 16-bit
//! TIFF/PNG keeps its radiometric values unchanged. Frames whose size differs
//! from the configured camera size are resized.

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use std::path::{Path, PathBuf};

use super::{CaptureSource, SourceRole};
use crate::frame::{unix_now, Frame, Modality, PixelData};
use crate::fusion::FrameSize;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff"];

pub struct ImageSequenceSource {
    role: SourceRole,
    name: String,
    paths: Vec<PathBuf>,
    size: FrameSize,
    looping: bool,
    next: usize,
}

impl ImageSequenceSource {
    /// `paths` lists image files; a single directory entry expands to the
    /// image files inside it, in name order.
    pub fn new(role: SourceRole, paths: Vec<PathBuf>, size: FrameSize, looping: bool) -> Result<Self> {
        let paths = match paths.as_slice() {
            [single] if single.is_dir() => list_images(single)?,
            _ => paths,
        };
        if paths.is_empty() {
            return Err(anyhow!("{} image sequence has no files", role.as_str()));
        }
        if size.is_degenerate() {
            return Err(anyhow!(
                "{} image sequence size must be non-zero",
                role.as_str()
            ));
        }
        log::info!(
            "ImageSequenceSource: {} playing {} file(s){}",
            role.as_str(),
            paths.len(),
            if looping { " in a loop" } else { "" }
        );
        Ok(Self {
            role,
            name: format!("files-{}", role.as_str()),
            paths,
            size,
            looping,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn load(&self, path: &Path) -> Result<Frame> {
        let mut image =
            image::open(path).with_context(|| format!("decode image {}", path.display()))?;
        if image.width() != self.size.width || image.height() != self.size.height {
            image = image.resize_exact(self.size.width, self.size.height, FilterType::Triangle);
        }
        let (modality, pixels) = match self.role {
            SourceRole::Rgb => (Modality::Rgb, PixelData::Rgb8(image.to_rgb8().into_raw())),
            SourceRole::Ir => (
                Modality::IrRaw16,
                PixelData::Gray16(image.to_luma16().into_raw()),
            ),
        };
        Frame::new(
            modality,
            self.size.width,
            self.size.height,
            unix_now(),
            pixels,
        )
    }
}

impl CaptureSource for ImageSequenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn modality(&self) -> Modality {
        self.role.modality()
    }

    fn capture(&mut self) -> Result<Option<Frame>> {
        if self.next >= self.paths.len() {
            if !self.looping {
                return Ok(None);
            }
            self.next = 0;
        }
        let index = self.next;
        // Advance first so one unreadable file cannot stall playback.
        self.next += 1;
        self.load(&self.paths[index]).map(Some)
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("list image directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb};

    fn write_rgb(dir: &Path, name: &str, value: u8) -> PathBuf {
        let path = dir.join(name);
        ImageBuffer::from_pixel(8, 4, Rgb([value, 0, 0]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn plays_sequence_and_stops_without_loop() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = vec![
            write_rgb(dir.path(), "a.png", 10),
            write_rgb(dir.path(), "b.png", 20),
        ];
        let mut source =
            ImageSequenceSource::new(SourceRole::Rgb, paths, FrameSize::new(8, 4), false)?;

        let first = source.capture()?.expect("first frame");
        assert_eq!(first.pixels(), &PixelData::Rgb8([10, 0, 0].repeat(32)));
        assert!(source.capture()?.is_some());
        assert!(source.capture()?.is_none());
        Ok(())
    }

    #[test]
    fn directory_expands_in_name_order_and_loops() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_rgb(dir.path(), "2.png", 2);
        write_rgb(dir.path(), "1.png", 1);
        std::fs::write(dir.path().join("notes.txt"), "skip")?;

        let mut source = ImageSequenceSource::new(
            SourceRole::Rgb,
            vec![dir.path().to_path_buf()],
            FrameSize::new(4, 2),
            true,
        )?;
        assert_eq!(source.len(), 2);

        let values: Vec<u8> = (0..3)
            .map(|_| match source.capture().unwrap().unwrap().pixels() {
                PixelData::Rgb8(pixels) => pixels[0],
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, vec![1, 2, 1]);
        Ok(())
    }

    #[test]
    fn ir_role_keeps_sixteen_bit_values() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ir.png");
        ImageBuffer::<Luma<u16>, Vec<u16>>::from_pixel(4, 3, Luma([42315]))
            .save(&path)?;

        let mut source =
            ImageSequenceSource::new(SourceRole::Ir, vec![path], FrameSize::new(4, 3), false)?;
        let frame = source.capture()?.expect("frame");
        assert_eq!(frame.modality, Modality::IrRaw16);
        assert_eq!(frame.pixels(), &PixelData::Gray16(vec![42315; 12]));
        Ok(())
    }

    #[test]
    fn empty_sequence_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = ImageSequenceSource::new(
            SourceRole::Ir,
            vec![dir.path().to_path_buf()],
            FrameSize::new(4, 3),
            true,
        );
        assert!(result.is_err());
    }
}
