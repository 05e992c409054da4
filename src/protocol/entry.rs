//! Image entries carried inside a packet.
//!
//! `compressed = true` entries hold a standard image container (JPEG, PNG,
//! TIFF). `compressed = false` entries hold a raw little-endian sample buffer
//! described by `dtype` and `shape`, numpy style.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use super::error::ProtocolError;
use crate::frame::{Frame, PixelData};

pub const DTYPE_UINT8: &str = "uint8";
pub const DTYPE_UINT16: &str = "uint16";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageEntry {
    #[serde(default)]
    pub data_b64: String,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
}

/// Container used for `compressed = true` entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerFormat {
    Jpeg { quality: u8 },
    Png,
    Tiff,
}

impl ImageEntry {
    /// Encode a frame into an image container.
    ///
    /// JPEG has no 16-bit mode; raw16 frames are reduced to 8 bits first.
    pub fn encode(frame: &Frame, format: ContainerFormat) -> Result<Self, ProtocolError> {
        let image = frame_to_dynamic(frame)?;
        let mut bytes = Vec::new();
        match format {
            ContainerFormat::Jpeg { quality } => {
                let image = match image {
                    DynamicImage::ImageLuma16(_) => DynamicImage::ImageLuma8(image.to_luma8()),
                    other => other,
                };
                let encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
                image
                    .write_with_encoder(encoder)
                    .map_err(|err| ProtocolError::image_data(err.to_string()))?;
            }
            ContainerFormat::Png => write_container(&image, &mut bytes, ImageFormat::Png)?,
            ContainerFormat::Tiff => write_container(&image, &mut bytes, ImageFormat::Tiff)?,
        }
        Ok(Self {
            data_b64: STANDARD.encode(&bytes),
            compressed: true,
            dtype: None,
            shape: None,
        })
    }

    /// Raw sample buffer with dtype and shape.
    pub fn raw(frame: &Frame) -> Self {
        let h = frame.height as usize;
        let w = frame.width as usize;
        let (dtype, shape, bytes) = match frame.pixels() {
            PixelData::Rgb8(data) => (DTYPE_UINT8, vec![h, w, 3], data.clone()),
            PixelData::Gray8(data) => (DTYPE_UINT8, vec![h, w], data.clone()),
            PixelData::Gray16(data) => (
                DTYPE_UINT16,
                vec![h, w],
                data.iter().flat_map(|v| v.to_le_bytes()).collect(),
            ),
        };
        Self {
            data_b64: STANDARD.encode(bytes),
            compressed: false,
            dtype: Some(dtype.to_string()),
            shape: Some(shape),
        }
    }

    pub fn decode(&self) -> Result<DecodedImage, ProtocolError> {
        if self.data_b64.is_empty() {
            return Err(ProtocolError::image_data("empty data_b64"));
        }
        let bytes = STANDARD
            .decode(self.data_b64.as_bytes())
            .map_err(|err| ProtocolError::image_data(format!("base64: {}", err)))?;

        if self.compressed {
            let image = image::load_from_memory(&bytes)
                .map_err(|err| ProtocolError::image_data(err.to_string()))?;
            return Ok(DecodedImage::Container(image));
        }

        let dtype = self
            .dtype
            .as_deref()
            .ok_or_else(|| ProtocolError::image_data("raw entry without dtype"))?;
        let shape = self.shape.clone().unwrap_or_default();
        let (item_size, big_endian) = parse_dtype(dtype)?;
        let expected = shape
            .iter()
            .try_fold(item_size, |acc, dim| acc.checked_mul(*dim))
            .ok_or_else(|| ProtocolError::image_data("shape overflows"))?;
        if shape.is_empty() || expected != bytes.len() {
            return Err(ProtocolError::image_data(format!(
                "cannot reshape {} bytes of {} into {:?}",
                bytes.len(),
                dtype,
                shape
            )));
        }

        let samples = match item_size {
            1 => RawSamples::U8(bytes),
            _ => RawSamples::U16(
                bytes
                    .chunks_exact(2)
                    .map(|pair| {
                        let pair = [pair[0], pair[1]];
                        if big_endian {
                            u16::from_be_bytes(pair)
                        } else {
                            u16::from_le_bytes(pair)
                        }
                    })
                    .collect(),
            ),
        };
        Ok(DecodedImage::Raw(RawImage { shape, samples }))
    }
}

fn write_container(
    image: &DynamicImage,
    bytes: &mut Vec<u8>,
    format: ImageFormat,
) -> Result<(), ProtocolError> {
    image
        .write_to(&mut Cursor::new(bytes), format)
        .map_err(|err| ProtocolError::image_data(err.to_string()))
}

/// Returns `(bytes per sample, big endian)`.
fn parse_dtype(dtype: &str) -> Result<(usize, bool), ProtocolError> {
    match dtype {
        "uint8" | "u1" | "|u1" | "<u1" => Ok((1, false)),
        "uint16" | "u2" | "<u2" | "=u2" => Ok((2, false)),
        ">u2" => Ok((2, true)),
        other => Err(ProtocolError::image_data(format!(
            "unsupported dtype '{}'",
            other
        ))),
    }
}

fn frame_to_dynamic(frame: &Frame) -> Result<DynamicImage, ProtocolError> {
    let (w, h) = (frame.width, frame.height);
    let image = match frame.pixels() {
        PixelData::Rgb8(data) => RgbImage::from_raw(w, h, data.clone()).map(DynamicImage::ImageRgb8),
        PixelData::Gray8(data) => {
            GrayImage::from_raw(w, h, data.clone()).map(DynamicImage::ImageLuma8)
        }
        PixelData::Gray16(data) => ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w, h, data.clone())
            .map(DynamicImage::ImageLuma16),
    };
    image.ok_or_else(|| ProtocolError::image_data("frame buffer does not match its dimensions"))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawSamples {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

/// Raw samples reshaped per the entry's `shape`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawImage {
    pub shape: Vec<usize>,
    pub samples: RawSamples,
}

impl RawImage {
    /// Interpret `[h, w]` or `[h, w, 3]` buffers as an image.
    pub fn to_dynamic(&self) -> Option<DynamicImage> {
        let (h, w, channels) = match self.shape.as_slice() {
            [h, w] => (*h, *w, 1),
            [h, w, c] => (*h, *w, *c),
            _ => return None,
        };
        let (w, h) = (u32::try_from(w).ok()?, u32::try_from(h).ok()?);
        match (&self.samples, channels) {
            (RawSamples::U8(data), 1) => {
                GrayImage::from_raw(w, h, data.clone()).map(DynamicImage::ImageLuma8)
            }
            (RawSamples::U8(data), 3) => {
                RgbImage::from_raw(w, h, data.clone()).map(DynamicImage::ImageRgb8)
            }
            (RawSamples::U16(data), 1) => {
                ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w, h, data.clone())
                    .map(DynamicImage::ImageLuma16)
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub enum DecodedImage {
    Container(DynamicImage),
    Raw(RawImage),
}

impl DecodedImage {
    pub fn to_dynamic(&self) -> Option<DynamicImage> {
        match self {
            DecodedImage::Container(image) => Some(image.clone()),
            DecodedImage::Raw(raw) => raw.to_dynamic(),
        }
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.to_dynamic().map(|image| (image.width(), image.height()))
    }
}
