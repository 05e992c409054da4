//! Viewer stream wire protocol.
//!
//! Every message is a 4-byte big-endian length followed by that many payload
//! bytes. Data packets (server to viewer) are JSON documents
//! `{timestamp, images: {key: ImageEntry}, fusion?}` wrapped in a
//! `PayloadEncoding`. Control messages (viewer to server) are plain JSON
//! `{"command": "..."}`, never compressed and never flagged.

mod entry;
mod error;
mod framing;
mod payload;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::control::{ControlCommand, ControlMessage};
use crate::fusion::FusionResult;

pub use self::error::ProtocolError;
pub use self::framing::{read_frame, write_frame, DEFAULT_MAX_PACKET_BYTES, LENGTH_PREFIX_BYTES};
pub use self::entry::{
    ContainerFormat, DecodedImage, ImageEntry, RawImage, RawSamples, DTYPE_UINT16, DTYPE_UINT8,
};
pub use self::payload::{decode_payload, encode_payload, PayloadEncoding, FLAG_RAW, FLAG_ZLIB};

/// Visualised IR frame.
pub const IMAGE_IR: &str = "ir";
/// RGB frame with detections drawn.
pub const IMAGE_RGB_DET: &str = "rgb_det";
/// Full-quality RGB frame, sent while saving.
pub const IMAGE_RGB: &str = "rgb";
/// Raw 16-bit IR frame, sent while saving.
pub const IMAGE_IR16: &str = "ir16";

/// One data message from server to viewer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Unix seconds.
    pub timestamp: f64,
    #[serde(default)]
    pub images: BTreeMap<String, ImageEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fusion: Option<FusionResult>,
}

impl Packet {
    pub fn new(timestamp: f64) -> Self {
        Self {
            timestamp,
            images: BTreeMap::new(),
            fusion: None,
        }
    }

    pub fn with_image(mut self, key: &str, entry: ImageEntry) -> Self {
        self.images.insert(key.to_string(), entry);
        self
    }

    pub fn encode(
        &self,
        encoding: PayloadEncoding,
        compress: bool,
    ) -> Result<Vec<u8>, ProtocolError> {
        let json = serde_json::to_vec(self)?;
        encode_payload(&json, encoding, compress)
    }

    pub fn decode(payload: &[u8], encoding: PayloadEncoding) -> Result<Self, ProtocolError> {
        let json = decode_payload(payload, encoding)?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Decode one image entry. A missing or malformed entry is `None`.
    pub fn decode_image(&self, key: &str) -> Option<DecodedImage> {
        let entry = self.images.get(key)?;
        match entry.decode() {
            Ok(image) => Some(image),
            Err(err) => {
                log::warn!("dropping image entry '{}': {}", key, err);
                None
            }
        }
    }
}

pub fn send_packet<W: Write>(
    writer: &mut W,
    packet: &Packet,
    encoding: PayloadEncoding,
    compress: bool,
    max_packet_bytes: usize,
) -> Result<(), ProtocolError> {
    let payload = packet.encode(encoding, compress)?;
    write_frame(writer, &payload, max_packet_bytes)
}

pub fn recv_packet<R: Read>(
    reader: &mut R,
    encoding: PayloadEncoding,
    max_packet_bytes: usize,
) -> Result<Packet, ProtocolError> {
    let payload = read_frame(reader, max_packet_bytes)?;
    Packet::decode(&payload, encoding)
}

pub fn send_control<W: Write>(
    writer: &mut W,
    command: &ControlCommand,
    max_packet_bytes: usize,
) -> Result<(), ProtocolError> {
    let payload = serde_json::to_vec(&command.to_message())?;
    write_frame(writer, &payload, max_packet_bytes)
}

pub fn recv_control<R: Read>(
    reader: &mut R,
    max_packet_bytes: usize,
) -> Result<ControlCommand, ProtocolError> {
    let payload = read_frame(reader, max_packet_bytes)?;
    let message: ControlMessage = serde_json::from_slice(&payload)?;
    Ok(message.into())
}
