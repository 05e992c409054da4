//! Payload encodings layered between framing and JSON.
//!
//! `Legacy` payloads are JSON, optionally zlib-compressed, with no marker: the
//! receiver tries to inflate and falls back to the raw bytes. `Flagged`
//! payloads carry one leading byte saying which of the two it is.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::str::FromStr;

use super::error::ProtocolError;

pub const FLAG_RAW: u8 = 0x00;
pub const FLAG_ZLIB: u8 = 0x01;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    #[default]
    Legacy,
    Flagged,
}

impl PayloadEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadEncoding::Legacy => "legacy",
            PayloadEncoding::Flagged => "flagged",
        }
    }
}

impl FromStr for PayloadEncoding {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(PayloadEncoding::Legacy),
            "flagged" => Ok(PayloadEncoding::Flagged),
            other => Err(format!(
                "unknown payload encoding '{}' (expected legacy or flagged)",
                other
            )),
        }
    }
}

pub fn encode_payload(
    json: &[u8],
    encoding: PayloadEncoding,
    compress: bool,
) -> Result<Vec<u8>, ProtocolError> {
    match (encoding, compress) {
        (PayloadEncoding::Legacy, false) => Ok(json.to_vec()),
        (PayloadEncoding::Legacy, true) => zlib_compress(Vec::new(), json),
        (PayloadEncoding::Flagged, false) => {
            let mut out = Vec::with_capacity(json.len() + 1);
            out.push(FLAG_RAW);
            out.extend_from_slice(json);
            Ok(out)
        }
        (PayloadEncoding::Flagged, true) => zlib_compress(vec![FLAG_ZLIB], json),
    }
}

pub fn decode_payload(
    payload: &[u8],
    encoding: PayloadEncoding,
) -> Result<Vec<u8>, ProtocolError> {
    match encoding {
        PayloadEncoding::Legacy => Ok(zlib_decompress(payload).unwrap_or_else(|_| payload.to_vec())),
        PayloadEncoding::Flagged => match payload.split_first() {
            Some((&FLAG_RAW, body)) => Ok(body.to_vec()),
            Some((&FLAG_ZLIB, body)) => {
                zlib_decompress(body).map_err(|err| ProtocolError::Decompress(err.to_string()))
            }
            Some((&flag, _)) => Err(ProtocolError::UnknownEncoding(flag)),
            None => Err(ProtocolError::Decompress("empty payload".to_string())),
        },
    }
}

fn zlib_compress(prefix: Vec<u8>, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = ZlibEncoder::new(prefix, Compression::fast());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zlib_decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}
