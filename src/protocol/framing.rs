//! Length-prefixed framing: a 4-byte big-endian length, then the payload.
//!
//! A prefix outside `(0, max]` is rejected before any payload byte is read.
//! The stream is then desynchronised and the caller must drop the connection.

use std::io::{ErrorKind, Read, Write};

use super::error::ProtocolError;

pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Default bound on a single payload (4 MiB).
pub const DEFAULT_MAX_PACKET_BYTES: usize = 4 * 1024 * 1024;

pub fn write_frame<W: Write>(
    writer: &mut W,
    payload: &[u8],
    max_packet_bytes: usize,
) -> Result<(), ProtocolError> {
    let len = checked_length(payload.len() as u64, max_packet_bytes)?;
    let mut message = Vec::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    message.extend_from_slice(&len.to_be_bytes());
    message.extend_from_slice(payload);
    writer.write_all(&message)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(
    reader: &mut R,
    max_packet_bytes: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let mut header = [0u8; LENGTH_PREFIX_BYTES];
    read_exact_or_closed(reader, &mut header)?;
    let len = checked_length(u32::from_be_bytes(header) as u64, max_packet_bytes)?;
    let mut payload = vec![0u8; len as usize];
    read_exact_or_closed(reader, &mut payload)?;
    Ok(payload)
}

fn checked_length(len: u64, max_packet_bytes: usize) -> Result<u32, ProtocolError> {
    if len == 0 || len > max_packet_bytes as u64 || len > u32::MAX as u64 {
        return Err(ProtocolError::InvalidLength {
            len,
            max: max_packet_bytes,
        });
    }
    Ok(len as u32)
}

fn read_exact_or_closed<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError> {
    reader.read_exact(buf).map_err(|err| match err.kind() {
        ErrorKind::UnexpectedEof => ProtocolError::PeerClosed,
        _ => ProtocolError::Io(err),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frames_payload_with_big_endian_prefix() {
        let mut out = Vec::new();
        write_frame(&mut out, b"{}", 16).unwrap();
        assert_eq!(out, vec![0, 0, 0, 2, b'{', b'}']);

        let mut cursor = Cursor::new(out);
        assert_eq!(read_frame(&mut cursor, 16).unwrap(), b"{}".to_vec());
    }

    #[test]
    fn zero_length_prefix_rejected_without_consuming_payload() {
        let mut bytes = vec![0, 0, 0, 0];
        bytes.extend_from_slice(b"{\"timestamp\":1}");
        let mut cursor = Cursor::new(bytes);

        let err = read_frame(&mut cursor, 1024).unwrap_err();
        assert!(err.is_desync());
        assert_eq!(cursor.position(), LENGTH_PREFIX_BYTES as u64);
    }

    #[test]
    fn oversize_prefix_rejected_without_consuming_payload() {
        let mut bytes = 17u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[b'x'; 17]);
        let mut cursor = Cursor::new(bytes);

        match read_frame(&mut cursor, 16) {
            Err(ProtocolError::InvalidLength { len, max }) => {
                assert_eq!(len, 17);
                assert_eq!(max, 16);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(cursor.position(), LENGTH_PREFIX_BYTES as u64);
    }

    #[test]
    fn truncated_payload_is_peer_closed() {
        let mut bytes = 10u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let err = read_frame(&mut Cursor::new(bytes), 1024).unwrap_err();
        assert!(matches!(err, ProtocolError::PeerClosed));
    }

    #[test]
    fn truncated_header_is_peer_closed() {
        let err = read_frame(&mut Cursor::new(vec![0u8, 0]), 1024).unwrap_err();
        assert!(matches!(err, ProtocolError::PeerClosed));
    }

    #[test]
    fn writer_refuses_out_of_bounds_payloads() {
        let mut out = Vec::new();
        assert!(write_frame(&mut out, b"", 16).is_err());
        assert!(write_frame(&mut out, &[0u8; 17], 16).is_err());
        assert!(out.is_empty());
    }
}
