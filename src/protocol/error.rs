//! Error taxonomy for the viewer stream protocol.

use thiserror::Error;

/// Errors raised while framing, encoding or decoding stream messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer closed the connection, possibly mid-message.
    #[error("peer closed the connection")]
    PeerClosed,

    /// Socket level failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Declared length prefix outside `(0, max]`.
    #[error("declared payload length {len} outside (0, {max}]")]
    InvalidLength {
        /// Length found in (or requested for) the prefix.
        len: u64,
        /// Configured upper bound.
        max: usize,
    },

    /// Payload was not the expected JSON document.
    #[error("malformed json payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown leading flag byte in a flagged payload.
    #[error("unknown payload encoding flag 0x{0:02x}")]
    UnknownEncoding(u8),

    /// Payload flagged as compressed did not inflate.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// A single image entry could not be decoded or reshaped.
    #[error("image data error: {0}")]
    ImageData(String),
}

impl ProtocolError {
    #[must_use]
    pub fn image_data(reason: impl Into<String>) -> Self {
        Self::ImageData(reason.into())
    }

    /// The byte stream can no longer be trusted to sit on a message boundary.
    pub fn is_desync(&self) -> bool {
        matches!(self, ProtocolError::InvalidLength { .. })
    }

    /// Connection-level loss; the remedy is to reconnect.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProtocolError::PeerClosed | ProtocolError::Io(_))
    }

    /// A well-framed message with contents that break the contract.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidLength { .. }
                | ProtocolError::Json(_)
                | ProtocolError::UnknownEncoding(_)
                | ProtocolError::Decompress(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        let err = ProtocolError::InvalidLength { len: 0, max: 16 };
        assert!(err.is_desync());
        assert!(err.is_violation());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("outside (0, 16]"));

        assert!(ProtocolError::PeerClosed.is_transient());
        assert!(!ProtocolError::PeerClosed.is_violation());

        let err = ProtocolError::image_data("shape mismatch");
        assert!(!err.is_violation());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("shape mismatch"));
    }
}
