//! Error types for fusion construction.

use thiserror::Error;

/// Errors raised while building a fusion engine.
#[derive(Debug, Error)]
pub enum FusionError {
    /// Frame geometry that makes the IR to RGB mapping undefined.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
}

impl FusionError {
    #[must_use]
    pub fn invalid_geometry(reason: impl Into<String>) -> Self {
        Self::InvalidGeometry(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_geometry_message() {
        let err = FusionError::invalid_geometry("ir width is zero");
        assert!(err.to_string().contains("invalid geometry"));
        assert!(err.to_string().contains("ir width is zero"));
    }
}
