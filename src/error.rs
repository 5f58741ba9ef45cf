//! Error types for the colour stream

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    /// The sensor could not bring the colour channel up at the requested mode.
    /// Fatal to the session.
    #[error("colour sensor unavailable: {reason}")]
    SensorUnavailable { reason: String },

    /// A delivered frame does not match the staging buffer. Only that frame is dropped.
    #[error("frame length mismatch: expected {expected} bytes, got {actual}")]
    FrameLengthMismatch { expected: usize, actual: usize },

    #[error("invalid surface write: {reason}")]
    InvalidSurfaceWrite { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] image::ImageError),
}

impl StreamError {
    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        Self::SensorUnavailable {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_write(reason: impl Into<String>) -> Self {
        Self::InvalidSurfaceWrite {
            reason: reason.into(),
        }
    }

    /// Per-frame errors leave the stream running; everything else ends it.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Self::FrameLengthMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_length_mismatch_is_frame_local() {
        let mismatch = StreamError::FrameLengthMismatch {
            expected: 4,
            actual: 3,
        };
        assert!(mismatch.is_frame_local());
        assert!(!StreamError::invalid_write("bad rectangle").is_frame_local());
        assert!(!StreamError::unavailable("unplugged").is_frame_local());
    }
}
