//! Protocol error types

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame exceeds maximum length
    #[error("Frame too large: exceeds maximum of {max} bytes")]
    FrameTooLarge { max: usize },

    /// Frame is not valid JSON for the expected type
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn from_lines(err: LinesCodecError, max: usize) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => ProtocolError::FrameTooLarge { max },
            LinesCodecError::Io(e) => ProtocolError::Io(e),
        }
    }
}
