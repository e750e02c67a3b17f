//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Length or count line was negative or not a number
    #[error("malformed length prefix: {0:?}")]
    MalformedLength(String),

    /// Stream ended in the middle of a frame
    #[error("truncated frame: stream ended mid-frame")]
    TruncatedFrame,

    /// Length prefix exceeds the configured limit
    #[error("size limit exceeded: {0}")]
    FrameTooLarge(usize),

    /// Length-prefixed string is not valid UTF-8
    #[error("invalid utf-8 in length-prefixed string")]
    InvalidUtf8,

    /// Data block does not hold a valid request document
    #[error("malformed request document: {0}")]
    MalformedRequest(#[source] serde_json::Error),

    /// Outbound payload is not a valid response document
    #[error("malformed response document: {0}")]
    MalformedResponse(#[source] serde_json::Error),

    /// Response could not be serialized
    #[error("response encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Underlying stream failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Whether this error belongs to the decode family (bad bytes from the host)
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            WireError::MalformedLength(_)
                | WireError::FrameTooLarge(_)
                | WireError::InvalidUtf8
                | WireError::MalformedRequest(_)
                | WireError::MalformedResponse(_)
        )
    }

    /// Map an I/O error raised while a frame is partially read
    pub(crate) fn mid_frame(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            WireError::TruncatedFrame
        } else {
            WireError::Io(err)
        }
    }
}
