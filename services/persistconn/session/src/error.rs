//! Engine error types.

use pconn_wire::WireError;
use thiserror::Error;

/// Fatal engine errors. Handler failures never surface here.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Input stream could not be decoded; the protocol is desynchronized
    #[error("input stream: {0}")]
    Wire(#[from] WireError),

    /// Writing to the output stream failed
    #[error("output stream: {0}")]
    Output(#[source] std::io::Error),

    /// The flusher task stopped unexpectedly
    #[error("flusher task failed: {0}")]
    Flusher(String),
}
