//! Transport error types.

use std::io;

use rpcpipe_protocol::EncodeError;
use thiserror::Error;

/// Failures that end or interrupt use of a pipe.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended part-way through a frame.
    #[error("stream ended inside a frame after {bytes} bytes")]
    Truncated {
        /// Bytes of the unterminated frame.
        bytes: usize,
    },

    /// The write side was closed.
    #[error("transport closed")]
    Closed,

    /// An outbound message could not be serialised.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}
