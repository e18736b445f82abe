//! Server error types.

use std::io;

use rpcpipe_config::ConfigError;
use thiserror::Error;

/// Errors that stop the server from starting or completing shutdown.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Options failed validation.
    #[error("invalid server options: {source}")]
    InvalidOptions {
        /// Validation failure.
        #[source]
        source: ConfigError,
    },

    /// A server thread could not be spawned.
    #[error("failed to spawn {thread} thread: {source}")]
    Spawn {
        /// Role of the thread.
        thread: &'static str,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A server thread panicked.
    #[error("{thread} thread panicked")]
    ThreadPanic {
        /// Role of the thread.
        thread: &'static str,
    },

    /// The worker queue was closed while submitting work.
    #[error("worker pool is closed")]
    PoolClosed,
}
