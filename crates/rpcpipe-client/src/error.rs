//! Client error types.

use std::io;
use std::time::Duration;

use rpcpipe_config::ConfigError;
use rpcpipe_protocol::ErrorObject;
use rpcpipe_transport::TransportError;
use thiserror::Error;

use crate::session::SessionState;

/// Failures surfaced by a [`ClientSession`](crate::ClientSession).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The call is not permitted in the current handshake state.
    #[error("`{operation}` is not allowed while the session is {state:?}")]
    ProtocolOrder {
        /// Operation that was attempted.
        operation: String,
        /// State the session was in.
        state: SessionState,
    },

    /// The session was terminated before the call was made.
    #[error("session is closed")]
    SessionClosed,

    /// The connection ended while the call was outstanding.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// No response arrived within the configured timeout.
    #[error("`{method}` timed out after {timeout:?}")]
    Timeout {
        /// Method of the abandoned call.
        method: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The server answered with a JSON-RPC error.
    #[error("server returned an error: {0}")]
    Server(#[from] ErrorObject),

    /// Writing to the server failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A result could not be interpreted.
    #[error("malformed `{method}` result: {source}")]
    InvalidResult {
        /// Method whose result was malformed.
        method: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// Options were rejected.
    #[error("invalid client options: {source}")]
    InvalidOptions {
        /// Validation failure.
        #[source]
        source: ConfigError,
    },

    /// The reader thread could not be spawned.
    #[error("failed to spawn reader thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The server process could not be started.
    #[error("failed to start `{command}`: {source}")]
    Launch {
        /// Program that failed to start.
        command: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl ClientError {
    pub(crate) fn protocol_order(operation: &str, state: SessionState) -> Self {
        Self::ProtocolOrder {
            operation: operation.to_owned(),
            state,
        }
    }
}
