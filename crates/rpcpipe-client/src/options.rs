//! Client tunables.

use std::time::Duration;

use rpcpipe_config::{
    Config, ConfigError, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_REQUEST_TIMEOUT_MS,
};

use crate::error::ClientError;

/// Options for a [`ClientSession`](crate::ClientSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    request_timeout: Option<Duration>,
    max_message_bytes: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS)),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ClientOptions {
    /// Derives options from a loaded [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidOptions`] when the configuration fails
    /// validation.
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        config
            .validate()
            .map_err(|source| ClientError::InvalidOptions { source })?;
        Ok(Self {
            request_timeout: config.request_timeout(),
            max_message_bytes: config.max_message_bytes(),
        })
    }

    /// Sets the per-request timeout; `None` waits indefinitely.
    #[must_use]
    pub const fn with_request_timeout(mut self, request_timeout: Option<Duration>) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Sets the frame size limit for inbound messages.
    #[must_use]
    pub const fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Inbound frame size limit.
    #[must_use]
    pub const fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    pub(crate) const fn validate(&self) -> Result<(), ClientError> {
        if self.max_message_bytes == 0 {
            return Err(ClientError::InvalidOptions {
                source: ConfigError::Zero {
                    field: "max_message_bytes",
                },
            });
        }
        Ok(())
    }
}
