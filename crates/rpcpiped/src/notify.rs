//! Server-to-client notifications.

use rpcpipe_protocol::notifications::{LoggingMessageParams, ProgressParams};
use rpcpipe_protocol::{Message, methods};
use rpcpipe_transport::{TransportError, WriteSerializer};
use serde::Serialize;
use serde_json::Value;

/// Cloneable handle for sending notifications to the client.
///
/// Notifications share the session's write serializer, so they may be sent
/// from any thread, including handlers mid-request, without corrupting
/// responses. Notifications sent through one handle arrive in the order they
/// were sent.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    writer: WriteSerializer,
}

impl NotificationSender {
    /// Wraps the session's write serializer.
    #[must_use]
    pub const fn new(writer: WriteSerializer) -> Self {
        Self { writer }
    }

    /// Sends `method` with `params`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the output pipe is closed or the write
    /// fails.
    pub fn send(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        self.writer.send(&Message::notification(method, params))
    }

    /// Sends `notifications/progress`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if encoding or writing fails.
    pub fn progress(&self, params: &ProgressParams) -> Result<(), TransportError> {
        self.send_typed(methods::PROGRESS, params)
    }

    /// Sends `notifications/message`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if encoding or writing fails.
    pub fn log_message(&self, params: &LoggingMessageParams) -> Result<(), TransportError> {
        self.send_typed(methods::MESSAGE, params)
    }

    fn send_typed(&self, method: &str, params: &impl Serialize) -> Result<(), TransportError> {
        let value = serde_json::to_value(params)
            .map_err(|source| TransportError::Encode(source.into()))?;
        self.send(method, Some(value))
    }
}
