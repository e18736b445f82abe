//! Sink for transport conditions that are reported rather than returned.

use std::fmt;
use std::time::Duration;

use rpcpipe_protocol::{DecodeError, ErrorObject, RequestId};
use tracing::{debug, info, warn};

const EVENTS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::events");

/// Why a session or server stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its end cleanly.
    EndOfStream,
    /// The stream ended inside a frame.
    Truncated,
    /// A local caller asked for shutdown.
    Stopped,
    /// Reading failed with an I/O error.
    ReadFailed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::EndOfStream => "end of stream",
            Self::Truncated => "truncated frame",
            Self::Stopped => "stopped",
            Self::ReadFailed => "read failed",
        };
        f.write_str(label)
    }
}

/// Observer for recoverable transport conditions.
///
/// None of these conditions interrupt the session; implementations must not
/// block for long because they run on the reader, router and worker threads.
pub trait TransportEvents: Send + Sync {
    /// A frame could not be decoded and was skipped.
    fn decode_error(&self, error: &DecodeError);

    /// The stream ended with `bytes` of an unterminated frame buffered.
    fn truncated(&self, bytes: usize);

    /// A response named an id with no pending request.
    fn unknown_response(&self, id: &RequestId);

    /// An error response arrived without an id.
    fn uncorrelated_error(&self, error: &ErrorObject);

    /// A request was still outstanding when the shutdown grace period ended.
    fn work_abandoned(&self, id: &RequestId, method: &str, age: Duration);

    /// The work queue was full and intake is blocking until a slot frees.
    fn queue_saturated(&self, capacity: usize);

    /// Reading stopped.
    fn session_closed(&self, reason: CloseReason);
}

/// [`TransportEvents`] implementation that forwards to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

impl TransportEvents for TracingEvents {
    fn decode_error(&self, error: &DecodeError) {
        warn!(
            target: EVENTS_TARGET,
            error = %error,
            id = error.id().map(ToString::to_string),
            "discarded undecodable frame"
        );
    }

    fn truncated(&self, bytes: usize) {
        warn!(target: EVENTS_TARGET, bytes, "stream ended inside a frame");
    }

    fn unknown_response(&self, id: &RequestId) {
        warn!(target: EVENTS_TARGET, id = %id, "response for unknown request id");
    }

    fn uncorrelated_error(&self, error: &ErrorObject) {
        warn!(
            target: EVENTS_TARGET,
            code = error.code,
            message = %error.message,
            "peer reported an error without a request id"
        );
    }

    fn work_abandoned(&self, id: &RequestId, method: &str, age: Duration) {
        warn!(
            target: EVENTS_TARGET,
            id = %id,
            method,
            age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
            "request abandoned during shutdown"
        );
    }

    fn queue_saturated(&self, capacity: usize) {
        debug!(target: EVENTS_TARGET, capacity, "work queue saturated; applying backpressure");
    }

    fn session_closed(&self, reason: CloseReason) {
        info!(target: EVENTS_TARGET, reason = %reason, "session closed");
    }
}
