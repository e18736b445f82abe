//! Parameter types for server-to-client notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::RequestId;

/// Token tying progress reports to the request that asked for them.
pub type ProgressToken = RequestId;

/// Parameters of `notifications/progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    /// Token supplied by the requester.
    pub progress_token: ProgressToken,
    /// Work completed so far; increases with every report.
    pub progress: f64,
    /// Total amount of work, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Human-readable status line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Severity of a `notifications/message` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    /// Detailed debugging output.
    Debug,
    /// Informational message.
    Info,
    /// Normal but significant event.
    Notice,
    /// Warning condition.
    Warning,
    /// Error condition.
    Error,
    /// Critical condition.
    Critical,
    /// Action must be taken immediately.
    Alert,
    /// System is unusable.
    Emergency,
}

/// Parameters of `notifications/message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingMessageParams {
    /// Record severity.
    pub level: LoggingLevel,
    /// Name of the emitting component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    /// Arbitrary JSON payload.
    pub data: Value,
}
