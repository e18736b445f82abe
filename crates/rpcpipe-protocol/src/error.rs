//! Codec error types.

use thiserror::Error;

use crate::codes;
use crate::message::{ErrorObject, RequestId, Response};

/// Failure to turn one frame into a [`Message`](crate::Message).
///
/// The error is scoped to a single line: the reader reports it and carries on
/// with the next frame.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct DecodeError {
    #[source]
    kind: DecodeErrorKind,
    id: Option<RequestId>,
}

/// Classification of a [`DecodeError`].
#[derive(Debug, Error)]
pub enum DecodeErrorKind {
    /// The frame was not valid UTF-8 JSON.
    #[error("invalid JSON: {source}")]
    InvalidJson {
        /// Underlying parser error.
        #[source]
        source: serde_json::Error,
    },
    /// The frame was JSON but violated the JSON-RPC 2.0 envelope.
    #[error("invalid JSON-RPC message: {reason}")]
    InvalidEnvelope {
        /// Description of the violated rule.
        reason: String,
    },
    /// The frame exceeded the configured size limit and was discarded.
    #[error("message exceeds the {limit} byte frame limit")]
    Oversized {
        /// Configured limit in bytes.
        limit: usize,
    },
}

impl DecodeError {
    /// Builds an error for a frame that failed to parse as JSON.
    #[must_use]
    pub const fn invalid_json(source: serde_json::Error) -> Self {
        Self {
            kind: DecodeErrorKind::InvalidJson { source },
            id: None,
        }
    }

    /// Builds an error for a structurally invalid envelope.
    #[must_use]
    pub fn invalid_envelope(reason: impl Into<String>, id: Option<RequestId>) -> Self {
        Self {
            kind: DecodeErrorKind::InvalidEnvelope {
                reason: reason.into(),
            },
            id,
        }
    }

    /// Builds an error for a frame that exceeded `limit` bytes.
    #[must_use]
    pub const fn oversized(limit: usize) -> Self {
        Self {
            kind: DecodeErrorKind::Oversized { limit },
            id: None,
        }
    }

    /// Returns the failure classification.
    #[must_use]
    pub const fn kind(&self) -> &DecodeErrorKind {
        &self.kind
    }

    /// Returns the request identifier recovered from the frame, if any.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    /// JSON-RPC error code matching this failure.
    #[must_use]
    pub const fn code(&self) -> i64 {
        match self.kind {
            DecodeErrorKind::InvalidJson { .. } | DecodeErrorKind::Oversized { .. } => {
                codes::PARSE_ERROR
            }
            DecodeErrorKind::InvalidEnvelope { .. } => codes::INVALID_REQUEST,
        }
    }

    /// Builds the error reply owed to the peer, when the frame named an id.
    #[must_use]
    pub fn to_response(&self) -> Option<Response> {
        self.id.as_ref().map(|id| {
            Response::error(
                Some(id.clone()),
                ErrorObject::new(self.code(), self.to_string()),
            )
        })
    }
}

/// Failure to serialise an outbound [`Message`](crate::Message).
#[derive(Debug, Error)]
#[error("failed to encode JSON-RPC message: {source}")]
pub struct EncodeError {
    #[from]
    source: serde_json::Error,
}
