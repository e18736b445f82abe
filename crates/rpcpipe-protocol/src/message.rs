//! Message model and the line codec.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::codes;
use crate::error::{DecodeError, EncodeError};

const JSONRPC_VERSION: &str = "2.0";

/// Identifier correlating a request with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer identifier, as allocated by rpcpipe clients.
    Number(i64),
    /// String identifier chosen by a foreign peer.
    String(String),
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::String(value) => write!(f, "\"{value}\""),
        }
    }
}

/// A call that expects exactly one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation identifier; never null.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Structured parameters.
    pub params: Option<Value>,
}

/// A one-way message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name.
    pub method: String,
    /// Structured parameters.
    pub params: Option<Value>,
}

/// The answer to a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Identifier of the answered request; `None` only for uncorrelated errors.
    pub id: Option<RequestId>,
    /// Result value or error object.
    pub outcome: Result<Value, ErrorObject>,
}

impl Response {
    /// Builds a successful response.
    #[must_use]
    pub const fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            outcome: Ok(result),
        }
    }

    /// Builds an error response.
    #[must_use]
    pub const fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }

    /// Consumes the response, yielding its outcome.
    ///
    /// # Errors
    ///
    /// Returns the [`ErrorObject`] when the peer answered with an error.
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        self.outcome
    }
}

/// JSON-RPC error payload.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct ErrorObject {
    /// Numeric error code; see [`crate::codes`].
    pub code: i64,
    /// Human-readable summary.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Builds an error payload without data.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured detail.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// `-32601` for `method`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    /// `-32602` with a description of the problem.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    /// `-32603` with a description of the failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    /// `-32600` with a description of the violated rule.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, message)
    }

    /// `-32002`, sent for application requests before the handshake completes.
    #[must_use]
    pub fn server_not_initialized() -> Self {
        Self::new(codes::SERVER_NOT_INITIALIZED, "server not initialized")
    }

    /// `-32001`, sent for requests still outstanding at shutdown.
    #[must_use]
    pub fn request_abandoned() -> Self {
        Self::new(codes::REQUEST_ABANDONED, "request abandoned during shutdown")
    }
}

/// One JSON-RPC 2.0 frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A call expecting a response.
    Request(Request),
    /// A one-way message.
    Notification(Notification),
    /// A reply to an earlier request.
    Response(Response),
}

#[derive(Serialize)]
struct RequestWire<'a> {
    jsonrpc: &'static str,
    id: &'a RequestId,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

#[derive(Serialize)]
struct NotificationWire<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

#[derive(Serialize)]
struct ResponseWire<'a> {
    jsonrpc: &'static str,
    id: Option<&'a RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorObject>,
}

impl Message {
    /// Builds a request message.
    #[must_use]
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(Request {
            id,
            method: method.into(),
            params,
        })
    }

    /// Builds a notification message.
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    /// Returns the method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(&request.method),
            Self::Notification(notification) => Some(&notification.method),
            Self::Response(_) => None,
        }
    }

    /// Returns the correlation identifier, if the message carries one.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(request) => Some(&request.id),
            Self::Notification(_) => None,
            Self::Response(response) => response.id.as_ref(),
        }
    }

    /// Serialises the message as a single line of JSON without the trailing
    /// newline.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if serialisation fails.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let bytes = match self {
            Self::Request(request) => serde_json::to_vec(&RequestWire {
                jsonrpc: JSONRPC_VERSION,
                id: &request.id,
                method: &request.method,
                params: request.params.as_ref(),
            })?,
            Self::Notification(notification) => serde_json::to_vec(&NotificationWire {
                jsonrpc: JSONRPC_VERSION,
                method: &notification.method,
                params: notification.params.as_ref(),
            })?,
            Self::Response(response) => serde_json::to_vec(&ResponseWire {
                jsonrpc: JSONRPC_VERSION,
                id: response.id.as_ref(),
                result: response.outcome.as_ref().ok(),
                error: response.outcome.as_ref().err(),
            })?,
        };
        Ok(bytes)
    }

    /// Parses and classifies one frame.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] when the frame is not JSON or violates the
    /// JSON-RPC 2.0 envelope. The error keeps the frame's id when it could be
    /// read.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(frame).map_err(DecodeError::invalid_json)?;
        let Value::Object(mut object) = value else {
            return Err(DecodeError::invalid_envelope(
                "message must be a JSON object",
                None,
            ));
        };

        let id = take_id(&mut object)?;
        match object.get("jsonrpc") {
            Some(Value::String(version)) if version == JSONRPC_VERSION => {}
            _ => {
                return Err(DecodeError::invalid_envelope(
                    "\"jsonrpc\" must be \"2.0\"",
                    id.flatten(),
                ));
            }
        }

        match object.remove("method") {
            Some(Value::String(method)) => decode_call(method, id, &mut object),
            Some(_) => Err(DecodeError::invalid_envelope(
                "\"method\" must be a string",
                id.flatten(),
            )),
            None => decode_response(id, &mut object),
        }
    }
}

/// Reads the `id` member: `None` when absent, `Some(None)` when null.
fn take_id(object: &mut Map<String, Value>) -> Result<Option<Option<RequestId>>, DecodeError> {
    match object.remove("id") {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(text)) => Ok(Some(Some(RequestId::String(text)))),
        Some(Value::Number(number)) => number
            .as_i64()
            .map(|value| Some(Some(RequestId::Number(value))))
            .ok_or_else(|| DecodeError::invalid_envelope("\"id\" must be an integer", None)),
        Some(_) => Err(DecodeError::invalid_envelope(
            "\"id\" must be a string, integer or null",
            None,
        )),
    }
}

fn take_params(
    object: &mut Map<String, Value>,
    id: Option<&RequestId>,
) -> Result<Option<Value>, DecodeError> {
    match object.remove("params") {
        None => Ok(None),
        Some(params @ (Value::Object(_) | Value::Array(_))) => Ok(Some(params)),
        Some(_) => Err(DecodeError::invalid_envelope(
            "\"params\" must be an object or array",
            id.cloned(),
        )),
    }
}

fn decode_call(
    method: String,
    id: Option<Option<RequestId>>,
    object: &mut Map<String, Value>,
) -> Result<Message, DecodeError> {
    match id {
        None => Ok(Message::Notification(Notification {
            params: take_params(object, None)?,
            method,
        })),
        Some(None) => Err(DecodeError::invalid_envelope(
            "request \"id\" must not be null",
            None,
        )),
        Some(Some(request_id)) => Ok(Message::Request(Request {
            params: take_params(object, Some(&request_id))?,
            id: request_id,
            method,
        })),
    }
}

fn decode_response(
    id: Option<Option<RequestId>>,
    object: &mut Map<String, Value>,
) -> Result<Message, DecodeError> {
    let Some(response_id) = id else {
        return Err(DecodeError::invalid_envelope(
            "message has neither \"method\" nor \"id\"",
            None,
        ));
    };

    match (object.remove("result"), object.remove("error")) {
        (Some(result), None) => {
            let Some(request_id) = response_id else {
                return Err(DecodeError::invalid_envelope(
                    "successful response must carry an id",
                    None,
                ));
            };
            Ok(Message::Response(Response::success(request_id, result)))
        }
        (None, Some(error)) => {
            let error_object: ErrorObject = serde_json::from_value(error).map_err(|err| {
                DecodeError::invalid_envelope(
                    format!("malformed error object: {err}"),
                    response_id.clone(),
                )
            })?;
            Ok(Message::Response(Response::error(response_id, error_object)))
        }
        (Some(_), Some(_)) => Err(DecodeError::invalid_envelope(
            "response carries both \"result\" and \"error\"",
            response_id,
        )),
        (None, None) => Err(DecodeError::invalid_envelope(
            "response carries neither \"result\" nor \"error\"",
            response_id,
        )),
    }
}
