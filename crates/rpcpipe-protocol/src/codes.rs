//! Reserved JSON-RPC error codes.

/// The frame was not valid JSON.
pub const PARSE_ERROR: i64 = -32_700;
/// The frame was JSON but not a valid JSON-RPC 2.0 message.
pub const INVALID_REQUEST: i64 = -32_600;
/// No handler is registered for the requested method.
pub const METHOD_NOT_FOUND: i64 = -32_601;
/// The handler rejected its parameters.
pub const INVALID_PARAMS: i64 = -32_602;
/// The handler failed or panicked.
pub const INTERNAL_ERROR: i64 = -32_603;
/// The request was received before the server finished the handshake.
pub const SERVER_NOT_INITIALIZED: i64 = -32_002;
/// The request was still outstanding when the server shut down.
pub const REQUEST_ABANDONED: i64 = -32_001;
