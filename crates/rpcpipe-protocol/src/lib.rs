//! JSON-RPC 2.0 message model for the rpcpipe stdio transport.
//!
//! Every frame on the wire is one [`Message`]: a request, a notification or a
//! response. [`Message::decode`] validates the `"jsonrpc": "2.0"` envelope and
//! classifies the frame; failures are reported as a [`DecodeError`] which keeps
//! the request identifier whenever one could be recovered so the peer can
//! still be answered. The [`handshake`] module carries the payloads exchanged
//! during `initialize`, and [`codes`] and [`methods`] name the reserved error
//! codes and method names.

pub mod codes;
mod error;
pub mod handshake;
mod message;
pub mod methods;
pub mod notifications;

pub use error::{DecodeError, DecodeErrorKind, EncodeError};
pub use message::{ErrorObject, Message, Notification, Request, RequestId, Response};
