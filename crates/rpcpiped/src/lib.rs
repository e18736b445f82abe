//! JSON-RPC server over standard input and output.
//!
//! A [`Server`] owns one reader thread, one router thread and a fixed pool of
//! worker threads. The reader frames newline-delimited messages off the input
//! stream and forwards them over a bounded channel to the router, which
//! classifies each one through a static routing table:
//!
//! - the `initialize` handshake and `ping` are answered inline, in input
//!   order;
//! - requests for methods in the [`HandlerRegistry`] are queued for the worker
//!   pool once the handshake has completed, and may finish out of order;
//! - everything else is answered with a JSON-RPC error or logged.
//!
//! All output, including notifications sent by handlers through their
//! [`RequestContext`], goes through a single write serializer so lines never
//! interleave. On end of stream or an explicit stop the server drains queued
//! and running work for a bounded grace period; anything still outstanding is
//! answered with a `-32001` error and reported through the
//! [`TransportEvents`](rpcpipe_transport::TransportEvents) sink.

mod builtin;
mod error;
mod handler;
mod notify;
mod pool;
mod router;
mod server;
pub mod shutdown;
pub mod telemetry;

pub use builtin::builtin_registry;
pub use error::ServerError;
pub use handler::{HandlerError, HandlerRegistry, RegistryError, RequestContext, RequestHandler};
pub use notify::NotificationSender;
pub use router::{HandshakeState, MessageCategory, classify};
pub use server::{RunningServer, Server, ServerOptions, ShutdownReport, StopHandle};

#[cfg(test)]
mod tests;
