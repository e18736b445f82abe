//! Byte-stream plumbing shared by the rpcpipe client and server.
//!
//! A session owns exactly one [`FramedLineReader`] and one
//! [`WriteSerializer`]. The reader turns newline-delimited frames into
//! [`Inbound`] items and signals a [`ReadinessGate`] from inside its read loop
//! the first time it is about to wait for input, so a peer never writes before
//! someone is actually consuming the pipe. Noteworthy conditions that are not
//! errors for the caller are reported through [`TransportEvents`].

mod error;
mod events;
mod framing;
mod gate;
mod writer;

pub use error::TransportError;
pub use events::{CloseReason, TracingEvents, TransportEvents};
pub use framing::{FramedLineReader, Inbound};
pub use gate::ReadinessGate;
pub use writer::WriteSerializer;
