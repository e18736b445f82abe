//! Client for JSON-RPC servers speaking newline-delimited JSON over a pipe
//! pair, such as `rpcpiped`.
//!
//! [`ClientSession`] drives the `initialize` handshake, correlates responses
//! with outstanding calls by id and forwards server notifications.
//! [`ServerProcess`] launches a server as a child process and hands back a
//! session wired to its stdio.

mod error;
mod options;
mod pending;
mod process;
mod session;

pub use error::ClientError;
pub use options::ClientOptions;
pub use process::ServerProcess;
pub use session::{ClientSession, SessionState};

#[cfg(test)]
mod tests;
