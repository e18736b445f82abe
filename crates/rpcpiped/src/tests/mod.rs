//! Test suites for the stdio server.

mod handshake_behaviour;
mod support;
