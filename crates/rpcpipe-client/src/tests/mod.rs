//! Test suites for the client session.

mod behaviour;
mod readiness;
mod support;
