//! Method names with transport-level meaning.

/// Opens the handshake; the only request accepted before initialisation.
pub const INITIALIZE: &str = "initialize";
/// Completes the handshake from the client side.
pub const INITIALIZED: &str = "notifications/initialized";
/// Pre-2025 spelling of [`INITIALIZED`], still accepted by the server.
pub const LEGACY_INITIALIZED: &str = "initialized";
/// Liveness probe, valid in every session state.
pub const PING: &str = "ping";
/// Progress report for a long-running request.
pub const PROGRESS: &str = "notifications/progress";
/// Log record forwarded from the server.
pub const MESSAGE: &str = "notifications/message";
