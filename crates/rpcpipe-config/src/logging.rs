//! Log output format for the server's stderr stream.
//!
//! Stdout carries protocol frames, so every format here is written to stderr.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How log records are rendered on stderr.
///
/// Parsed case-insensitively from `RPCPIPE_LOG_FORMAT` or the config file.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per record, for hosts that capture the server's stderr.
    #[default]
    Json,
    /// One human-readable line per record, for running the server by hand.
    Compact,
}
