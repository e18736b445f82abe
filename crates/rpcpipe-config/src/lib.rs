//! Shared configuration for the rpcpipe client and server.
//!
//! [`Config`] is layered by `ortho_config`: compiled defaults are overridden by
//! a configuration file, then by `RPCPIPE_*` environment variables, then by
//! command-line flags. The transport crates never read the environment
//! themselves; they receive option structs derived from a loaded [`Config`].

mod defaults;
mod logging;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_WORKER_COUNT,
    default_log_filter_string, default_log_format, default_max_message_bytes,
    default_queue_capacity, default_request_timeout_ms, default_shutdown_timeout_ms,
    default_worker_count,
};
pub use logging::LogFormat;

/// Runtime configuration shared by `rpcpiped` and embedding clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "RPCPIPE")]
pub struct Config {
    /// Number of worker threads executing dispatchable requests.
    #[ortho_config(default = default_worker_count())]
    pub worker_count: usize,
    /// Capacity of the bounded work queue feeding the workers.
    #[ortho_config(default = default_queue_capacity())]
    pub queue_capacity: usize,
    /// Grace period, in milliseconds, for draining work at shutdown.
    #[ortho_config(default = default_shutdown_timeout_ms())]
    pub shutdown_timeout_ms: u64,
    /// Largest accepted frame, in bytes, excluding the newline.
    #[ortho_config(default = default_max_message_bytes())]
    pub max_message_bytes: usize,
    /// Client request timeout in milliseconds; `0` waits indefinitely.
    #[ortho_config(default = default_request_timeout_ms())]
    pub request_timeout_ms: u64,
    /// Filter expression passed to `tracing_subscriber::EnvFilter`.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format of the log sink.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            max_message_bytes: default_max_message_bytes(),
            request_timeout_ms: default_request_timeout_ms(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Worker pool size.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Bounded queue capacity.
    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Frame size limit.
    #[must_use]
    pub const fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    /// Client request timeout, or `None` when disabled.
    #[must_use]
    pub const fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.request_timeout_ms))
        }
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Rejects values that would leave the transport unable to make progress.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] when a count, capacity or size limit is
    /// zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("worker_count", self.worker_count),
            ("queue_capacity", self.queue_capacity),
            ("max_message_bytes", self.max_message_bytes),
        ];
        match checks.iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ConfigError::Zero { field: *field }),
            None => Ok(()),
        }
    }
}

/// Semantic validation failures for an otherwise well-formed [`Config`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field that sizes a resource was set to zero.
    #[error("configuration field `{field}` must be greater than zero")]
    Zero {
        /// Name of the offending field.
        field: &'static str,
    },
}
