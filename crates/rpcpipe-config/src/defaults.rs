use crate::logging::LogFormat;

/// Default number of worker threads serving dispatchable requests.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default capacity of the bounded work queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default grace period granted to queued and in-flight work at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Default upper bound for a single framed message.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Default client-side request timeout. Zero disables the timeout.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default `EnvFilter` directive for the server's stderr log.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default worker count.
pub const fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

/// Default work queue capacity.
pub const fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Default shutdown grace period in milliseconds.
pub const fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

/// Default frame size limit in bytes.
pub const fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

/// Default request timeout in milliseconds.
pub const fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

/// Default log filter, owned for the config field default.
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default stderr log format.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}
