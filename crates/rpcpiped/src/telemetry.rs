//! Log output for the server process.
//!
//! Stdout is the protocol channel: a single stray byte there corrupts the
//! peer's framing. Every record therefore goes to stderr, which hosts that
//! spawn the server usually capture or discard.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::filter::{EnvFilter, ParseError};
use tracing_subscriber::fmt;

use rpcpipe_config::{Config, LogFormat};

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Errors encountered while installing the stderr subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured `log_filter` is not a valid `EnvFilter` directive.
    #[error("invalid log filter {directive:?}: {source}")]
    Filter {
        /// Directive as configured.
        directive: String,
        /// Parser failure.
        #[source]
        source: ParseError,
    },
    /// Another global subscriber was installed first.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[source] SetGlobalDefaultError),
}

/// Installs the global stderr subscriber once per process.
///
/// Calls after the first successful one do nothing.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparsable filter and
/// [`TelemetryError::Subscriber`] if another subscriber is already installed.
pub fn initialise(config: &Config) -> Result<(), TelemetryError> {
    INSTALLED
        .get_or_try_init(|| {
            let subscriber = stderr_subscriber(config)?;
            tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
        })
        .map(drop)
}

fn parse_filter(directive: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directive).map_err(|source| TelemetryError::Filter {
        directive: directive.to_owned(),
        source,
    })
}

fn stderr_subscriber(
    config: &Config,
) -> Result<Box<dyn Subscriber + Send + Sync>, TelemetryError> {
    let filter = parse_filter(config.log_filter())?;
    // Reader, router and worker threads are named, so the thread name tells
    // which stage of a request produced the record.
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(fmt::time::UtcTime::rfc_3339());

    Ok(match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn rejects_unparsable_filter() {
        let config = Config {
            log_filter: "[[[".to_owned(),
            ..Config::default()
        };

        let result = stderr_subscriber(&config);

        assert!(matches!(
            result,
            Err(TelemetryError::Filter { ref directive, .. }) if directive == "[[["
        ));
    }

    #[rstest]
    #[case::json(LogFormat::Json)]
    #[case::compact(LogFormat::Compact)]
    fn builds_a_subscriber_for_each_format(#[case] log_format: LogFormat) {
        let config = Config {
            log_filter: "rpcpiped=debug,warn".to_owned(),
            log_format,
            ..Config::default()
        };

        assert!(stderr_subscriber(&config).is_ok());
    }
}
