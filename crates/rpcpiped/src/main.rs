//! `rpcpiped` entry point: serves the built-in handlers over stdio.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use rpcpipe_config::Config;
use rpcpiped::shutdown::{self, ShutdownError, SystemShutdownSignal};
use rpcpiped::telemetry::{self, TelemetryError};
use rpcpiped::{RegistryError, Server, ServerError, ServerOptions, ShutdownReport};
use thiserror::Error;
use tracing::{error, info};

const MAIN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::main");

#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load configuration: {0}")]
    Configuration(Arc<OrthoError>),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    #[error(transparent)]
    Server(#[from] ServerError),
}

fn main() -> ExitCode {
    match run() {
        Ok(report) => {
            info!(
                target: MAIN_TARGET,
                reason = %report.reason,
                completed = report.completed,
                abandoned = report.abandoned,
                "rpcpiped exiting"
            );
            ExitCode::SUCCESS
        }
        Err(app_error) => {
            error!(target: MAIN_TARGET, error = %app_error, "rpcpiped failed");
            report_failure(&app_error);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ShutdownReport, AppError> {
    let config = Config::load().map_err(AppError::Configuration)?;
    telemetry::initialise(&config)?;

    let options = ServerOptions::from_config(&config)?;
    let registry = rpcpiped::builtin_registry()?;
    let running = Server::new(options, registry).start(io::stdin(), io::stdout())?;
    shutdown::watch(SystemShutdownSignal::install()?, running.stop_handle())?;

    Ok(running.join()?)
}

#[expect(
    clippy::print_stderr,
    reason = "failures before telemetry is installed must still reach the operator"
)]
fn report_failure(app_error: &AppError) {
    eprintln!("rpcpiped: {app_error}");
}
