//! Server child processes wired to a [`ClientSession`].

use std::ffi::OsStr;
use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::ClientError;
use crate::options::ClientOptions;
use crate::session::ClientSession;

const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// How long a server may take to exit after its input closes.
const EXIT_GRACE: Duration = Duration::from_millis(500);
const EXIT_POLL: Duration = Duration::from_millis(10);

/// A server program running as a child process.
///
/// The child's stdin and stdout carry the session; its stderr is discarded.
pub struct ServerProcess {
    child: Child,
    session: ClientSession,
}

impl ServerProcess {
    /// Spawns `program` with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Launch`] if the program cannot be started and
    /// [`ClientError::Spawn`] if the session cannot start.
    pub fn spawn<I, S>(
        program: impl AsRef<OsStr>,
        args: I,
        options: ClientOptions,
    ) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(program);
        command.args(args);
        Self::from_command(command, options)
    }

    /// Spawns a prepared command, overriding its stdio.
    ///
    /// # Errors
    ///
    /// See [`ServerProcess::spawn`].
    pub fn from_command(mut command: Command, options: ClientOptions) -> Result<Self, ClientError> {
        let program_name = command.get_program().to_string_lossy().into_owned();
        let launch_error = |source: io::Error| ClientError::Launch {
            command: program_name.clone(),
            source,
        };

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(launch_error)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| launch_error(io::Error::other("no stdin pipe")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| launch_error(io::Error::other("no stdout pipe")))?;

        debug!(target: PROCESS_TARGET, command = %program_name, pid = child.id(), "server spawned");
        let session = ClientSession::new(stdout, stdin, options)?;
        Ok(Self { child, session })
    }

    /// Session talking to the child.
    #[must_use]
    pub const fn session(&self) -> &ClientSession {
        &self.session
    }

    /// Process id of the child.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Closes the child's stdin and waits for it to exit, killing it if it
    /// outlives a short grace period.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if flushing stdin fails.
    pub fn shutdown(mut self) -> Result<Option<ExitStatus>, ClientError> {
        self.session.shutdown_output()?;
        let status = terminate_child(&mut self.child);
        self.session.close()?;
        Ok(status)
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            if let Err(error) = self.child.kill() {
                debug!(target: PROCESS_TARGET, error = %error, "failed to kill server");
            }
            if let Err(error) = self.child.wait() {
                debug!(target: PROCESS_TARGET, error = %error, "failed to reap server");
            }
        }
    }
}

fn terminate_child(child: &mut Child) -> Option<ExitStatus> {
    let deadline = Instant::now() + EXIT_GRACE;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(target: PROCESS_TARGET, ?status, "server exited");
                return Some(status);
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
            Ok(None) => break,
            Err(error) => {
                warn!(target: PROCESS_TARGET, error = %error, "failed to check server status");
                break;
            }
        }
    }

    warn!(target: PROCESS_TARGET, grace = ?EXIT_GRACE, "server did not exit; killing");
    if let Err(error) = child.kill() {
        debug!(target: PROCESS_TARGET, error = %error, "failed to kill server");
    }
    child.wait().ok()
}
