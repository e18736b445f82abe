//! Server assembly: reader thread, router thread and worker pool.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rpcpipe_config::{
    Config, ConfigError, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_WORKER_COUNT,
};
use rpcpipe_protocol::handshake::Implementation;
use rpcpipe_transport::{
    CloseReason, FramedLineReader, Inbound, ReadinessGate, TracingEvents, TransportError,
    TransportEvents, WriteSerializer,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::handler::HandlerRegistry;
use crate::pool::WorkerPool;
use crate::router::Router;

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// Interval at which the router re-checks the stop flag while idle.
const STOP_POLL: Duration = Duration::from_millis(25);

type Frame = Result<Option<Inbound>, TransportError>;

/// Identity and capabilities advertised in the `initialize` result.
#[derive(Debug, Clone)]
pub(crate) struct ServerIdentity {
    pub(crate) server_info: Implementation,
    pub(crate) capabilities: Map<String, Value>,
    pub(crate) instructions: Option<String>,
}

/// Tunables for a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    worker_count: usize,
    queue_capacity: usize,
    shutdown_timeout: Duration,
    max_message_bytes: usize,
    identity: ServerIdentity,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            identity: ServerIdentity {
                server_info: Implementation::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
                capabilities: Map::new(),
                instructions: None,
            },
        }
    }
}

impl ServerOptions {
    /// Derives options from a loaded [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidOptions`] when a count or size is zero.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|source| ServerError::InvalidOptions { source })?;
        Ok(Self {
            worker_count: config.worker_count(),
            queue_capacity: config.queue_capacity(),
            shutdown_timeout: config.shutdown_timeout(),
            max_message_bytes: config.max_message_bytes(),
            ..Self::default()
        })
    }

    /// Sets the worker pool size.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Sets the work queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Sets the frame size limit.
    #[must_use]
    pub const fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    /// Sets the name and version reported to clients.
    #[must_use]
    pub fn with_server_info(mut self, server_info: Implementation) -> Self {
        self.identity.server_info = server_info;
        self
    }

    /// Sets the capabilities object reported to clients.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Map<String, Value>) -> Self {
        self.identity.capabilities = capabilities;
        self
    }

    /// Sets the usage instructions reported to clients.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.identity.instructions = Some(instructions.into());
        self
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    fn validate(&self) -> Result<(), ServerError> {
        let checks = [
            ("worker_count", self.worker_count),
            ("queue_capacity", self.queue_capacity),
            ("max_message_bytes", self.max_message_bytes),
        ];
        match checks.iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ServerError::InvalidOptions {
                source: ConfigError::Zero { field: *field },
            }),
            None => Ok(()),
        }
    }
}

/// Summary returned once the server has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Why reading stopped.
    pub reason: CloseReason,
    /// Dispatched requests whose responses were written.
    pub completed: usize,
    /// Requests answered with an abandonment error, whether they were queued,
    /// running, or still waiting to be routed when the server stopped.
    pub abandoned: usize,
}

/// Cloneable handle that asks a running server to stop reading.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    /// Requests shutdown; the router notices within a few milliseconds.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Returns whether shutdown was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// JSON-RPC server over a pair of byte streams.
pub struct Server {
    options: ServerOptions,
    registry: Arc<HandlerRegistry>,
    events: Arc<dyn TransportEvents>,
}

impl Server {
    /// Builds a server dispatching to `registry`.
    #[must_use]
    pub fn new(options: ServerOptions, registry: HandlerRegistry) -> Self {
        Self {
            options,
            registry: Arc::new(registry),
            events: Arc::new(TracingEvents),
        }
    }

    /// Replaces the default `tracing` events sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn TransportEvents>) -> Self {
        self.events = events;
        self
    }

    /// Serves until end of stream or stop, then drains outstanding work.
    ///
    /// # Errors
    ///
    /// Returns a [`ServerError`] if the server cannot start or a server thread
    /// panics.
    pub fn listen(
        self,
        input: impl Read + Send + 'static,
        output: impl Write + Send + 'static,
    ) -> Result<ShutdownReport, ServerError> {
        self.start(input, output)?.join()
    }

    /// Starts the reader, router and worker threads and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidOptions`] for zero-sized options and
    /// [`ServerError::Spawn`] if a thread cannot be created.
    pub fn start(
        self,
        input: impl Read + Send + 'static,
        output: impl Write + Send + 'static,
    ) -> Result<RunningServer, ServerError> {
        self.options.validate()?;
        let Self {
            options,
            registry,
            events,
        } = self;

        let writer = WriteSerializer::new(output);
        let gate = ReadinessGate::new();
        let mut reader = FramedLineReader::new(input, options.max_message_bytes);
        reader.arm(gate.clone());

        let pool = WorkerPool::start(
            options.worker_count,
            options.queue_capacity,
            Arc::clone(&registry),
            writer.clone(),
            Arc::clone(&events),
        )?;
        let router = Router::new(
            registry,
            writer.clone(),
            Arc::clone(&events),
            pool,
            Arc::new(options.identity.clone()),
        );

        let stop = StopHandle::default();
        let (frames, inbox) = mpsc::sync_channel(options.queue_capacity);
        let reader_stop = stop.clone();
        let reader_handle = thread::Builder::new()
            .name("rpcpiped-reader".to_owned())
            .spawn(move || run_reader(reader, &frames, &reader_stop))
            .map_err(|source| ServerError::Spawn {
                thread: "reader",
                source,
            })?;

        let loop_state = RouterLoop {
            router,
            inbox,
            stop: stop.clone(),
            events,
            writer,
            grace: options.shutdown_timeout,
        };
        let router_handle = thread::Builder::new()
            .name("rpcpiped-router".to_owned())
            .spawn(move || loop_state.run())
            .map_err(|source| ServerError::Spawn {
                thread: "router",
                source,
            })?;

        Ok(RunningServer {
            gate,
            stop,
            router: router_handle,
            reader: reader_handle,
        })
    }
}

/// Handle to a server started with [`Server::start`].
pub struct RunningServer {
    gate: ReadinessGate,
    stop: StopHandle,
    router: JoinHandle<Result<ShutdownReport, ServerError>>,
    reader: JoinHandle<()>,
}

impl RunningServer {
    /// Blocks for at most `timeout` waiting for the reader.
    #[must_use]
    pub fn wait_ready_timeout(&self, timeout: Duration) -> bool {
        self.gate.wait_timeout(timeout)
    }

    /// Returns a handle that stops the server.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Waits for the server to stop and drain.
    ///
    /// After an explicit stop the reader thread may still be blocked on the
    /// input stream; it is detached and exits when the stream closes.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ThreadPanic`] if a server thread panicked, or
    /// the error that ended the router.
    pub fn join(self) -> Result<ShutdownReport, ServerError> {
        let report = self
            .router
            .join()
            .map_err(|_| ServerError::ThreadPanic { thread: "router" })??;
        if report.reason != CloseReason::Stopped {
            self.reader
                .join()
                .map_err(|_| ServerError::ThreadPanic { thread: "reader" })?;
        }
        Ok(report)
    }
}

/// Forwards frames to the router. After a stop the frame already read is
/// still handed over, then reading ends.
fn run_reader<R: Read>(
    mut reader: FramedLineReader<R>,
    frames: &SyncSender<Frame>,
    stop: &StopHandle,
) {
    loop {
        let frame = reader.read_frame();
        let terminal = !matches!(frame, Ok(Some(_)));
        if frames.send(frame).is_err() || terminal || stop.is_stopped() {
            break;
        }
    }
    debug!(target: SERVER_TARGET, "reader thread finished");
}

struct RouterLoop {
    router: Router,
    inbox: Receiver<Frame>,
    stop: StopHandle,
    events: Arc<dyn TransportEvents>,
    writer: WriteSerializer,
    grace: Duration,
}

impl RouterLoop {
    fn run(mut self) -> Result<ShutdownReport, ServerError> {
        info!(target: SERVER_TARGET, "server listening");
        let reason = self.pump()?;
        let unrouted = if reason == CloseReason::Stopped {
            self.abandon_backlog()
        } else {
            0
        };
        drop(self.inbox);

        let summary = self.router.finish(self.grace);
        let abandoned = summary.abandoned.saturating_add(unrouted);
        self.events.session_closed(reason);
        if let Err(error) = self.writer.close() {
            warn!(target: SERVER_TARGET, error = %error, "failed to close output");
        }
        info!(
            target: SERVER_TARGET,
            reason = %reason,
            completed = summary.completed,
            abandoned,
            "server stopped"
        );
        Ok(ShutdownReport {
            reason,
            completed: summary.completed,
            abandoned,
        })
    }

    /// Answers requests the reader handed over but the router never reached.
    ///
    /// Drains until the reader goes quiet or exits; input still in the pipe
    /// is left unread.
    fn abandon_backlog(&self) -> usize {
        let mut abandoned = 0_usize;
        while let Ok(frame) = self.inbox.recv_timeout(STOP_POLL) {
            let Ok(Some(inbound)) = frame else {
                continue;
            };
            if self.router.abandon(inbound) {
                abandoned = abandoned.saturating_add(1);
            }
        }
        if abandoned > 0 {
            warn!(target: SERVER_TARGET, abandoned, "abandoned unrouted requests after stop");
        }
        abandoned
    }

    fn pump(&mut self) -> Result<CloseReason, ServerError> {
        loop {
            if self.stop.is_stopped() {
                return Ok(CloseReason::Stopped);
            }
            match self.inbox.recv_timeout(STOP_POLL) {
                Ok(Ok(Some(inbound))) => self.router.route(inbound)?,
                Ok(Ok(None)) | Err(RecvTimeoutError::Disconnected) => {
                    return Ok(CloseReason::EndOfStream);
                }
                Ok(Err(TransportError::Truncated { bytes })) => {
                    self.events.truncated(bytes);
                    return Ok(CloseReason::Truncated);
                }
                Ok(Err(error)) => {
                    warn!(target: SERVER_TARGET, error = %error, "reading input failed");
                    return Ok(CloseReason::ReadFailed);
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn options_from_config_copy_tunables() {
        let config = Config {
            worker_count: 2,
            queue_capacity: 3,
            shutdown_timeout_ms: 40,
            ..Config::default()
        };

        let options = ServerOptions::from_config(&config).expect("valid config");

        assert_eq!(options.worker_count, 2);
        assert_eq!(options.queue_capacity, 3);
        assert_eq!(options.shutdown_timeout(), Duration::from_millis(40));
    }

    #[rstest]
    fn zero_workers_are_rejected_at_start() {
        let server = Server::new(
            ServerOptions::default().with_worker_count(0),
            HandlerRegistry::new(),
        );

        let result = server.start(std::io::empty(), std::io::sink());

        assert!(matches!(result, Err(ServerError::InvalidOptions { .. })));
    }
}
