//! Client side of a stdio JSON-RPC session.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use rpcpipe_protocol::handshake::{InitializeParams, InitializeResult};
use rpcpipe_protocol::{ErrorObject, Message, Notification, Request, RequestId, Response, methods};
use rpcpipe_transport::{
    CloseReason, FramedLineReader, Inbound, ReadinessGate, TracingEvents, TransportError,
    TransportEvents, WriteSerializer,
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::options::ClientOptions;
use crate::pending::PendingTable;

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Handshake progress of a [`ClientSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `initialize` has not been sent, or it failed.
    Uninitialized,
    /// `initialize` is in flight.
    Initializing,
    /// The server answered `initialize`; the initialized notification is
    /// being sent.
    CapabilitiesExchanged,
    /// Application requests and notifications are allowed.
    Operational,
    /// The connection ended or the session was closed.
    Terminated,
}

struct Shared {
    pending: PendingTable,
    state: Mutex<SessionState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Moves to `next` unless the session has already terminated.
    fn advance(&self, next: SessionState) {
        let mut state = self.state();
        if *state != SessionState::Terminated {
            *state = next;
        }
    }

    fn terminate(&self) -> usize {
        *self.state() = SessionState::Terminated;
        self.pending.close()
    }
}

/// A JSON-RPC session over a pair of byte streams.
///
/// A background reader thread owns the input stream and completes pending
/// calls as responses arrive, so any number of threads may call
/// [`ClientSession::request`] concurrently through a shared reference and
/// responses may arrive in any order. All output goes through one
/// [`WriteSerializer`].
pub struct ClientSession {
    shared: Arc<Shared>,
    writer: WriteSerializer,
    gate: ReadinessGate,
    next_id: AtomicI64,
    options: ClientOptions,
    notifications: Mutex<Option<Receiver<Notification>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ClientSession {
    /// Starts a session reading `input` and writing `output`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidOptions`] for a zero frame limit and
    /// [`ClientError::Spawn`] if the reader thread cannot start.
    pub fn new(
        input: impl Read + Send + 'static,
        output: impl Write + Send + 'static,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        options.validate()?;
        let reader = FramedLineReader::new(input, options.max_message_bytes());
        Self::start(reader, output, options, Arc::new(TracingEvents))
    }

    /// Starts a session around a prepared reader.
    ///
    /// Idle hooks already registered on `reader` run before the session's
    /// readiness gate is signalled.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Spawn`] if the reader thread cannot start.
    pub fn start<R: Read + Send + 'static>(
        mut reader: FramedLineReader<R>,
        output: impl Write + Send + 'static,
        options: ClientOptions,
        events: Arc<dyn TransportEvents>,
    ) -> Result<Self, ClientError> {
        let gate = ReadinessGate::new();
        reader.arm(gate.clone());

        let shared = Arc::new(Shared {
            pending: PendingTable::default(),
            state: Mutex::new(SessionState::Uninitialized),
        });
        let writer = WriteSerializer::new(output);
        let (forward, notifications) = mpsc::channel();

        let reader_loop = ReaderLoop {
            shared: Arc::clone(&shared),
            writer: writer.clone(),
            notifications: forward,
            events,
        };
        let handle = thread::Builder::new()
            .name("rpcpipe-client-reader".to_owned())
            .spawn(move || reader_loop.run(reader))
            .map_err(|source| ClientError::Spawn { source })?;

        Ok(Self {
            shared,
            writer,
            gate,
            next_id: AtomicI64::new(1),
            options,
            notifications: Mutex::new(Some(notifications)),
            reader: Mutex::new(Some(handle)),
        })
    }

    /// Current handshake state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state()
    }

    /// Performs the `initialize` handshake.
    ///
    /// Waits until the reader is consuming input, sends `initialize`, and on
    /// success sends `notifications/initialized` and becomes
    /// [`SessionState::Operational`]. A failed handshake returns the session
    /// to [`SessionState::Uninitialized`] so it may be retried.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ProtocolOrder`] unless the session is
    /// uninitialized, [`ClientError::Server`] when the server rejects the
    /// request, and the errors of [`ClientSession::request`] otherwise.
    pub fn initialize(&self, params: &InitializeParams) -> Result<InitializeResult, ClientError> {
        self.begin_handshake()?;
        self.gate.wait();

        let result = serde_json::to_value(params)
            .map_err(|source| ClientError::InvalidResult {
                method: methods::INITIALIZE.to_owned(),
                source,
            })
            .and_then(|value| self.call(methods::INITIALIZE, Some(value)))
            .and_then(|value| {
                serde_json::from_value::<InitializeResult>(value).map_err(|source| {
                    ClientError::InvalidResult {
                        method: methods::INITIALIZE.to_owned(),
                        source,
                    }
                })
            });
        let accepted = match result {
            Ok(accepted) => accepted,
            Err(error) => {
                self.shared.advance(SessionState::Uninitialized);
                return Err(error);
            }
        };

        self.shared.advance(SessionState::CapabilitiesExchanged);
        if let Err(error) = self
            .writer
            .send(&Message::notification(methods::INITIALIZED, None))
        {
            // The server is waiting for a notification that cannot be sent.
            self.shared.terminate();
            warn!(target: SESSION_TARGET, error = %error, "failed to complete handshake");
            return Err(error.into());
        }
        self.shared.advance(SessionState::Operational);
        info!(
            target: SESSION_TARGET,
            server = %accepted.server_info.name,
            server_version = %accepted.server_info.version,
            protocol_version = %accepted.protocol_version,
            "session operational"
        );
        Ok(accepted)
    }

    /// Sends a request and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ProtocolOrder`] before the handshake completes,
    /// [`ClientError::SessionClosed`] once terminated,
    /// [`ClientError::ConnectionClosed`] if the stream ends while waiting,
    /// [`ClientError::Timeout`] when the configured timeout elapses and
    /// [`ClientError::Server`] for error responses.
    pub fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        self.require_operational(method)?;
        self.call(method, params)
    }

    /// Sends `ping`; allowed in every state except terminated.
    ///
    /// Like [`ClientSession::initialize`], waits until the reader is
    /// consuming input before writing.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SessionClosed`] once terminated, otherwise the
    /// errors of [`ClientSession::request`].
    pub fn ping(&self) -> Result<(), ClientError> {
        if self.state() == SessionState::Terminated {
            return Err(ClientError::SessionClosed);
        }
        self.gate.wait();
        self.call(methods::PING, None).map(drop)
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ProtocolOrder`] before the handshake completes,
    /// [`ClientError::SessionClosed`] once terminated and
    /// [`ClientError::Transport`] if the write fails.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        self.require_operational(method)?;
        self.writer.send(&Message::notification(method, params))?;
        Ok(())
    }

    /// Takes the channel carrying notifications sent by the server.
    ///
    /// Returns `None` after the first call. Notifications are buffered until
    /// the receiver is taken and dropped once it is gone.
    pub fn take_notifications(&self) -> Option<Receiver<Notification>> {
        self.notifications
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take()
    }

    /// Number of calls waiting for a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Terminates the session and closes the output stream.
    ///
    /// Outstanding calls fail with [`ClientError::ConnectionClosed`]. The
    /// reader thread keeps running until the peer closes its end; see
    /// [`ClientSession::close`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if flushing the output fails.
    pub fn shutdown_output(&self) -> Result<(), ClientError> {
        let failed = self.shared.terminate();
        if failed > 0 {
            debug!(target: SESSION_TARGET, failed, "failed outstanding calls at close");
        }
        self.writer.close()?;
        Ok(())
    }

    /// Terminates the session, closes the output stream and waits for the
    /// reader thread, which exits once the peer closes its output.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if flushing the output fails.
    pub fn close(&self) -> Result<(), ClientError> {
        self.shutdown_output()?;
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        if let Some(reader) = handle {
            if reader.join().is_err() {
                warn!(target: SESSION_TARGET, "reader thread panicked");
            }
        }
        Ok(())
    }

    fn begin_handshake(&self) -> Result<(), ClientError> {
        let mut state = self.shared.state();
        match *state {
            SessionState::Uninitialized => {
                *state = SessionState::Initializing;
                Ok(())
            }
            SessionState::Terminated => Err(ClientError::SessionClosed),
            other => Err(ClientError::protocol_order(methods::INITIALIZE, other)),
        }
    }

    fn require_operational(&self, operation: &str) -> Result<(), ClientError> {
        match self.state() {
            SessionState::Operational => Ok(()),
            SessionState::Terminated => Err(ClientError::SessionClosed),
            other => Err(ClientError::protocol_order(operation, other)),
        }
    }

    fn call(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = self.shared.pending.insert(id.clone())?;
        let request = Message::Request(Request {
            id: id.clone(),
            method: method.to_owned(),
            params,
        });
        if let Err(error) = self.writer.send(&request) {
            self.shared.pending.remove(&id);
            return Err(error.into());
        }
        debug!(target: SESSION_TARGET, id = %id, method, "request sent");

        let outcome = match self.options.request_timeout() {
            Some(timeout) => match slot.recv_timeout(timeout) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => {
                    self.shared.pending.remove(&id);
                    warn!(target: SESSION_TARGET, id = %id, method, ?timeout, "request timed out");
                    return Err(ClientError::Timeout {
                        method: method.to_owned(),
                        timeout,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => return Err(ClientError::ConnectionClosed),
            },
            None => slot.recv().map_err(|_| ClientError::ConnectionClosed)?,
        };
        Ok(outcome?)
    }
}

impl Drop for ClientSession {
    /// Closes the output so the peer sees end of stream. The reader thread is
    /// not joined; it exits once the peer closes its side.
    fn drop(&mut self) {
        self.shared.terminate();
        if let Err(error) = self.writer.close() {
            debug!(target: SESSION_TARGET, error = %error, "failed to close output on drop");
        }
    }
}

struct ReaderLoop {
    shared: Arc<Shared>,
    writer: WriteSerializer,
    notifications: Sender<Notification>,
    events: Arc<dyn TransportEvents>,
}

impl ReaderLoop {
    fn run<R: Read>(self, mut reader: FramedLineReader<R>) {
        let reason = loop {
            match reader.read_frame() {
                Ok(Some(inbound)) => self.dispatch(inbound),
                Ok(None) => break CloseReason::EndOfStream,
                Err(TransportError::Truncated { bytes }) => {
                    self.events.truncated(bytes);
                    break CloseReason::Truncated;
                }
                Err(error) => {
                    warn!(target: SESSION_TARGET, error = %error, "reading from server failed");
                    break CloseReason::ReadFailed;
                }
            }
        };

        let failed = self.shared.terminate();
        if failed > 0 {
            warn!(target: SESSION_TARGET, failed, "connection closed with calls outstanding");
        }
        self.events.session_closed(reason);
    }

    fn dispatch(&self, inbound: Inbound) {
        match inbound {
            Inbound::Message(Message::Response(response)) => self.deliver(response),
            Inbound::Message(Message::Notification(notification)) => {
                if self.notifications.send(notification).is_err() {
                    debug!(target: SESSION_TARGET, "notification dropped; receiver gone");
                }
            }
            Inbound::Message(Message::Request(request)) => self.answer(request),
            Inbound::Malformed(error) => {
                if let Some(id) = error.id() {
                    let failure = ErrorObject::new(error.code(), error.to_string());
                    if self.shared.pending.resolve(id, Err(failure)) {
                        debug!(target: SESSION_TARGET, id = %id, "failed call with undecodable response");
                    }
                }
                self.events.decode_error(&error);
            }
        }
    }

    fn deliver(&self, response: Response) {
        let Response { id, outcome } = response;
        let Some(request_id) = id else {
            match outcome {
                Err(error) => self.events.uncorrelated_error(&error),
                Ok(_) => debug!(target: SESSION_TARGET, "ignoring response without id"),
            }
            return;
        };
        if !self.shared.pending.resolve(&request_id, outcome) {
            self.events.unknown_response(&request_id);
        }
    }

    fn answer(&self, request: Request) {
        let reply = if request.method == methods::PING {
            Response::success(request.id, json!({}))
        } else {
            Response::error(
                Some(request.id),
                ErrorObject::method_not_found(&request.method),
            )
        };
        if let Err(error) = self.writer.send(&Message::Response(reply)) {
            debug!(target: SESSION_TARGET, error = %error, "could not answer server request");
        }
    }
}
