//! Shared harness driving a [`Server`] over in-process pipes.

use std::io::{self, BufRead, BufReader, PipeWriter, Write};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rpcpipe_protocol::{DecodeError, ErrorObject, RequestId};
use rpcpipe_transport::{CloseReason, TransportEvents};
use serde_json::{Value, json};

use crate::{HandlerRegistry, RunningServer, Server, ServerOptions, ShutdownReport};

/// How long a test waits for a line before giving up.
pub(crate) const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport condition captured by [`RecordingEvents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Recorded {
    DecodeError(i64),
    Truncated(usize),
    UnknownResponse(RequestId),
    UncorrelatedError(i64),
    WorkAbandoned(RequestId, String),
    QueueSaturated(usize),
    SessionClosed(CloseReason),
}

/// Events sink that keeps every report for later assertions.
#[derive(Debug, Default)]
pub(crate) struct RecordingEvents {
    log: Mutex<Vec<Recorded>>,
}

impl RecordingEvents {
    fn push(&self, entry: Recorded) {
        self.log
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(entry);
    }

    pub(crate) fn snapshot(&self) -> Vec<Recorded> {
        self.log
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }
}

impl TransportEvents for RecordingEvents {
    fn decode_error(&self, error: &DecodeError) {
        self.push(Recorded::DecodeError(error.code()));
    }

    fn truncated(&self, bytes: usize) {
        self.push(Recorded::Truncated(bytes));
    }

    fn unknown_response(&self, id: &RequestId) {
        self.push(Recorded::UnknownResponse(id.clone()));
    }

    fn uncorrelated_error(&self, error: &ErrorObject) {
        self.push(Recorded::UncorrelatedError(error.code));
    }

    fn work_abandoned(&self, id: &RequestId, method: &str, _age: Duration) {
        self.push(Recorded::WorkAbandoned(id.clone(), method.to_owned()));
    }

    fn queue_saturated(&self, capacity: usize) {
        self.push(Recorded::QueueSaturated(capacity));
    }

    fn session_closed(&self, reason: CloseReason) {
        self.push(Recorded::SessionClosed(reason));
    }
}

/// A running server wired to pipes the test controls.
pub(crate) struct Harness {
    input: Option<PipeWriter>,
    output: Receiver<Value>,
    running: Option<RunningServer>,
    pub(crate) events: Arc<RecordingEvents>,
}

impl Harness {
    pub(crate) fn start(options: ServerOptions, registry: HandlerRegistry) -> Self {
        let (server_input, input) = io::pipe().expect("input pipe");
        let (output_reader, server_output) = io::pipe().expect("output pipe");
        let events = Arc::new(RecordingEvents::default());

        let running = Server::new(options, registry)
            .with_events(Arc::clone(&events) as Arc<dyn TransportEvents>)
            .start(server_input, server_output)
            .expect("server starts");
        assert!(running.wait_ready_timeout(RECV_TIMEOUT), "server never became ready");

        let (forward, output) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(output_reader).lines() {
                let Ok(text) = line else { break };
                let value: Value = serde_json::from_str(&text).expect("server wrote JSON");
                if forward.send(value).is_err() {
                    break;
                }
            }
        });

        Self {
            input: Some(input),
            output,
            running: Some(running),
            events,
        }
    }

    pub(crate) fn send_raw(&mut self, line: &str) {
        let input = self.input.as_mut().expect("input still open");
        input.write_all(line.as_bytes()).expect("write line");
        input.write_all(b"\n").expect("write newline");
        input.flush().expect("flush input");
    }

    pub(crate) fn send_raw_unterminated(&mut self, bytes: &str) {
        let input = self.input.as_mut().expect("input still open");
        input.write_all(bytes.as_bytes()).expect("write bytes");
        input.flush().expect("flush input");
    }

    pub(crate) fn send(&mut self, message: &Value) {
        self.send_raw(&message.to_string());
    }

    pub(crate) fn request(&mut self, id: i64, method: &str, params: Value) {
        self.send(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}));
    }

    pub(crate) fn initialize(&mut self, id: i64, protocol_version: &str) {
        self.request(
            id,
            "initialize",
            json!({
                "protocolVersion": protocol_version,
                "capabilities": {},
                "clientInfo": {"name": "harness", "version": "0.0.0"},
            }),
        );
    }

    /// Runs the whole handshake and consumes the `initialize` response.
    pub(crate) fn handshake(&mut self) {
        self.initialize(0, "2025-06-18");
        let response = self.next();
        assert!(response.get("result").is_some(), "initialize failed: {response}");
        self.send(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}));
    }

    pub(crate) fn next(&self) -> Value {
        self.output
            .recv_timeout(RECV_TIMEOUT)
            .expect("server output within timeout")
    }

    pub(crate) fn try_next(&self, timeout: Duration) -> Option<Value> {
        self.output.recv_timeout(timeout).ok()
    }

    /// Reads lines until the response carrying `id` arrives, keeping the
    /// notifications seen on the way.
    pub(crate) fn response_for(&self, id: i64) -> (Value, Vec<Value>) {
        let mut notifications = Vec::new();
        loop {
            let line = self.next();
            if line.get("id").and_then(Value::as_i64) == Some(id) {
                return (line, notifications);
            }
            if line.get("method").is_some() {
                notifications.push(line);
            }
        }
    }

    pub(crate) fn close_input(&mut self) {
        drop(self.input.take());
    }

    pub(crate) fn stop_and_join(&mut self) -> ShutdownReport {
        let running = self.running.take().expect("server still running");
        running.stop_handle().stop();
        running.join().expect("server joins")
    }

    pub(crate) fn join(&mut self) -> ShutdownReport {
        self.close_input();
        self.running
            .take()
            .expect("server still running")
            .join()
            .expect("server joins")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.close_input();
        if let Some(running) = self.running.take() {
            running.stop_handle().stop();
            drop(running.join());
        }
    }
}

/// Extracts `error.code` from a response line.
pub(crate) fn error_code(response: &Value) -> Option<i64> {
    response
        .get("error")
        .and_then(|error| error.get("code"))
        .and_then(Value::as_i64)
}
