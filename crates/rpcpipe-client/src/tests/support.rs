//! A scripted peer standing in for a server.

use std::io::{self, BufRead, BufReader, PipeWriter, Write};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use rpcpipe_protocol::handshake::{Implementation, InitializeParams};
use rpcpipe_transport::{FramedLineReader, TracingEvents, TransportEvents};
use serde_json::{Value, json};

use crate::{ClientOptions, ClientSession};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct ScriptedServer {
    inbox: Receiver<Value>,
    output: Option<PipeWriter>,
}

impl ScriptedServer {
    /// Next message the client wrote.
    pub(crate) fn receive(&self) -> Value {
        self.inbox
            .recv_timeout(RECV_TIMEOUT)
            .expect("client message within timeout")
    }

    pub(crate) fn send(&mut self, message: &Value) {
        let output = self.output.as_mut().expect("server output open");
        writeln!(output, "{message}").expect("write to client");
        output.flush().expect("flush to client");
    }

    pub(crate) fn respond(&mut self, id: &Value, result: Value) {
        self.send(&json!({"jsonrpc": "2.0", "id": id, "result": result}));
    }

    pub(crate) fn respond_error(&mut self, id: &Value, code: i64, message: &str) {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message},
        }));
    }

    /// Answers `initialize` and consumes the initialized notification.
    pub(crate) fn accept_handshake(&mut self) {
        let initialize = self.receive();
        assert_eq!(initialize.get("method"), Some(&json!("initialize")));
        let id = initialize.get("id").cloned().expect("initialize id");
        self.respond(
            &id,
            json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "serverInfo": {"name": "scripted", "version": "1.0.0"},
            }),
        );
        let initialized = self.receive();
        assert_eq!(
            initialized.get("method"),
            Some(&json!("notifications/initialized"))
        );
    }

    /// Returns whether the client closed its output within the timeout.
    pub(crate) fn saw_end_of_stream(&self) -> bool {
        matches!(
            self.inbox.recv_timeout(RECV_TIMEOUT),
            Err(mpsc::RecvTimeoutError::Disconnected)
        )
    }

    pub(crate) fn hang_up(&mut self) {
        drop(self.output.take());
    }
}

pub(crate) fn params() -> InitializeParams {
    InitializeParams::new(Implementation::new("tests", "0.0.0"))
}

pub(crate) fn connect(options: ClientOptions) -> (ClientSession, ScriptedServer) {
    connect_with_events(options, Arc::new(TracingEvents))
}

pub(crate) fn connect_with_events(
    options: ClientOptions,
    events: Arc<dyn TransportEvents>,
) -> (ClientSession, ScriptedServer) {
    let (client_input, server_output) = io::pipe().expect("server to client pipe");
    let (server_input, client_output) = io::pipe().expect("client to server pipe");

    let reader = FramedLineReader::new(client_input, options.max_message_bytes());
    let session =
        ClientSession::start(reader, client_output, options, events).expect("session starts");

    let (forward, inbox) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(server_input).lines() {
            let Ok(text) = line else { break };
            let value: Value = serde_json::from_str(&text).expect("client wrote JSON");
            if forward.send(value).is_err() {
                break;
            }
        }
    });

    let server = ScriptedServer {
        inbox,
        output: Some(server_output),
    };
    (session, server)
}

/// Connects and completes the handshake.
pub(crate) fn operational(options: ClientOptions) -> (Arc<ClientSession>, ScriptedServer) {
    let (session, mut server) = connect(options);
    thread::scope(|scope| {
        let handshake = scope.spawn(|| session.initialize(&params()));
        server.accept_handshake();
        handshake
            .join()
            .expect("handshake thread")
            .expect("handshake succeeds");
    });
    (Arc::new(session), server)
}
