//! The first write of a session never happens before the reader reaches its
//! first read.

use std::io::{self, BufRead, BufReader, PipeWriter, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use rpcpipe_transport::{FramedLineReader, TracingEvents};
use rstest::rstest;
use serde_json::{Value, json};

use super::support::params;
use crate::{ClientOptions, ClientSession, SessionState};

const TRIALS: usize = 200;

struct CheckedOutput {
    checkpoint: Arc<AtomicBool>,
    early: Arc<AtomicBool>,
    inner: PipeWriter,
}

impl Write for CheckedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.checkpoint.load(Ordering::SeqCst) {
            self.early.store(true, Ordering::SeqCst);
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn answer_first_request(server_input: io::PipeReader, mut server_output: PipeWriter) {
    let mut lines = BufReader::new(server_input).lines();
    let Some(Ok(first)) = lines.next() else {
        return;
    };
    let request: Value = serde_json::from_str(&first).expect("initialize line");
    let reply = json!({
        "jsonrpc": "2.0",
        "id": request.get("id").cloned().unwrap_or(Value::Null),
        "result": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "serverInfo": {"name": "trial", "version": "0"},
        },
    });
    writeln!(server_output, "{reply}").expect("reply");
    server_output.flush().expect("flush reply");
    // Drain the initialized notification, if any, before hanging up.
    drop(lines.next());
}

fn run_trial(first_call: FirstCall) -> bool {
    let (client_input, server_output) = io::pipe().expect("pipe");
    let (server_input, client_output) = io::pipe().expect("pipe");
    let checkpoint = Arc::new(AtomicBool::new(false));
    let early = Arc::new(AtomicBool::new(false));

    let mut reader = FramedLineReader::new(client_input, 1024);
    let hook_checkpoint = Arc::clone(&checkpoint);
    reader.on_idle(move || hook_checkpoint.store(true, Ordering::SeqCst));
    let output = CheckedOutput {
        checkpoint,
        early: Arc::clone(&early),
        inner: client_output,
    };
    let session = ClientSession::start(
        reader,
        output,
        ClientOptions::default(),
        Arc::new(TracingEvents),
    )
    .expect("session starts");

    let peer = thread::spawn(move || answer_first_request(server_input, server_output));
    match first_call {
        FirstCall::Initialize => {
            session.initialize(&params()).expect("handshake");
            assert_eq!(session.state(), SessionState::Operational);
        }
        FirstCall::Ping => {
            session.ping().expect("pong");
            assert_eq!(session.state(), SessionState::Uninitialized);
        }
    }
    session.close().expect("close");
    peer.join().expect("peer thread");

    early.load(Ordering::SeqCst)
}

#[derive(Debug, Clone, Copy)]
enum FirstCall {
    Initialize,
    Ping,
}

#[rstest]
#[case::initialize(FirstCall::Initialize)]
#[case::ping(FirstCall::Ping)]
fn first_write_waits_for_the_reader_checkpoint(#[case] first_call: FirstCall) {
    let early_writes = (0..TRIALS).filter(|_| run_trial(first_call)).count();

    assert_eq!(early_writes, 0);
}
