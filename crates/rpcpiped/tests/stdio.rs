//! End-to-end tests for the `rpcpiped` binary over real stdio pipes.

use std::process::Command;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use rpcpipe_client::{ClientOptions, ServerProcess, SessionState};
use rpcpipe_protocol::handshake::{Implementation, InitializeParams};
use serde_json::{Value, json};

const ROUND_TRIPS: usize = 100;

fn params() -> InitializeParams {
    InitializeParams::new(Implementation::new("stdio-tests", "0.0.0"))
}

fn script(lines: &[Value]) -> String {
    lines.iter().map(|line| format!("{line}\n")).collect()
}

#[test]
fn scripted_session_is_answered_and_exits_cleanly() {
    let input = script(&[
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "script", "version": "1"},
        }}),
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        json!({"jsonrpc": "2.0", "id": 2, "method": "echo", "params": {"word": "hello"}}),
        json!({"jsonrpc": "2.0", "id": 3, "method": "ping"}),
    ]);

    let output = cargo_bin_cmd!("rpcpiped")
        .env("RPCPIPE_LOG_FILTER", "off")
        .write_stdin(input)
        .output()
        .expect("run rpcpiped");

    assert!(output.status.success());
    let responses: Vec<Value> = String::from_utf8(output.stdout)
        .expect("utf-8 stdout")
        .lines()
        .map(|line| serde_json::from_str(line).expect("one JSON object per line"))
        .collect();
    let echo = responses
        .iter()
        .find(|line| line.get("id") == Some(&json!(2)))
        .expect("echo response");
    assert_eq!(echo.get("result"), Some(&json!({"word": "hello"})));
    assert_eq!(responses.len(), 3);
}

#[test]
fn invalid_configuration_exits_with_failure() {
    let mut command = cargo_bin_cmd!("rpcpiped");
    command.env("RPCPIPE_WORKER_COUNT", "0");
    command
        .assert()
        .failure()
        .stderr(contains("worker_count"));
}

#[test]
fn repeated_round_trips_keep_ids_distinct() {
    for round in 0..ROUND_TRIPS {
        let mut command = Command::new(env!("CARGO_BIN_EXE_rpcpiped"));
        command.env("RPCPIPE_LOG_FILTER", "off");
        let server =
            ServerProcess::from_command(command, ClientOptions::default()).expect("spawn rpcpiped");
        let session = server.session();

        let result = session.initialize(&params()).expect("initialize");
        assert_eq!(result.server_info.name, "rpcpiped");
        assert_eq!(session.state(), SessionState::Operational);
        session.ping().expect("ping");
        for call in 0..3 {
            let echoed = session
                .request("echo", Some(json!({"round": round, "call": call})))
                .expect("echo");
            assert_eq!(echoed, json!({"round": round, "call": call}));
        }
        assert_eq!(session.pending_requests(), 0);

        let status = server.shutdown().expect("shutdown");
        assert!(status.is_some_and(|exit| exit.success()));
    }
}
