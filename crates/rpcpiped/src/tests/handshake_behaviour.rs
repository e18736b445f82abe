//! Behavioural tests for the handshake and inline routing.

use std::cell::RefCell;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::{Value, json};

use super::support::{Harness, Recorded, error_code};
use crate::{ServerOptions, builtin_registry};

struct HandshakeWorld {
    harness: Option<Harness>,
    latest: Option<Value>,
}

impl HandshakeWorld {
    fn harness(&mut self) -> &mut Harness {
        self.harness.as_mut().expect("server should be running")
    }

    fn response(&mut self, id: i64) -> Value {
        let (response, _) = self.harness().response_for(id);
        response
    }
}

#[fixture]
fn world() -> RefCell<HandshakeWorld> {
    RefCell::new(HandshakeWorld {
        harness: None,
        latest: None,
    })
}

fn start(world: &RefCell<HandshakeWorld>) {
    let registry = builtin_registry().expect("builtins register");
    let harness = Harness::start(ServerOptions::default(), registry);
    world.borrow_mut().harness = Some(harness);
}

#[given("a running server")]
fn given_running_server(world: &RefCell<HandshakeWorld>) {
    start(world);
}

#[given("an initialized server")]
fn given_initialized_server(world: &RefCell<HandshakeWorld>) {
    start(world);
    world.borrow_mut().harness().handshake();
}

#[when("the client initializes with protocol version \"{version}\"")]
fn when_client_initializes(world: &RefCell<HandshakeWorld>, version: String) {
    let mut state = world.borrow_mut();
    state.harness().initialize(100, &version);
    let response = state.response(100);
    state.latest = Some(response);
}

#[when("the client calls \"{method}\" with id {id}")]
fn when_client_calls(world: &RefCell<HandshakeWorld>, method: String, id: i64) {
    world
        .borrow_mut()
        .harness()
        .request(id, &method, json!({"probe": true}));
}

#[when("the client sends a malformed line")]
fn when_client_sends_malformed(world: &RefCell<HandshakeWorld>) {
    world.borrow_mut().harness().send_raw("{\"jsonrpc\": \"2.0\", \"id\": ");
}

#[when("the client sends a request with id {id} and no method")]
fn when_client_sends_methodless(world: &RefCell<HandshakeWorld>, id: i64) {
    world
        .borrow_mut()
        .harness()
        .send(&json!({"jsonrpc": "2.0", "id": id}));
}

#[then("the response reports protocol version \"{version}\"")]
fn then_protocol_version(world: &RefCell<HandshakeWorld>, version: String) {
    let state = world.borrow();
    let latest = state.latest.as_ref().expect("initialize response");
    let negotiated = latest
        .pointer("/result/protocolVersion")
        .and_then(Value::as_str);
    assert_eq!(negotiated, Some(version.as_str()), "response: {latest}");
}

#[then("the response names the server \"{name}\"")]
fn then_server_name(world: &RefCell<HandshakeWorld>, name: String) {
    let state = world.borrow();
    let latest = state.latest.as_ref().expect("initialize response");
    let server = latest.pointer("/result/serverInfo/name").and_then(Value::as_str);
    assert_eq!(server, Some(name.as_str()));
}

#[then("response {id} carries error code {code}")]
fn then_response_error(world: &RefCell<HandshakeWorld>, id: i64, code: i64) {
    let response = world.borrow_mut().response(id);
    assert_eq!(error_code(&response), Some(code), "response: {response}");
}

#[then("the latest response carries error code {code}")]
fn then_latest_error(world: &RefCell<HandshakeWorld>, code: i64) {
    let state = world.borrow();
    let latest = state.latest.as_ref().expect("a response");
    assert_eq!(error_code(latest), Some(code), "response: {latest}");
}

#[then("response {id} is an empty object")]
fn then_response_empty(world: &RefCell<HandshakeWorld>, id: i64) {
    let response = world.borrow_mut().response(id);
    assert_eq!(response.get("result"), Some(&json!({})), "response: {response}");
}

#[then("one decode error was reported")]
fn then_one_decode_error(world: &RefCell<HandshakeWorld>) {
    let decode_errors = world
        .borrow_mut()
        .harness()
        .events
        .snapshot()
        .into_iter()
        .filter(|entry| matches!(entry, Recorded::DecodeError(_)))
        .count();
    assert_eq!(decode_errors, 1);
}

#[scenario(
    path = "tests/features/server_handshake.feature",
    name = "Initialize negotiates a supported protocol version"
)]
fn initialize_negotiates_version(world: RefCell<HandshakeWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/server_handshake.feature",
    name = "Initialize falls back to the latest protocol version"
)]
fn initialize_falls_back(world: RefCell<HandshakeWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/server_handshake.feature",
    name = "Application requests before the handshake are rejected"
)]
fn early_requests_rejected(world: RefCell<HandshakeWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/server_handshake.feature",
    name = "Ping is answered before the handshake"
)]
fn ping_before_handshake(world: RefCell<HandshakeWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/server_handshake.feature",
    name = "A second initialize is rejected"
)]
fn second_initialize_rejected(world: RefCell<HandshakeWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/server_handshake.feature",
    name = "Unknown methods are reported"
)]
fn unknown_methods_reported(world: RefCell<HandshakeWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/server_handshake.feature",
    name = "Malformed lines do not end the session"
)]
fn malformed_lines_survive(world: RefCell<HandshakeWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/server_handshake.feature",
    name = "Envelope errors with an id are answered"
)]
fn envelope_errors_answered(world: RefCell<HandshakeWorld>) {
    drop(world);
}
