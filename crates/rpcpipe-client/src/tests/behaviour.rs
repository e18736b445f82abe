//! Behavioural tests for the client session lifecycle.

use std::cell::RefCell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::Value;

use super::support::{ScriptedServer, connect, operational, params};
use crate::{ClientError, ClientOptions, ClientSession};

type Call = JoinHandle<Result<Value, ClientError>>;

#[derive(Default)]
struct SessionWorld {
    session: Option<Arc<ClientSession>>,
    server: Option<ScriptedServer>,
    last_error: Option<ClientError>,
    calls: Vec<Call>,
}

impl SessionWorld {
    fn session(&self) -> Arc<ClientSession> {
        Arc::clone(self.session.as_ref().expect("session should be connected"))
    }

    fn server(&mut self) -> &mut ScriptedServer {
        self.server.as_mut().expect("server should be connected")
    }
}

#[fixture]
fn world() -> RefCell<SessionWorld> {
    RefCell::new(SessionWorld::default())
}

#[given("a connected client session")]
fn given_connected(world: &RefCell<SessionWorld>) {
    let (session, server) = connect(ClientOptions::default());
    let mut state = world.borrow_mut();
    state.session = Some(Arc::new(session));
    state.server = Some(server);
}

#[given("an operational client session")]
fn given_operational(world: &RefCell<SessionWorld>) {
    let (session, server) = operational(ClientOptions::default());
    let mut state = world.borrow_mut();
    state.session = Some(session);
    state.server = Some(server);
}

#[when("the client requests \"{method}\"")]
fn when_client_requests(world: &RefCell<SessionWorld>, method: String) {
    let session = world.borrow().session();
    let outcome = session.request(&method, None);
    world.borrow_mut().last_error = outcome.err();
}

#[when("the server accepts the handshake")]
fn when_server_accepts(world: &RefCell<SessionWorld>) {
    let session = world.borrow().session();
    let handshake = thread::spawn(move || session.initialize(&params()).map(drop));
    world.borrow_mut().server().accept_handshake();
    handshake
        .join()
        .expect("handshake thread")
        .expect("handshake succeeds");
}

#[when("{count} calls are outstanding")]
fn when_calls_outstanding(world: &RefCell<SessionWorld>, count: usize) {
    let session = world.borrow().session();
    let calls: Vec<Call> = (0..count)
        .map(|_| {
            let caller = Arc::clone(&session);
            thread::spawn(move || caller.request("slow", None))
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(5);
    while session.pending_requests() < count {
        assert!(Instant::now() < deadline, "calls never became pending");
        thread::sleep(Duration::from_millis(5));
    }
    world.borrow_mut().calls = calls;
}

#[when("the server hangs up")]
fn when_server_hangs_up(world: &RefCell<SessionWorld>) {
    world.borrow_mut().server().hang_up();
}

#[then("the call fails with a protocol-order error")]
fn then_protocol_order(world: &RefCell<SessionWorld>) {
    let state = world.borrow();
    assert!(
        matches!(state.last_error, Some(ClientError::ProtocolOrder { .. })),
        "unexpected outcome: {:?}",
        state.last_error
    );
}

#[then("every outstanding call fails with connection closed")]
fn then_calls_fail(world: &RefCell<SessionWorld>) {
    let calls = std::mem::take(&mut world.borrow_mut().calls);
    for call in calls {
        let outcome = call.join().expect("caller thread");
        assert!(matches!(outcome, Err(ClientError::ConnectionClosed)));
    }
}

#[then("the session state is \"{expected}\"")]
fn then_session_state(world: &RefCell<SessionWorld>, expected: String) {
    let state = world.borrow().session().state();
    assert_eq!(format!("{state:?}"), expected);
}

#[scenario(
    path = "tests/features/client_session.feature",
    name = "Application requests wait for the handshake"
)]
fn requests_wait_for_handshake(world: RefCell<SessionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/client_session.feature",
    name = "The handshake makes the session operational"
)]
fn handshake_makes_operational(world: RefCell<SessionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/client_session.feature",
    name = "Outstanding calls fail when the server hangs up"
)]
fn outstanding_calls_fail(world: RefCell<SessionWorld>) {
    drop(world);
}
