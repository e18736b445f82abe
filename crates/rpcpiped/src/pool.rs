//! Bounded worker pool for dispatchable requests.
//!
//! The router submits requests onto a bounded queue consumed by a fixed set of
//! worker threads. A full queue blocks the submitting thread, which in turn
//! stops the reader from pulling more frames off the pipe. Every submitted
//! request is tracked in an in-flight ledger from enqueue until its response
//! has been written, so shutdown can tell drained work from abandoned work.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rpcpipe_protocol::{ErrorObject, Message, Request, RequestId, Response};
use rpcpipe_transport::{TransportEvents, WriteSerializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ServerError;
use crate::handler::{HandlerRegistry, RequestContext};
use crate::notify::NotificationSender;

const POOL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::pool");

/// Extra time allowed for responses already being written when the grace
/// period ends.
const RESPONDING_GRACE: Duration = Duration::from_millis(250);

/// Outcome of draining the pool at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Requests whose responses were written.
    pub completed: usize,
    /// Requests answered with an abandonment error instead.
    pub abandoned: usize,
}

struct WorkItem {
    ticket: u64,
    request: Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Queued,
    Running,
    Responding,
}

struct Tracked {
    id: RequestId,
    method: String,
    enqueued_at: Instant,
    stage: Stage,
}

#[derive(Default)]
struct Ledger {
    entries: HashMap<u64, Tracked>,
    completed: usize,
}

#[derive(Default)]
struct InFlight {
    ledger: Mutex<Ledger>,
    settled: Condvar,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn track(&self, ticket: u64, request: &Request) {
        self.lock().entries.insert(
            ticket,
            Tracked {
                id: request.id.clone(),
                method: request.method.clone(),
                enqueued_at: Instant::now(),
                stage: Stage::Queued,
            },
        );
    }

    fn forget(&self, ticket: u64) {
        self.lock().entries.remove(&ticket);
        self.settled.notify_all();
    }

    /// Moves `ticket` to `stage`; returns `false` if it was abandoned.
    fn advance(&self, ticket: u64, stage: Stage) -> bool {
        self.lock()
            .entries
            .get_mut(&ticket)
            .map(|entry| entry.stage = stage)
            .is_some()
    }

    fn complete(&self, ticket: u64) {
        let mut ledger = self.lock();
        if ledger.entries.remove(&ticket).is_some() {
            ledger.completed = ledger.completed.saturating_add(1);
        }
        drop(ledger);
        self.settled.notify_all();
    }

    fn wait_until_empty(&self, timeout: Duration, responding_only: bool) -> MutexGuard<'_, Ledger> {
        let ledger = self.lock();
        let (guard, _) = self
            .settled
            .wait_timeout_while(ledger, timeout, |state| {
                state
                    .entries
                    .values()
                    .any(|entry| !responding_only || entry.stage == Stage::Responding)
            })
            .unwrap_or_else(|poison| poison.into_inner());
        guard
    }
}

struct WorkerShared {
    registry: Arc<HandlerRegistry>,
    writer: WriteSerializer,
    notifier: NotificationSender,
    in_flight: Arc<InFlight>,
}

/// Fixed-size pool executing handlers off the router thread.
pub(crate) struct WorkerPool {
    sender: Option<SyncSender<WorkItem>>,
    workers: Vec<JoinHandle<()>>,
    in_flight: Arc<InFlight>,
    writer: WriteSerializer,
    events: Arc<dyn TransportEvents>,
    capacity: usize,
    next_ticket: u64,
}

impl WorkerPool {
    /// Spawns `worker_count` workers fed by a queue of `capacity` slots.
    pub(crate) fn start(
        worker_count: usize,
        capacity: usize,
        registry: Arc<HandlerRegistry>,
        writer: WriteSerializer,
        events: Arc<dyn TransportEvents>,
    ) -> Result<Self, ServerError> {
        let (sender, queue) = mpsc::sync_channel(capacity);
        let receiver = Arc::new(Mutex::new(queue));
        let in_flight = Arc::new(InFlight::default());
        let shared = Arc::new(WorkerShared {
            registry,
            notifier: NotificationSender::new(writer.clone()),
            writer: writer.clone(),
            in_flight: Arc::clone(&in_flight),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker_queue = Arc::clone(&receiver);
            let context = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("rpcpiped-worker-{index}"))
                .spawn(move || run_worker(&worker_queue, &context))
                .map_err(|source| ServerError::Spawn {
                    thread: "worker",
                    source,
                })?;
            workers.push(handle);
        }
        debug!(target: POOL_TARGET, worker_count, capacity, "worker pool started");

        Ok(Self {
            sender: Some(sender),
            workers,
            in_flight,
            writer,
            events,
            capacity,
            next_ticket: 0,
        })
    }

    /// Queues `request`, blocking while the queue is full.
    pub(crate) fn submit(&mut self, request: Request) -> Result<(), ServerError> {
        let sender = self.sender.as_ref().ok_or(ServerError::PoolClosed)?;
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.in_flight.track(ticket, &request);

        let item = WorkItem { ticket, request };
        let sent = match sender.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(pending)) => {
                self.events.queue_saturated(self.capacity);
                sender.send(pending).map_err(|_| ServerError::PoolClosed)
            }
            Err(TrySendError::Disconnected(_)) => Err(ServerError::PoolClosed),
        };
        if sent.is_err() {
            self.in_flight.forget(ticket);
        }
        sent
    }

    /// Closes the queue and waits up to `grace` for outstanding work.
    ///
    /// Work still queued or running afterwards is abandoned: each request is
    /// reported to the events sink and answered with a `-32001` error so the
    /// client is never left waiting. Workers that later finish abandoned work
    /// discard the result.
    pub(crate) fn shutdown(mut self, grace: Duration) -> DrainSummary {
        drop(self.sender.take());

        let mut ledger = self.in_flight.wait_until_empty(grace, false);
        let abandoned_tickets: Vec<u64> = ledger
            .entries
            .iter()
            .filter(|(_, entry)| entry.stage != Stage::Responding)
            .map(|(ticket, _)| *ticket)
            .collect();
        let abandoned: Vec<Tracked> = abandoned_tickets
            .iter()
            .filter_map(|ticket| ledger.entries.remove(ticket))
            .collect();
        drop(ledger);

        for entry in &abandoned {
            self.events
                .work_abandoned(&entry.id, &entry.method, entry.enqueued_at.elapsed());
            let reply = Message::Response(Response::error(
                Some(entry.id.clone()),
                ErrorObject::request_abandoned(),
            ));
            if let Err(error) = self.writer.send(&reply) {
                warn!(
                    target: POOL_TARGET,
                    id = %entry.id,
                    error = %error,
                    "failed to send abandonment reply"
                );
            }
        }

        let completed = self
            .in_flight
            .wait_until_empty(RESPONDING_GRACE, true)
            .completed;

        if abandoned.is_empty() {
            for worker in self.workers.drain(..) {
                if worker.join().is_err() {
                    warn!(target: POOL_TARGET, "worker thread panicked outside a handler");
                }
            }
        } else {
            // Workers stuck in handlers are detached; they exit once their
            // handler returns and the closed queue is empty.
            self.workers.clear();
        }

        DrainSummary {
            completed,
            abandoned: abandoned.len(),
        }
    }
}

fn run_worker(queue: &Mutex<Receiver<WorkItem>>, shared: &WorkerShared) {
    loop {
        let next = queue
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .recv();
        let Ok(item) = next else {
            break;
        };
        execute(item, shared);
    }
}

fn execute(item: WorkItem, shared: &WorkerShared) {
    let WorkItem { ticket, request } = item;
    if !shared.in_flight.advance(ticket, Stage::Running) {
        debug!(target: POOL_TARGET, id = %request.id, "skipping abandoned request");
        return;
    }

    let outcome = run_handler(&request, shared);
    let response = Response {
        id: Some(request.id.clone()),
        outcome,
    };

    if !shared.in_flight.advance(ticket, Stage::Responding) {
        debug!(
            target: POOL_TARGET,
            id = %request.id,
            "discarding result of abandoned request"
        );
        return;
    }
    if let Err(error) = shared.writer.send(&Message::Response(response)) {
        warn!(
            target: POOL_TARGET,
            id = %request.id,
            error = %error,
            "failed to write response"
        );
    }
    shared.in_flight.complete(ticket);
}

fn run_handler(request: &Request, shared: &WorkerShared) -> Result<Value, ErrorObject> {
    let Some(handler) = shared.registry.get(&request.method) else {
        return Err(ErrorObject::method_not_found(&request.method));
    };
    let context = RequestContext::new(
        request.id.clone(),
        request.method.clone(),
        shared.notifier.clone(),
    );
    let params = request.params.clone();

    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(params, &context))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(error.into_error_object()),
        Err(payload) => {
            let detail = panic_message(payload.as_ref());
            warn!(
                target: POOL_TARGET,
                id = %request.id,
                method = %request.method,
                panic = %detail,
                "handler panicked"
            );
            Err(ErrorObject::internal(format!("handler panicked: {detail}")))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}
