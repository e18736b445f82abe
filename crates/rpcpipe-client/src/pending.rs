//! Pending request table.
//!
//! Each outstanding call owns the receiving half of a one-shot channel; the
//! table keeps the sending half keyed by request id. Dropping a sender, either
//! by removing its entry or by closing the table, wakes the caller with a
//! disconnect, which the session reports as a closed connection.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};

use rpcpipe_protocol::{ErrorObject, RequestId};
use serde_json::Value;

use crate::error::ClientError;

pub(crate) type Outcome = Result<Value, ErrorObject>;

#[derive(Default)]
struct Slots {
    waiting: HashMap<RequestId, Sender<Outcome>>,
    closed: bool,
}

#[derive(Default)]
pub(crate) struct PendingTable {
    slots: Mutex<Slots>,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Registers `id` and returns the slot its response will arrive on.
    pub(crate) fn insert(&self, id: RequestId) -> Result<Receiver<Outcome>, ClientError> {
        let mut slots = self.lock();
        if slots.closed {
            return Err(ClientError::SessionClosed);
        }
        let (sender, receiver) = mpsc::channel();
        slots.waiting.insert(id, sender);
        Ok(receiver)
    }

    /// Completes the entry for `id`; returns `false` when nothing was waiting.
    pub(crate) fn resolve(&self, id: &RequestId, outcome: Outcome) -> bool {
        let Some(sender) = self.lock().waiting.remove(id) else {
            return false;
        };
        // The caller may have timed out between removal and send.
        sender.send(outcome).is_ok()
    }

    pub(crate) fn remove(&self, id: &RequestId) {
        self.lock().waiting.remove(id);
    }

    /// Refuses new entries and fails every waiting one; returns how many
    /// were failed.
    pub(crate) fn close(&self) -> usize {
        let mut slots = self.lock();
        slots.closed = true;
        let failed = slots.waiting.len();
        slots.waiting.clear();
        failed
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::RecvError;

    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;

    #[fixture]
    fn table() -> PendingTable {
        PendingTable::default()
    }

    #[rstest]
    fn resolves_matching_entry(table: PendingTable) {
        let slot = table.insert(RequestId::from(1)).expect("insert");

        assert!(table.resolve(&RequestId::from(1), Ok(json!("done"))));
        assert_eq!(slot.recv(), Ok(Ok(json!("done"))));
        assert_eq!(table.len(), 0);
    }

    #[rstest]
    fn unknown_ids_are_not_resolved(table: PendingTable) {
        assert!(!table.resolve(&RequestId::from("ghost"), Ok(Value::Null)));
    }

    #[rstest]
    fn close_fails_waiting_entries_and_refuses_new_ones(table: PendingTable) {
        let first = table.insert(RequestId::from(1)).expect("insert");
        let second = table.insert(RequestId::from(2)).expect("insert");

        assert_eq!(table.close(), 2);
        assert_eq!(first.recv(), Err(RecvError));
        assert_eq!(second.recv(), Err(RecvError));
        assert!(matches!(
            table.insert(RequestId::from(3)),
            Err(ClientError::SessionClosed)
        ));
    }
}
