//! One-shot readiness latch.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct GateState {
    ready: Mutex<bool>,
    changed: Condvar,
}

/// Latch that moves from not-ready to ready exactly once.
///
/// Clones share the same latch. [`ReadinessGate::signal`] is idempotent and
/// waiters released by it never observe the gate returning to not-ready.
#[derive(Debug, Clone, Default)]
pub struct ReadinessGate {
    state: Arc<GateState>,
}

impl ReadinessGate {
    /// Creates a gate in the not-ready state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the gate ready and wakes every waiter.
    pub fn signal(&self) {
        let mut ready = self
            .state
            .ready
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if !*ready {
            *ready = true;
            self.state.changed.notify_all();
        }
    }

    /// Blocks until the gate is ready.
    pub fn wait(&self) {
        let ready = self
            .state
            .ready
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        drop(
            self.state
                .changed
                .wait_while(ready, |flag| !*flag)
                .unwrap_or_else(|poison| poison.into_inner()),
        );
    }

    /// Blocks for at most `timeout`, returning whether the gate is ready.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let ready = self
            .state
            .ready
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let (guard, _) = self
            .state
            .changed
            .wait_timeout_while(ready, timeout, |flag| !*flag)
            .unwrap_or_else(|poison| poison.into_inner());
        *guard
    }

    /// Returns whether the gate has been signalled, without blocking.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self
            .state
            .ready
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}
