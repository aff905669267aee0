//! Per-device operation gate.
//!
//! Polls and debounced writes on one device must not overlap. Each takes a
//! [`GatePermit`] first; dropping the permit broadcasts "operation complete"
//! to every waiter at once. All of them wake, one wins the gate and the rest
//! go back to waiting. That herd is deliberate: waiters per device are few,
//! and the request queue already serializes the network calls behind them.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct OperationGate {
    busy: AtomicBool,
    complete: Notify,
}

impl OperationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no operation is in flight, then claim the gate.
    pub async fn acquire(&self) -> GatePermit<'_> {
        loop {
            let notified = self.complete.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();

            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            notified.await;
        }
    }

    /// Claim the gate if it is free.
    pub fn try_acquire(&self) -> Option<GatePermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GatePermit { gate: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Exclusive claim on an [`OperationGate`]; released on drop.
#[derive(Debug)]
pub struct GatePermit<'a> {
    gate: &'a OperationGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
        self.gate.complete.notify_waiters();
    }
}
