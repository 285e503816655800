//! Capacity gates: bounded admission while a facility is open.
//!
//! [`CapacityGate`] is the bare counter a facility keeps inside its own
//! monitor state, next to the other fields its lock guards. [`Gate`] wraps
//! one counter with its own lock, open switch and wait-set for standalone
//! use (park entrance, train).

use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::ParkError;
use crate::sync::Monitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityGate {
    capacity: usize,
    occupancy: usize,
    /// Highest occupancy ever observed.
    peak: usize,
}

impl CapacityGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            occupancy: 0,
            peak: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn occupancy(&self) -> usize {
        self.occupancy
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn is_full(&self) -> bool {
        self.occupancy >= self.capacity
    }

    pub fn try_enter(&mut self) -> bool {
        if self.is_full() {
            return false;
        }
        self.occupancy += 1;
        self.peak = self.peak.max(self.occupancy);
        true
    }

    /// Guarded-wait step for a gate that turns entrants away on close:
    /// `Some(true)` admitted, `Some(false)` closed, `None` keep waiting.
    pub fn poll_enter(&mut self, open: bool) -> Option<bool> {
        if !open {
            return Some(false);
        }
        self.try_enter().then_some(true)
    }

    /// Free one place. Leaving an empty gate (a caller skipped its `enter`)
    /// is reported and ignored.
    pub fn leave(&mut self) {
        if self.occupancy == 0 {
            tracing::error!(capacity = self.capacity, "Leave on an empty gate ignored");
            return;
        }
        self.occupancy -= 1;
    }
}

#[derive(Debug)]
struct GateState {
    open: bool,
    gate: CapacityGate,
}

/// Standalone capacity gate with an open/close switch.
pub struct Gate {
    name: &'static str,
    state: Monitor<GateState>,
    space: Notify,
}

impl Gate {
    /// A closed gate admitting at most `capacity` at a time.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            state: Monitor::new(GateState {
                open: false,
                gate: CapacityGate::new(capacity),
            }),
            space: Notify::new(),
        }
    }

    pub fn open(&self) {
        self.state.lock().open = true;
        tracing::debug!(gate = self.name, "Gate opened");
    }

    /// Close the gate. Everyone queued is turned away.
    pub fn close(&self) {
        self.state.lock().open = false;
        self.space.notify_waiters();
        tracing::debug!(gate = self.name, "Gate closed");
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Wait for room. `Ok(false)` if the gate is (or becomes) closed.
    pub async fn enter(&self, cancel: &CancellationToken) -> Result<bool, ParkError> {
        self.state
            .wait_until(&self.space, cancel, |s| {
                let open = s.open;
                s.gate.poll_enter(open)
            })
            .await
    }

    /// Enter without waiting. `Closed` or `Full` when not admitted.
    pub fn try_enter(&self) -> Result<(), ParkError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(ParkError::Closed);
        }
        if state.gate.try_enter() {
            Ok(())
        } else {
            Err(ParkError::Full)
        }
    }

    pub fn leave(&self) {
        self.state.lock().gate.leave();
        self.space.notify_one();
    }

    pub fn snapshot(&self) -> CapacityGate {
        self.state.lock().gate
    }
}
