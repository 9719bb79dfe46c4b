//! Single-flight guard around the actuation.
//!
//! The actuator drives one physical resource, so at most one actuation
//! may be in flight process-wide. The gate is a single atomic flag:
//! whoever wins the compare-and-swap holds the gate until the returned
//! [`GatePermit`] is dropped. Events that lose the race are dropped by
//! the caller, never queued.
//!
//! # Ordering
//!
//! Acquisition uses `Acquire` so the winner observes everything the
//! previous holder wrote before its permit released the flag with
//! `Release`. The failure ordering is `Relaxed`; a loser only learns
//! "busy" and reads nothing guarded by the gate.

use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide flag marking an actuation in progress.
#[derive(Debug, Default)]
pub struct ActuationGate {
    in_flight: AtomicBool,
}

impl ActuationGate {
    /// Creates a released gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
        }
    }

    /// Attempts to take the gate.
    ///
    /// Returns a permit on success, `None` if an actuation is already in
    /// flight. The gate is released when the permit is dropped, on every
    /// exit path including panic unwind.
    pub fn try_acquire(&self) -> Option<GatePermit<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| GatePermit { gate: self })
    }

    /// Whether an actuation is currently in flight.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Scoped hold on the [`ActuationGate`].
#[derive(Debug)]
pub struct GatePermit<'a> {
    gate: &'a ActuationGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.store(false, Ordering::Release);
    }
}
