//! One-shot semaphore used by the blocking accessors.

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// A latch that starts closed and opens once.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    open: Mutex<bool>,
    condvar: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Opens the gate and wakes every parked thread.
    pub(crate) fn open(&self) {
        *self.open.lock() = true;
        self.condvar.notify_all();
    }

    /// Parks until the gate is open.
    pub(crate) fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.condvar.wait(&mut open);
        }
    }

    /// Parks until the gate is open or `deadline` passes. Returns whether the
    /// gate is open.
    pub(crate) fn wait_until(&self, deadline: Instant) -> bool {
        let mut open = self.open.lock();
        while !*open {
            if self.condvar.wait_until(&mut open, deadline).timed_out() {
                return *open;
            }
        }
        true
    }
}
