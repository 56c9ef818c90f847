//! The resolution state machine.
//!
//! The mutable state of a deferred value is one atomically swapped,
//! reference-counted [`Phase`]:
//!
//! | phase       | payload                                        |
//! |-------------|------------------------------------------------|
//! | `Waiting`   | the not-yet-started task, and passive waiters  |
//! | `Executing` | head of the waiter stack                       |
//! | `Resolved`  | none; the result lives in a write-once cell    |
//!
//! The phase only moves forward (`Waiting → Executing → Resolved` or
//! `Waiting → Resolved`) and every transition replaces the whole phase with
//! a compare-and-swap. Superseded phases are reclaimed by reference counting
//! once the last reader lets go of them.
//!
//! # Memory ordering
//!
//! Publishing a waiter is a successful compare-and-swap of the phase, which
//! is a release; the resolver's swap to `Resolved` acquires the stack it
//! detaches, so every waiter pushed before it is visible to the resolver.
//! The result is written before that swap, so any thread that observes
//! `Resolved` also observes the result.
//!
//! # Ownership
//!
//! - The task sits in a take-once cell shared by successive `Waiting`
//!   phases. Only the thread whose swap moved the phase out of `Waiting`
//!   takes it.
//! - Waiters are taken only by the thread whose swap detached the stack.
//! - Exactly one resolver wins the `claimed` flag and writes the result.

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicBool, Ordering};
#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicBool, Ordering};

use super::waiter::{self, Node, Stack};

/// Observable phase of a deferred value.
///
/// Phases are ordered; a deferred value never moves to a lower phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeferredState {
    /// Not started: nobody has asked for the value yet.
    Waiting,
    /// Started or observed, not yet resolved.
    Executing,
    /// Resolved; the result is immutable.
    Resolved,
}

/// A value taken at most once.
struct Claim<T>(Mutex<Option<T>>);

impl<T> Claim<T> {
    fn new(value: T) -> Arc<Self> {
        Arc::new(Self(Mutex::new(Some(value))))
    }

    fn take(&self) -> Option<T> {
        self.0.lock().take()
    }
}

enum Phase<T, W> {
    Waiting {
        task: Option<Arc<Claim<T>>>,
        waiters: Stack<W>,
    },
    Executing {
        waiters: Stack<W>,
    },
    Resolved,
}

impl<T, W> Phase<T, W> {
    const fn state(&self) -> DeferredState {
        match self {
            Self::Waiting { .. } => DeferredState::Waiting,
            Self::Executing { .. } => DeferredState::Executing,
            Self::Resolved => DeferredState::Resolved,
        }
    }

    const fn waiters(&self) -> Option<&Stack<W>> {
        match self {
            Self::Waiting { waiters, .. } | Self::Executing { waiters } => Some(waiters),
            Self::Resolved => None,
        }
    }
}

#[cfg(not(feature = "loom"))]
mod cell {
    use std::sync::Arc;

    use arc_swap::ArcSwap;

    /// Atomically replaced `Arc<P>`.
    pub(super) struct PhaseCell<P>(ArcSwap<P>);

    impl<P> PhaseCell<P> {
        pub(super) fn new(phase: P) -> Self {
            Self(ArcSwap::from_pointee(phase))
        }

        pub(super) fn load(&self) -> Arc<P> {
            self.0.load_full()
        }

        /// Installs `new` if the cell still holds `current`.
        pub(super) fn compare_and_swap(&self, current: &Arc<P>, new: Arc<P>) -> bool {
            let previous = self.0.compare_and_swap(current, new);
            Arc::ptr_eq(&*previous, current)
        }

        pub(super) fn swap(&self, new: Arc<P>) -> Arc<P> {
            self.0.swap(new)
        }
    }
}

#[cfg(feature = "loom")]
mod cell {
    use std::sync::Arc;

    use loom::sync::{Mutex, MutexGuard};

    /// Model of the atomically replaced `Arc<P>`; every operation is one
    /// linearization point, as with the lock-free cell.
    pub(super) struct PhaseCell<P>(Mutex<Arc<P>>);

    impl<P> PhaseCell<P> {
        pub(super) fn new(phase: P) -> Self {
            Self(Mutex::new(Arc::new(phase)))
        }

        fn slot(&self) -> MutexGuard<'_, Arc<P>> {
            self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
        }

        pub(super) fn load(&self) -> Arc<P> {
            Arc::clone(&self.slot())
        }

        pub(super) fn compare_and_swap(&self, current: &Arc<P>, new: Arc<P>) -> bool {
            let mut slot = self.slot();
            if Arc::ptr_eq(&*slot, current) {
                *slot = new;
                true
            } else {
                false
            }
        }

        pub(super) fn swap(&self, new: Arc<P>) -> Arc<P> {
            std::mem::replace(&mut *self.slot(), new)
        }
    }
}

use cell::PhaseCell;

/// What a successful resolution took out of the state word.
pub(crate) struct Released<T, W> {
    /// A task that never started; resolving preempted it.
    pub(crate) task: Option<T>,
    /// Registered waiters, in registration order.
    pub(crate) waiters: Vec<W>,
}

/// Outcome of pushing a waiter.
pub(crate) enum Enqueued<T, W> {
    /// The waiter will be handed to the resolver.
    Queued,
    /// The waiter was queued and this push claimed the pending task, which
    /// the caller must now start.
    Start(T),
    /// Already resolved; the waiter is handed back for immediate delivery.
    Resolved(W),
}

/// How a waiter affects a lazy value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
    /// Observing the result: starts the task.
    Observe,
    /// Only reacting to the result: leaves the task unstarted.
    Passive,
}

/// State word over a task `T`, waiters `W` and a result `R`.
pub(crate) struct StateWord<T, W, R> {
    phase: PhaseCell<Phase<T, W>>,
    claimed: AtomicBool,
    result: OnceLock<R>,
}

impl<T, W, R> StateWord<T, W, R> {
    /// Starts in `Waiting`, optionally holding a task.
    pub(crate) fn waiting(task: Option<T>) -> Self {
        Self {
            phase: PhaseCell::new(Phase::Waiting {
                task: task.map(Claim::new),
                waiters: None,
            }),
            claimed: AtomicBool::new(false),
            result: OnceLock::new(),
        }
    }

    /// Starts directly in `Resolved`.
    pub(crate) fn resolved(result: R) -> Self {
        Self {
            phase: PhaseCell::new(Phase::Resolved),
            claimed: AtomicBool::new(true),
            result: OnceLock::from(result),
        }
    }

    pub(crate) fn state(&self) -> DeferredState {
        if self.result.get().is_some() {
            return DeferredState::Resolved;
        }
        self.phase.load().state()
    }

    /// Borrows the result if resolved.
    pub(crate) fn peek(&self) -> Option<&R> {
        self.result.get()
    }

    /// Number of waiters registered and not yet delivered.
    pub(crate) fn pending_waiters(&self) -> usize {
        self.phase.load().waiters().map_or(0, waiter::depth)
    }

    /// Stores `result` unless already resolved, in which case it is handed
    /// back unchanged.
    pub(crate) fn resolve(&self, result: R) -> Result<Released<T, W>, R> {
        if self.claimed.load(Ordering::Relaxed) || self.claimed.swap(true, Ordering::AcqRel) {
            return Err(result);
        }
        self.result.set(result)?;
        let previous = self.phase.swap(Arc::new(Phase::Resolved));
        Ok(match &*previous {
            Phase::Waiting { task, waiters } => Released {
                task: task.as_deref().and_then(Claim::take),
                waiters: waiter::drain(waiters),
            },
            Phase::Executing { waiters } => Released {
                task: None,
                waiters: waiter::drain(waiters),
            },
            Phase::Resolved => Released {
                task: None,
                waiters: Vec::new(),
            },
        })
    }

    /// Pushes `waiter`, or hands it back if already resolved.
    ///
    /// An observing push moves `Waiting` to `Executing` and claims the task;
    /// a passive push leaves the phase where it is.
    pub(crate) fn enqueue(&self, waiter: W, interest: Interest) -> Enqueued<T, W> {
        let node = Node::new(waiter);
        loop {
            let current = self.phase.load();
            let (next, task) = match &*current {
                Phase::Resolved => {
                    return node.reclaim().map_or(Enqueued::Queued, Enqueued::Resolved);
                }
                Phase::Waiting { task, waiters } => {
                    node.relink(waiters.clone());
                    match interest {
                        Interest::Observe => (
                            Phase::Executing {
                                waiters: Some(Arc::clone(&node)),
                            },
                            task.clone(),
                        ),
                        Interest::Passive => (
                            Phase::Waiting {
                                task: task.clone(),
                                waiters: Some(Arc::clone(&node)),
                            },
                            None,
                        ),
                    }
                }
                Phase::Executing { waiters } => {
                    node.relink(waiters.clone());
                    (
                        Phase::Executing {
                            waiters: Some(Arc::clone(&node)),
                        },
                        None,
                    )
                }
            };
            if self.phase.compare_and_swap(&current, Arc::new(next)) {
                return task
                    .as_deref()
                    .and_then(Claim::take)
                    .map_or(Enqueued::Queued, Enqueued::Start);
            }
        }
    }

    /// Moves `Waiting → Executing` and returns the task, if this call won.
    pub(crate) fn begin(&self) -> Option<T> {
        loop {
            let current = self.phase.load();
            let Phase::Waiting { task, waiters } = &*current else {
                return None;
            };
            let started = Phase::Executing {
                waiters: waiters.clone(),
            };
            if self.phase.compare_and_swap(&current, Arc::new(started)) {
                return task.as_deref().and_then(Claim::take);
            }
        }
    }
}

impl<T, W, R: fmt::Debug> fmt::Debug for StateWord<T, W, R> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("StateWord")
            .field("state", &self.state())
            .field("pending_waiters", &self.pending_waiters())
            .field("result", &self.peek())
            .finish()
    }
}
