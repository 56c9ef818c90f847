#![forbid(unsafe_code)]
//! Combinators built on [`Deferred`](crate::Deferred).
//!
//! Every combinator returns a new lazy deferred value whose task subscribes
//! to its inputs and resolves its own resolver. Inputs are retained by the
//! output until it resolves; inputs only ever hold weak references back, so
//! abandoned pipelines are freed.
//!
//! - [`transform`]: `map`, `flat_map`, `recover`, `validate` and friends, as
//!   inherent methods.
//! - [`fan_in`]: [`combine`] and [`reduce`], waiting for every input.
//! - [`race`]: [`first_value`] and [`first_resolved`], settling on the first
//!   input.
//! - [`deadline`]: `delay` and `timeout`, as inherent methods.
//! - [`retry`]: [`retrying`], bounded sequential attempts.

pub mod deadline;
pub mod fan_in;
pub mod race;
pub mod retry;
pub mod transform;

pub use fan_in::{combine, combine_on, combine2, combine3, combine4, reduce, reduce_on};
pub use race::{
    Pick2, Pick3, Pick4, first_resolved, first_resolved_cancel_others, first_resolved_on,
    first_resolved2, first_resolved3, first_resolved4, first_value, first_value_cancel_others,
    first_value_on, first_value2, first_value3, first_value4,
};
pub use retry::{retrying, retrying_on};

use std::sync::atomic::{AtomicUsize, Ordering};

/// Arrival counter shared by the handlers of a multi-input combinator.
///
/// Records which input was last seen failing. A failure is stored before the
/// arrival is counted, so the handler that observes the final arrival also
/// observes every recorded failure.
#[derive(Debug)]
pub(crate) struct Tally {
    remaining: AtomicUsize,
    // index + 1; zero means no failure
    last_failure: AtomicUsize,
}

impl Tally {
    pub(crate) const fn new(inputs: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(inputs),
            last_failure: AtomicUsize::new(0),
        }
    }

    /// Counts the arrival of input `index`. Returns `true` for the last
    /// arrival.
    pub(crate) fn arrive(&self, index: usize, failed: bool) -> bool {
        if failed {
            self.last_failure.store(index + 1, Ordering::Release);
        }
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// The input observed failing last, if any failed.
    pub(crate) fn last_failure(&self) -> Option<usize> {
        self.last_failure.load(Ordering::Acquire).checked_sub(1)
    }
}
