//! # deferred
//!
//! Single-assignment asynchronous results and their combinators.
//!
//! ## Overview
//!
//! A [`Deferred<S, F>`] resolves at most once, to `Ok(S)` or `Err(F)`. It is
//! driven by a lock-free state machine: registering a continuation, resolving
//! and starting a lazy task are all compare-and-swap operations on one
//! atomic word, and only the blocking accessors ever park a thread.
//!
//! - **Core**: [`Deferred`], its producer capability [`Resolver`], and the
//!   [`ExecutionContext`](context::ExecutionContext) continuations run on
//! - **Transform**: `map`, `flat_map`, `recover`, `validate`, `interruptible`
//! - **Fan-in**: [`combinator::combine`], [`combinator::reduce`]
//! - **Race/select**: [`combinator::first_value`], [`combinator::first_resolved`]
//! - **Deadlines**: `delay`, `timeout`
//! - **Retry**: [`combinator::retrying`]
//!
//! ## Cancellation
//!
//! Cancellation is a resolution like any other: it stores a failure built
//! from a [`Cancellation`]. Only values whose failure type implements
//! [`FromCancellation`] can be canceled or timed out; this is checked at
//! compile time.
//!
//! ## Example
//!
//! ```rust
//! use deferred::prelude::*;
//!
//! let prices = vec![
//!     Deferred::<u32, DeferredError>::new(|resolver| {
//!         resolver.resolve_value(120);
//!     }),
//!     Deferred::resolved(80),
//! ];
//! let total = combine(prices)
//!     .map(|prices| prices.into_iter().sum::<u32>())
//!     .validate(|total| *total < 1_000, "over budget");
//! assert_eq!(total.get(), Ok(200));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// ```rust
/// use deferred::prelude::*;
/// ```
pub mod prelude {
    pub use crate::combinator::*;
    pub use crate::context::{ExecutionContext, Priority, SerialContext, TokioContext};
    pub use crate::deferred::{Deferred, DeferredState, Payload, Resolver};
    pub use crate::error::{Cancellation, DeferredError, FromCancellation, Interrupted};
}

pub mod combinator;
pub mod context;
pub mod deferred;
pub mod error;

pub use deferred::{Deferred, DeferredState, Payload, Resolver};
pub use error::{Cancellation, DeferredError, FromCancellation, Interrupted};

static_assertions::assert_impl_all!(Deferred<i32, DeferredError>: Send, Sync, Clone);
static_assertions::assert_impl_all!(Resolver<i32, DeferredError>: Send, Sync, Clone);
static_assertions::assert_impl_all!(context::SerialContext: Send, Sync);
static_assertions::assert_impl_all!(context::TokioContext: Send, Sync);
