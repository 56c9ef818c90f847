//! Failure taxonomy for deferred computations.
//!
//! Failures are ordinary resolution values: a [`Deferred`](crate::Deferred)
//! resolves to `Err(F)` for whatever failure type `F` the caller picked. This
//! module provides the library's own failure vocabulary and the capability
//! trait that decides, at compile time, whether a failure type can carry a
//! cancellation.
//!
//! - [`Cancellation`]: why a computation was short-circuited (`canceled` or
//!   `timed out`).
//! - [`DeferredError`]: cancellation plus invalidation (usage errors such as
//!   selecting from an empty set).
//! - [`FromCancellation`]: implemented by failure types that can represent a
//!   cancellation. `cancel` and `timeout` only exist for such types.
//! - [`Interrupted`]: wraps any failure type so that it becomes cancelable.
//!
//! # Examples
//!
//! ```rust
//! use deferred::error::{Cancellation, DeferredError, FromCancellation};
//!
//! let error = DeferredError::from_cancellation(Cancellation::TimedOut("slow".into()));
//! assert_eq!(error, Some(DeferredError::TimedOut("slow".into())));
//! ```

use thiserror::Error;

/// The reason a deferred computation was short-circuited before producing
/// its own result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum Cancellation {
    /// Explicit cancellation.
    #[error("canceled: {0}")]
    Canceled(String),
    /// A deadline elapsed before the computation resolved.
    #[error("timed out: {0}")]
    TimedOut(String),
}

impl Cancellation {
    /// Creates an explicit cancellation with the given reason.
    pub fn canceled(reason: impl Into<String>) -> Self {
        Self::Canceled(reason.into())
    }

    /// Creates a deadline cancellation with the given reason.
    pub fn timed_out(reason: impl Into<String>) -> Self {
        Self::TimedOut(reason.into())
    }
}

/// Failures produced by the library itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum DeferredError {
    /// The computation was canceled.
    #[error("canceled: {0}")]
    Canceled(String),
    /// The computation did not resolve before its deadline.
    #[error("timed out: {0}")]
    TimedOut(String),
    /// The computation was used incorrectly, or a validation predicate failed.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl DeferredError {
    /// Creates an invalidation failure.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }

    /// Returns `true` for `Canceled` and `TimedOut`.
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled(_) | Self::TimedOut(_))
    }
}

impl From<Cancellation> for DeferredError {
    fn from(cancellation: Cancellation) -> Self {
        match cancellation {
            Cancellation::Canceled(reason) => Self::Canceled(reason),
            Cancellation::TimedOut(reason) => Self::TimedOut(reason),
        }
    }
}

/// Capability of a failure type to represent a cancellation.
///
/// Only deferred values whose failure type implements this trait expose
/// `cancel`, `cancel_with` and `timeout`; every other deferred value is
/// non-cancelable by construction.
///
/// Returning `None` declines a particular kind of cancellation, in which case
/// the cancel request is a no-op.
///
/// ```rust,compile_fail
/// use deferred::Deferred;
///
/// #[derive(Debug, Clone)]
/// struct Opaque;
///
/// let deferred = Deferred::<i32, Opaque>::failed(Opaque);
/// deferred.cancel("no such capability");
/// ```
pub trait FromCancellation: Sized {
    /// Converts a cancellation into this failure type, if representable.
    fn from_cancellation(cancellation: Cancellation) -> Option<Self>;
}

impl FromCancellation for DeferredError {
    fn from_cancellation(cancellation: Cancellation) -> Option<Self> {
        Some(cancellation.into())
    }
}

impl FromCancellation for Cancellation {
    fn from_cancellation(cancellation: Cancellation) -> Option<Self> {
        Some(cancellation)
    }
}

/// A failure of type `F`, or a cancellation.
///
/// Produced by [`Deferred::interruptible`](crate::Deferred::interruptible) to
/// make a deferred value with a non-cancelable failure type cancelable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum Interrupted<F> {
    /// The underlying computation failed on its own.
    #[error("{0}")]
    Failure(F),
    /// The computation was short-circuited.
    #[error("{0}")]
    Interrupted(Cancellation),
}

impl<F> Interrupted<F> {
    /// Returns the underlying failure, if any.
    pub fn into_failure(self) -> Option<F> {
        match self {
            Self::Failure(failure) => Some(failure),
            Self::Interrupted(_) => None,
        }
    }
}

impl<F> FromCancellation for Interrupted<F> {
    fn from_cancellation(cancellation: Cancellation) -> Option<Self> {
        Some(Self::Interrupted(cancellation))
    }
}
