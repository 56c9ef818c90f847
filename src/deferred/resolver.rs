//! The producer capability of a deferred value.

use std::fmt;
use std::sync::{Arc, Weak};

use super::{Core, Deferred, Origin, Payload, Waiter};
use crate::error::{Cancellation, FromCancellation};

/// The only way to supply the result of a [`Deferred`].
///
/// A resolver holds a weak reference: it never keeps its deferred value
/// alive, so a task may capture its own resolver without forming a cycle.
/// Once every handle of the value is gone, all operations are no-ops.
///
/// Clones share the capability; the first resolution wins.
pub struct Resolver<S, F> {
    core: Weak<Core<S, F>>,
}

impl<S, F> Clone for Resolver<S, F> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
        }
    }
}

impl<S, F> Resolver<S, F>
where
    S: Send + Sync + 'static,
    F: Send + Sync + 'static,
{
    pub(crate) const fn new(core: Weak<Core<S, F>>) -> Self {
        Self { core }
    }

    fn core(&self) -> Option<Arc<Core<S, F>>> {
        self.core.upgrade()
    }

    /// Resolves with `result`. Returns `true` if this call resolved the
    /// value.
    pub fn resolve(&self, result: Result<S, F>) -> bool {
        self.settle(result, Origin::Resolved)
    }

    /// Resolves with a success value.
    pub fn resolve_value(&self, value: S) -> bool {
        self.resolve(Ok(value))
    }

    /// Resolves with a failure.
    pub fn resolve_error(&self, failure: F) -> bool {
        self.resolve(Err(failure))
    }

    pub(crate) fn settle(&self, result: Result<S, F>, origin: Origin) -> bool {
        self.core()
            .is_some_and(|core| core.resolve(result, origin))
    }

    /// Resolves with `failure` as if canceled, so `on_cancel` handlers run.
    /// Used to forward a cancellation from a derived value to its source.
    pub(crate) fn resolve_canceled(&self, failure: F) -> bool {
        self.settle(Err(failure), Origin::Canceled)
    }

    /// Starts the task of the deferred value if it has not started yet.
    pub fn begin_execution(&self) {
        if let Some(core) = self.core() {
            core.begin_execution();
        }
    }

    /// Returns `true` while the deferred value is alive and unresolved.
    pub fn needs_resolution(&self) -> bool {
        self.core().is_some_and(|core| core.peek().is_none())
    }

    /// Runs `handler` on the deferred value's context once it is resolved,
    /// by this resolver or any other means.
    pub fn notify(&self, handler: impl FnOnce(&Result<S, F>) + Send + 'static) {
        if let Some(core) = self.core() {
            core.enqueue(Waiter::Notify {
                context: None,
                handler: Box::new(handler),
            });
        }
    }

    /// Runs `handler` with the failure if the deferred value gets canceled.
    ///
    /// Adapters use this to abort the external operation they wrap.
    /// Registering does not start a lazy task.
    pub fn on_cancel(&self, handler: impl FnOnce(&F) + Send + 'static) {
        if let Some(core) = self.core() {
            core.enqueue(Waiter::OnCancel(Box::new(handler)));
        }
    }

    /// Keeps `source` alive until the deferred value is resolved or dropped.
    /// Registering does not start a lazy task.
    pub fn retain_source<T: Send + 'static>(&self, source: T) {
        if let Some(core) = self.core() {
            core.enqueue(Waiter::Retain(Box::new(source)));
        }
    }
}

impl<S, F> Resolver<S, F>
where
    S: Payload,
    F: Payload,
{
    /// Resolves with whatever `source` resolves to, retaining `source`
    /// until then.
    pub fn forward(&self, source: &Deferred<S, F>) {
        self.retain_source(source.clone());
        let resolver = self.clone();
        source.notify(move |result| {
            resolver.resolve(result.clone());
        });
    }
}

impl<S, F> Resolver<S, F>
where
    S: Send + Sync + 'static,
    F: FromCancellation + Send + Sync + 'static,
{
    /// Resolves with a [`Cancellation::Canceled`] failure.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.cancel_with(Cancellation::canceled(reason))
    }

    /// Resolves with the given cancellation, if `F` can represent it.
    pub fn cancel_with(&self, cancellation: Cancellation) -> bool {
        let Some(failure) = F::from_cancellation(cancellation.clone()) else {
            tracing::debug!(%cancellation, "cancellation not representable; ignored");
            return false;
        };
        let canceled = self.resolve_canceled(failure);
        if canceled {
            tracing::debug!(%cancellation, "canceled");
        }
        canceled
    }
}

impl<S, F> fmt::Debug for Resolver<S, F> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Resolver")
            .field("alive", &(self.core.strong_count() > 0))
            .finish()
    }
}
