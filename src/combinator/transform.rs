//! Single-input transforms.
//!
//! Each transform returns a new lazy deferred value on the source's context
//! (or an explicit one for the `_on` variants). Its task retains the source,
//! subscribes to it and resolves with the transformed result.
//!
//! Transforms that keep the failure type forward cancellation upstream:
//! canceling the output cancels the source with the same failure if the
//! source is still unresolved, whether or not the output has started.
//!
//! # Panics in closures
//!
//! A panic inside a transform closure is caught and logged by the context
//! running it, and the output is left unresolved. Closures that can fail
//! should return the failure through [`Deferred::try_map`] or
//! [`Deferred::recover`] instead.
//!
//! # Examples
//!
//! ```rust
//! use deferred::{Deferred, DeferredError};
//!
//! let parsed = Deferred::<&str, DeferredError>::resolved("42")
//!     .try_map(|text| text.parse::<i32>().map_err(|error| DeferredError::invalid(error.to_string())))
//!     .validate(|value| *value > 0, "must be positive")
//!     .recover(|_| Ok(0));
//! assert_eq!(parsed.get(), Ok(42));
//! ```

use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::deferred::{Deferred, Payload, Resolver};
use crate::error::{DeferredError, Interrupted};

impl<S, F> Deferred<S, F>
where
    S: Payload,
    F: Payload,
{
    /// Builds a value on `context` whose task subscribes `body` to `self`.
    fn subscribe_on<T, G>(
        &self,
        context: Arc<dyn ExecutionContext>,
        body: impl FnOnce(&Result<S, F>, &Resolver<T, G>) + Send + 'static,
    ) -> Deferred<T, G>
    where
        T: Send + Sync + 'static,
        G: Send + Sync + 'static,
    {
        let source = self.clone();
        let handler_context = Arc::clone(&context);
        Deferred::lazy_on(context, move |resolver: Resolver<T, G>| {
            let output = resolver.clone();
            source.notify_on(handler_context, move |result| body(result, &output));
            resolver.retain_source(source);
        })
    }

    /// Like `subscribe_on`, and canceling the output cancels `self`.
    fn chain_on<T>(
        &self,
        context: Arc<dyn ExecutionContext>,
        body: impl FnOnce(&Result<S, F>, &Resolver<T, F>) + Send + 'static,
    ) -> Deferred<T, F>
    where
        T: Send + Sync + 'static,
    {
        let output = self.subscribe_on(context, body);
        cancel_along(&output.resolver(), self.clone());
        output
    }

    /// Replaces the success value with `transform(value)`.
    ///
    /// If `transform` panics the output never resolves; use
    /// [`try_map`](Self::try_map) to fail it instead.
    pub fn map<T>(&self, transform: impl FnOnce(S) -> T + Send + 'static) -> Deferred<T, F>
    where
        T: Send + Sync + 'static,
    {
        self.map_on(Arc::clone(self.context()), transform)
    }

    /// [`map`](Self::map) with the transform running on `context`.
    pub fn map_on<T>(
        &self,
        context: Arc<dyn ExecutionContext>,
        transform: impl FnOnce(S) -> T + Send + 'static,
    ) -> Deferred<T, F>
    where
        T: Send + Sync + 'static,
    {
        self.chain_on(context, move |result, resolver| {
            resolver.resolve(result.clone().map(transform));
        })
    }

    /// Replaces the success value with `transform(value)`, which may fail.
    pub fn try_map<T>(
        &self,
        transform: impl FnOnce(S) -> Result<T, F> + Send + 'static,
    ) -> Deferred<T, F>
    where
        T: Send + Sync + 'static,
    {
        self.try_map_on(Arc::clone(self.context()), transform)
    }

    /// [`try_map`](Self::try_map) with the transform running on `context`.
    pub fn try_map_on<T>(
        &self,
        context: Arc<dyn ExecutionContext>,
        transform: impl FnOnce(S) -> Result<T, F> + Send + 'static,
    ) -> Deferred<T, F>
    where
        T: Send + Sync + 'static,
    {
        self.chain_on(context, move |result, resolver| {
            resolver.resolve(result.clone().and_then(transform));
        })
    }

    /// Replaces the failure with `transform(failure)`.
    ///
    /// The failure type changes, so cancellation is not forwarded.
    pub fn map_err<G>(&self, transform: impl FnOnce(F) -> G + Send + 'static) -> Deferred<S, G>
    where
        G: Send + Sync + 'static,
    {
        self.subscribe_on(Arc::clone(self.context()), move |result, resolver| {
            resolver.resolve(result.clone().map_err(transform));
        })
    }

    /// Continues with the deferred value returned by `transform`.
    pub fn flat_map<T>(
        &self,
        transform: impl FnOnce(S) -> Deferred<T, F> + Send + 'static,
    ) -> Deferred<T, F>
    where
        T: Payload,
    {
        self.flat_map_on(Arc::clone(self.context()), transform)
    }

    /// [`flat_map`](Self::flat_map) with the transform running on `context`.
    pub fn flat_map_on<T>(
        &self,
        context: Arc<dyn ExecutionContext>,
        transform: impl FnOnce(S) -> Deferred<T, F> + Send + 'static,
    ) -> Deferred<T, F>
    where
        T: Payload,
    {
        self.chain_on(context, move |result, resolver| match result {
            Ok(value) => follow(resolver, &transform(value.clone())),
            Err(failure) => {
                resolver.resolve_error(failure.clone());
            }
        })
    }

    /// Replaces a failure with `recovery(failure)`. Successes pass through.
    ///
    /// If `recovery` panics the output never resolves.
    pub fn recover(&self, recovery: impl FnOnce(F) -> Result<S, F> + Send + 'static) -> Self {
        self.recover_on(Arc::clone(self.context()), recovery)
    }

    /// [`recover`](Self::recover) with the recovery running on `context`.
    pub fn recover_on(
        &self,
        context: Arc<dyn ExecutionContext>,
        recovery: impl FnOnce(F) -> Result<S, F> + Send + 'static,
    ) -> Self {
        self.chain_on(context, move |result, resolver| {
            resolver.resolve(result.clone().or_else(recovery));
        })
    }

    /// Continues a failure with the deferred value returned by `recovery`.
    pub fn flat_recover(&self, recovery: impl FnOnce(F) -> Self + Send + 'static) -> Self {
        self.flat_recover_on(Arc::clone(self.context()), recovery)
    }

    /// [`flat_recover`](Self::flat_recover) with the recovery running on
    /// `context`.
    pub fn flat_recover_on(
        &self,
        context: Arc<dyn ExecutionContext>,
        recovery: impl FnOnce(F) -> Self + Send + 'static,
    ) -> Self {
        self.chain_on(context, move |result, resolver| match result {
            Ok(value) => {
                resolver.resolve_value(value.clone());
            }
            Err(failure) => follow(resolver, &recovery(failure.clone())),
        })
    }

    /// Fails with [`DeferredError::Invalid`] carrying `message` unless
    /// `predicate` accepts the success value.
    pub fn validate(
        &self,
        predicate: impl FnOnce(&S) -> bool + Send + 'static,
        message: impl Into<String>,
    ) -> Self
    where
        F: From<DeferredError>,
    {
        let message = message.into();
        self.try_validate(move |value| {
            if predicate(value) {
                Ok(())
            } else {
                Err(DeferredError::invalid(message).into())
            }
        })
    }

    /// Fails with the failure returned by `check`, if any.
    pub fn try_validate(&self, check: impl FnOnce(&S) -> Result<(), F> + Send + 'static) -> Self {
        self.chain_on(Arc::clone(self.context()), move |result, resolver| {
            resolver.resolve(match result {
                Ok(value) => check(value).map(|()| value.clone()),
                Err(failure) => Err(failure.clone()),
            });
        })
    }

    /// Wraps the failure type so the result can be canceled or timed out
    /// even when `F` cannot represent a cancellation.
    ///
    /// Canceling the wrapper leaves `self` untouched.
    pub fn interruptible(&self) -> Deferred<S, Interrupted<F>> {
        self.map_err(Interrupted::Failure)
    }
}

impl<S, F> Deferred<Deferred<S, F>, F>
where
    S: Payload,
    F: Payload,
{
    /// Resolves with the result of the inner deferred value.
    pub fn flatten(&self) -> Deferred<S, F> {
        self.flat_map(|inner| inner)
    }
}

/// Cancels `upstream` with the same failure when `resolver`'s value is
/// canceled.
pub(super) fn cancel_along<T, U, F>(resolver: &Resolver<T, F>, upstream: Deferred<U, F>)
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
    F: Payload,
{
    resolver.on_cancel(move |failure| {
        if upstream.resolver().resolve_canceled(failure.clone()) {
            tracing::debug!(context = upstream.context().label(), "cancellation forwarded upstream");
        }
    });
}

/// Resolves `resolver` with whatever `inner` resolves to, forwarding
/// cancellation to `inner`.
fn follow<T, F>(resolver: &Resolver<T, F>, inner: &Deferred<T, F>)
where
    T: Payload,
    F: Payload,
{
    cancel_along(resolver, inner.clone());
    resolver.forward(inner);
}
