//! Single-assignment asynchronous results.
//!
//! A [`Deferred<S, F>`] is a value that will exist at most once: it resolves
//! to `Ok(S)` or `Err(F)` exactly one time and never changes afterwards.
//! Producers resolve it through a [`Resolver`]; consumers observe it by
//! registering notifications or by blocking.
//!
//! # Lifecycle
//!
//! ```text
//! Waiting ──(begin / first observer)──▶ Executing ──(resolve)──▶ Resolved
//!    └──────────────────────(resolve)────────────────────────────────▲
//! ```
//!
//! A deferred value built with a task is lazy: the task runs once somebody
//! calls [`Deferred::begin_execution`] or registers the first observer.
//!
//! # Dispatch
//!
//! Handlers never run on the resolving thread. Handlers registered before
//! resolution are grouped by target context and each group runs in
//! registration order as one job.
//!
//! # Examples
//!
//! ```rust
//! use deferred::Deferred;
//!
//! let deferred = Deferred::<i32, String>::new(|resolver| {
//!     resolver.resolve_value(21);
//! });
//! let doubled = deferred.map(|value| value * 2);
//! assert_eq!(doubled.get(), Ok(42));
//! ```

mod gate;
mod resolver;
mod state;
mod waiter;

pub use resolver::Resolver;
pub use state::DeferredState;

use std::any::Any;
use std::fmt;
use std::future::IntoFuture;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use futures::channel::oneshot;
use futures::future::BoxFuture;
use smallvec::SmallVec;

use crate::context::{self, ExecutionContext};
use crate::error::{Cancellation, FromCancellation};
use gate::Gate;
use state::{Enqueued, Interest, Released, StateWord};

/// Values that combinators can copy out of a resolved deferred value and
/// move across threads.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Clone + Send + Sync + 'static {}

pub(crate) type Task<S, F> = Box<dyn FnOnce(Resolver<S, F>) + Send>;
pub(crate) type Handler<S, F> = Box<dyn FnOnce(&Result<S, F>) + Send>;

type Batch<S, F> = (Arc<dyn ExecutionContext>, SmallVec<[Handler<S, F>; 4]>);

/// How a deferred value came to be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Resolved,
    Canceled,
}

pub(crate) struct Settled<S, F> {
    result: Result<S, F>,
    origin: Origin,
}

pub(crate) enum Waiter<S, F> {
    Notify {
        context: Option<Arc<dyn ExecutionContext>>,
        handler: Handler<S, F>,
    },
    Settle(Handler<S, F>),
    OnCancel(Box<dyn FnOnce(&F) + Send>),
    Retain(Box<dyn Any + Send>),
    Signal(Arc<Gate>),
    Wake(oneshot::Sender<()>),
}

impl<S, F> Waiter<S, F> {
    /// Observers start a lazy task; bookkeeping registrations do not.
    const fn interest(&self) -> Interest {
        match self {
            Self::Notify { .. } | Self::Signal(_) | Self::Wake(_) => Interest::Observe,
            Self::Settle(_) | Self::OnCancel(_) | Self::Retain(_) => Interest::Passive,
        }
    }
}

pub(crate) struct Core<S, F> {
    context: Arc<dyn ExecutionContext>,
    state: StateWord<Task<S, F>, Waiter<S, F>, Settled<S, F>>,
    // Shared by every blocking reader, registered once.
    gate: OnceLock<Arc<Gate>>,
}

impl<S, F> Core<S, F>
where
    S: Send + Sync + 'static,
    F: Send + Sync + 'static,
{
    fn new(
        context: Arc<dyn ExecutionContext>,
        state: StateWord<Task<S, F>, Waiter<S, F>, Settled<S, F>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            context,
            state,
            gate: OnceLock::new(),
        })
    }

    pub(crate) fn peek(&self) -> Option<&Result<S, F>> {
        self.state.peek().map(|settled| &settled.result)
    }

    pub(crate) fn resolve(self: &Arc<Self>, result: Result<S, F>, origin: Origin) -> bool {
        let Ok(released) = self.state.resolve(Settled { result, origin }) else {
            return false;
        };
        tracing::trace!(context = self.context.label(), ?origin, "resolved");
        let Released { task, waiters } = released;
        if let Some(task) = task {
            drop(task);
            tracing::trace!(context = self.context.label(), "discarded unstarted task");
        }
        if !waiters.is_empty() {
            self.dispatch(waiters);
        }
        true
    }

    pub(crate) fn enqueue(self: &Arc<Self>, waiter: Waiter<S, F>) {
        let interest = waiter.interest();
        match self.state.enqueue(waiter, interest) {
            Enqueued::Queued => {}
            Enqueued::Start(task) => self.start(task),
            Enqueued::Resolved(waiter) => self.dispatch(std::iter::once(waiter)),
        }
    }

    /// The gate blocking readers park on; registering it starts the task.
    fn gate(self: &Arc<Self>) -> &Arc<Gate> {
        self.gate.get_or_init(|| {
            let gate = Arc::new(Gate::new());
            self.enqueue(Waiter::Signal(Arc::clone(&gate)));
            gate
        })
    }

    pub(crate) fn begin_execution(self: &Arc<Self>) {
        if let Some(task) = self.state.begin() {
            self.start(task);
        }
    }

    fn start(self: &Arc<Self>, task: Task<S, F>) {
        let resolver = Resolver::new(Arc::downgrade(self));
        tracing::trace!(context = self.context.label(), "starting task");
        self.context.execute(Box::new(move || task(resolver)));
    }

    fn dispatch(self: &Arc<Self>, waiters: impl IntoIterator<Item = Waiter<S, F>>) {
        let Some(settled) = self.state.peek() else {
            return;
        };
        let canceled = settled.origin == Origin::Canceled;
        let mut batches: SmallVec<[Batch<S, F>; 2]> = SmallVec::new();
        for waiter in waiters {
            match waiter {
                Waiter::Notify { context, handler } => {
                    let target = context.unwrap_or_else(|| Arc::clone(&self.context));
                    push_handler(&mut batches, target, handler);
                }
                Waiter::Settle(handler) => {
                    push_handler(&mut batches, Arc::clone(&self.context), handler);
                }
                Waiter::OnCancel(handler) if canceled => {
                    push_handler(
                        &mut batches,
                        Arc::clone(&self.context),
                        Box::new(move |result: &Result<S, F>| {
                            if let Err(failure) = result {
                                handler(failure);
                            }
                        }),
                    );
                }
                Waiter::OnCancel(_) | Waiter::Retain(_) => {}
                Waiter::Signal(gate) => gate.open(),
                Waiter::Wake(sender) => {
                    let _ = sender.send(());
                }
            }
        }
        for (target, handlers) in batches {
            self.submit(target, handlers);
        }
    }

    fn submit(self: &Arc<Self>, target: Arc<dyn ExecutionContext>, handlers: SmallVec<[Handler<S, F>; 4]>) {
        tracing::trace!(
            context = target.label(),
            handlers = handlers.len(),
            "dispatching notifications"
        );
        let core = Arc::clone(self);
        let label = Arc::clone(&target);
        target.execute(Box::new(move || {
            if let Some(result) = core.peek() {
                for handler in handlers {
                    context::run_guarded(label.label(), || handler(result));
                }
            }
        }));
    }
}

fn push_handler<S, F>(
    batches: &mut SmallVec<[Batch<S, F>; 2]>,
    target: Arc<dyn ExecutionContext>,
    handler: Handler<S, F>,
) {
    match batches
        .iter_mut()
        .find(|(existing, _)| context::same_context(existing, &target))
    {
        Some((_, handlers)) => handlers.push(handler),
        None => {
            let mut handlers = SmallVec::new();
            handlers.push(handler);
            batches.push((target, handlers));
        }
    }
}

// =============================================================================
// Deferred
// =============================================================================

/// A value that resolves at most once, to `Ok(S)` or `Err(F)`.
///
/// `Deferred` is a cheap, cloneable handle; clones observe the same
/// resolution. Dropping every handle of an unresolved value releases its
/// pending notifications without running them.
pub struct Deferred<S, F> {
    core: Arc<Core<S, F>>,
}

impl<S, F> Clone for Deferred<S, F> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<S, F> Deferred<S, F>
where
    S: Send + Sync + 'static,
    F: Send + Sync + 'static,
{
    const fn from_core(core: Arc<Core<S, F>>) -> Self {
        Self { core }
    }

    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// A value already resolved with `value`, on the default context.
    pub fn resolved(value: S) -> Self {
        Self::from_result(Ok(value))
    }

    /// A value already resolved with `failure`, on the default context.
    pub fn failed(failure: F) -> Self {
        Self::from_result(Err(failure))
    }

    /// A value already resolved with `result`, on the default context.
    pub fn from_result(result: Result<S, F>) -> Self {
        Self::from_result_on(context::default_context(), result)
    }

    /// A value already resolved with `value`.
    pub fn resolved_on(context: Arc<dyn ExecutionContext>, value: S) -> Self {
        Self::from_result_on(context, Ok(value))
    }

    /// A value already resolved with `failure`.
    pub fn failed_on(context: Arc<dyn ExecutionContext>, failure: F) -> Self {
        Self::from_result_on(context, Err(failure))
    }

    /// A value already resolved with `result`.
    pub fn from_result_on(context: Arc<dyn ExecutionContext>, result: Result<S, F>) -> Self {
        Self::from_core(Core::new(
            context,
            StateWord::resolved(Settled {
                result,
                origin: Origin::Resolved,
            }),
        ))
    }

    /// A lazy value on the default context: `task` runs once the value is
    /// first observed or started, and resolves it through its resolver.
    pub fn new(task: impl FnOnce(Resolver<S, F>) + Send + 'static) -> Self {
        Self::lazy_on(context::default_context(), task)
    }

    /// A lazy value whose task runs on `context`.
    pub fn lazy_on(
        context: Arc<dyn ExecutionContext>,
        task: impl FnOnce(Resolver<S, F>) + Send + 'static,
    ) -> Self {
        let task: Task<S, F> = Box::new(task);
        Self::from_core(Core::new(context, StateWord::waiting(Some(task))))
    }

    /// A value whose task is submitted to `context` immediately.
    pub fn spawn(
        context: Arc<dyn ExecutionContext>,
        task: impl FnOnce(Resolver<S, F>) + Send + 'static,
    ) -> Self {
        let deferred = Self::lazy_on(context, task);
        deferred.begin_execution();
        deferred
    }

    /// A value resolved with the return value of `work`, which is submitted
    /// to `context` immediately.
    pub fn execute(
        context: Arc<dyn ExecutionContext>,
        work: impl FnOnce() -> Result<S, F> + Send + 'static,
    ) -> Self {
        Self::spawn(context, move |resolver| {
            resolver.resolve(work());
        })
    }

    /// An unresolved value with no task, together with the resolver that
    /// will supply its result.
    ///
    /// The resolver does not keep the value alive.
    pub fn pending(context: Arc<dyn ExecutionContext>) -> (Self, Resolver<S, F>) {
        let deferred = Self::from_core(Core::new(context, StateWord::waiting(None)));
        let resolver = deferred.resolver();
        (deferred, resolver)
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// The context tasks and default notifications run on.
    pub fn context(&self) -> &Arc<dyn ExecutionContext> {
        &self.core.context
    }

    /// The current phase.
    pub fn state(&self) -> DeferredState {
        self.core.state.state()
    }

    /// Returns `true` once a result is available.
    pub fn is_resolved(&self) -> bool {
        self.peek().is_some()
    }

    /// The result, if resolved. Never blocks and never starts the task.
    pub fn peek(&self) -> Option<&Result<S, F>> {
        self.core.peek()
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Starts the task if it has not started yet.
    pub fn begin_execution(&self) {
        self.core.begin_execution();
    }

    /// Runs `handler` on this value's context once it is resolved.
    ///
    /// Registering starts the task if needed.
    pub fn notify(&self, handler: impl FnOnce(&Result<S, F>) + Send + 'static) {
        self.core.enqueue(Waiter::Notify {
            context: None,
            handler: Box::new(handler),
        });
    }

    /// Runs `handler` on `context` once this value is resolved.
    pub fn notify_on(
        &self,
        context: Arc<dyn ExecutionContext>,
        handler: impl FnOnce(&Result<S, F>) + Send + 'static,
    ) {
        self.core.enqueue(Waiter::Notify {
            context: Some(context),
            handler: Box::new(handler),
        });
    }

    /// Runs `handler` on this value's context once it is resolved, without
    /// starting the task.
    pub(crate) fn on_settle(&self, handler: impl FnOnce(&Result<S, F>) + Send + 'static) {
        self.core.enqueue(Waiter::Settle(Box::new(handler)));
    }

    // -------------------------------------------------------------------------
    // Blocking and async reads
    // -------------------------------------------------------------------------

    /// Blocks the calling thread until resolved.
    ///
    /// Calling this from a job of a serial context that the result depends
    /// on deadlocks that context.
    pub fn wait(&self) -> &Result<S, F> {
        loop {
            if let Some(result) = self.peek() {
                return result;
            }
            self.core.gate().wait();
        }
    }

    /// Blocks until resolved or until `timeout` elapses.
    ///
    /// Repeated timed-out calls share one registration, so polling does not
    /// accumulate waiters.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<&Result<S, F>> {
        if let Some(result) = self.peek() {
            return Some(result);
        }
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        self.core.gate().wait_until(deadline);
        self.peek()
    }

    /// Waits asynchronously until resolved. Works under any executor.
    pub async fn resolution(&self) -> &Result<S, F> {
        loop {
            if let Some(result) = self.peek() {
                return result;
            }
            let (sender, receiver) = oneshot::channel();
            self.core.enqueue(Waiter::Wake(sender));
            let _ = receiver.await;
        }
    }

    pub(crate) fn resolver(&self) -> Resolver<S, F> {
        Resolver::new(Arc::downgrade(&self.core))
    }

    pub(crate) fn downgrade(&self) -> WeakDeferred<S, F> {
        WeakDeferred(Arc::downgrade(&self.core))
    }
}

impl<S, F> Deferred<S, F>
where
    S: Payload,
    F: Payload,
{
    /// Blocks until resolved and returns a copy of the result.
    ///
    /// # Errors
    ///
    /// Returns the stored failure if the value resolved to `Err`.
    pub fn get(&self) -> Result<S, F> {
        self.wait().clone()
    }

    /// Blocks until resolved; the success value, if any.
    pub fn value(&self) -> Option<S> {
        self.wait().as_ref().ok().cloned()
    }

    /// Blocks until resolved; the failure, if any.
    pub fn error(&self) -> Option<F> {
        self.wait().as_ref().err().cloned()
    }
}

impl<S, F> Deferred<S, F>
where
    S: Send + Sync + 'static,
    F: FromCancellation + Send + Sync + 'static,
{
    /// Resolves with a [`Cancellation::Canceled`] failure unless already
    /// resolved. Returns `true` if this call resolved the value.
    ///
    /// A running task is not interrupted; its own later resolution is
    /// ignored.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.cancel_with(Cancellation::canceled(reason))
    }

    /// Resolves with the given cancellation unless already resolved or
    /// unless `F` declines to represent it.
    pub fn cancel_with(&self, cancellation: Cancellation) -> bool {
        self.resolver().cancel_with(cancellation)
    }
}

impl<S, F> IntoFuture for Deferred<S, F>
where
    S: Payload,
    F: Payload,
{
    type Output = Result<S, F>;
    type IntoFuture = BoxFuture<'static, Result<S, F>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.resolution().await.clone() })
    }
}

impl<S, F> fmt::Debug for Deferred<S, F>
where
    S: fmt::Debug + Send + Sync + 'static,
    F: fmt::Debug + Send + Sync + 'static,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Deferred")
            .field("context", &self.context().label())
            .field("state", &self.state())
            .field("result", &self.peek())
            .finish()
    }
}

/// A non-owning handle used by combinators to read their inputs.
pub(crate) struct WeakDeferred<S, F>(Weak<Core<S, F>>);

impl<S, F> WeakDeferred<S, F> {
    pub(crate) fn upgrade(&self) -> Option<Deferred<S, F>> {
        self.0.upgrade().map(|core| Deferred { core })
    }
}
