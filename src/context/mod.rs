//! Execution contexts: where continuations and tasks run.
//!
//! A [`Deferred`](crate::Deferred) never runs third-party code on the thread
//! that resolves it. Tasks, notification handlers and timer callbacks are
//! always submitted to an [`ExecutionContext`].
//!
//! - [`TokioContext`]: submits jobs to a tokio runtime (the global one by
//!   default). Jobs run in parallel.
//! - [`SerialContext`]: runs jobs one at a time, in submission order.
//! - [`ContextConfig`]: builds a [`TokioContext`] backed by its own runtime.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use deferred::context::{ExecutionContext, SerialContext};
//! use deferred::Deferred;
//!
//! let serial: Arc<dyn ExecutionContext> = Arc::new(SerialContext::new("ui"));
//! let deferred = Deferred::<i32, String>::resolved_on(serial, 3);
//! assert_eq!(deferred.get(), Ok(3));
//! ```

mod runtime;
mod serial;

pub use runtime::{ContextConfig, TokioContext, global};
pub use serial::SerialContext;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use tokio::task::AbortHandle;

/// A unit of work submitted to an execution context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Relative priority label of an execution context.
///
/// Labels are opaque to the library: they are only compared, never used to
/// pick threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Work the user is not waiting for.
    Background,
    /// Long-running work with visible progress.
    Utility,
    /// Unspecified priority.
    #[default]
    Default,
    /// Work the user started and is waiting for.
    UserInitiated,
    /// Work that must finish for the next frame or keystroke.
    UserInteractive,
}

/// Somewhere jobs can be submitted for asynchronous execution.
///
/// `execute` must not run `job` on the caller's stack.
pub trait ExecutionContext: Send + Sync + 'static {
    /// Submits `job` for execution.
    fn execute(&self, job: Job);

    /// The priority label of this context.
    fn priority(&self) -> Priority {
        Priority::Default
    }

    /// A human-readable name used in log records.
    fn label(&self) -> &str {
        "anonymous"
    }
}

static DEFAULT_CONTEXT: LazyLock<Arc<dyn ExecutionContext>> =
    LazyLock::new(|| Arc::new(TokioContext::global()));

/// Returns the context used when none is given: a [`TokioContext`] on the
/// global runtime.
#[must_use]
pub fn default_context() -> Arc<dyn ExecutionContext> {
    Arc::clone(&DEFAULT_CONTEXT)
}

/// Submits `job` to `context` once `deadline` has passed.
///
/// The timer runs on the global runtime. The returned handle cancels the
/// timer; aborting after the job was submitted has no effect.
pub fn schedule(context: Arc<dyn ExecutionContext>, deadline: Instant, job: Job) -> AbortHandle {
    global()
        .spawn(async move {
            tokio::time::sleep_until(deadline.into()).await;
            tracing::trace!(context = context.label(), "deadline reached");
            context.execute(job);
        })
        .abort_handle()
}

/// Returns `true` if both handles point at the same context instance.
pub(crate) fn same_context(left: &Arc<dyn ExecutionContext>, right: &Arc<dyn ExecutionContext>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

/// Runs `work`, logging instead of unwinding if it panics.
pub(crate) fn run_guarded(label: &str, work: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(work)) {
        tracing::error!(
            context = label,
            panic = panic_message(panic.as_ref()),
            "job panicked"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}
