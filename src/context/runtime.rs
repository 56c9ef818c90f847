//! Tokio-backed execution contexts.
//!
//! A global multi-thread runtime is created lazily on first use and never
//! dropped. [`TokioContext::global`] submits jobs to it; [`ContextConfig`]
//! builds contexts that own a dedicated runtime instead.

use std::fmt;
use std::io;
use std::sync::{Arc, LazyLock};

use tokio::runtime::{Builder, Handle, Runtime};

use super::{ExecutionContext, Job, Priority, run_guarded};

// =============================================================================
// Global Runtime
// =============================================================================

/// Global tokio runtime initialized lazily on first access.
///
/// Worker threads default to the number of CPU cores. Timers used by
/// `delay` and `timeout` always run here.
static GLOBAL_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("deferred-worker")
        .enable_all()
        .build()
        .expect("Failed to create global tokio runtime")
});

/// Returns a reference to the global runtime.
#[inline]
#[must_use]
pub fn global() -> &'static Runtime {
    &GLOBAL_RUNTIME
}

// =============================================================================
// TokioContext
// =============================================================================

/// Submits jobs to a tokio runtime's blocking pool.
///
/// Jobs may run in parallel. They are plain closures that may block, for
/// example on [`Deferred::get`](crate::Deferred::get), so they never occupy
/// the async workers that drive timers and I/O.
#[derive(Clone)]
pub struct TokioContext {
    handle: Handle,
    runtime: Option<Arc<OwnedRuntime>>,
    priority: Priority,
    label: Arc<str>,
}

impl TokioContext {
    /// A context on the global runtime.
    #[must_use]
    pub fn global() -> Self {
        Self::from_handle(global().handle().clone())
    }

    /// A context on the runtime behind `handle`.
    ///
    /// The runtime must outlive every job submitted through this context;
    /// jobs submitted after it shut down are dropped.
    #[must_use]
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            runtime: None,
            priority: Priority::Default,
            label: Arc::from("tokio"),
        }
    }

    /// A context on the runtime the caller is running in, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::from_handle)
    }

    /// Returns this context with another priority label.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Returns this context with another name.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Arc::from(label.into());
        self
    }

    /// The runtime handle jobs are spawned on.
    #[must_use]
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl ExecutionContext for TokioContext {
    fn execute(&self, job: Job) {
        let label = Arc::clone(&self.label);
        drop(self.handle.spawn_blocking(move || run_guarded(&label, job)));
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for TokioContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TokioContext")
            .field("label", &self.label)
            .field("priority", &self.priority)
            .field("owns_runtime", &self.runtime.is_some())
            .finish()
    }
}

/// A runtime owned by one or more contexts.
///
/// The last context may be dropped from inside one of the runtime's own
/// workers, where a blocking shutdown would panic.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

// =============================================================================
// ContextConfig
// =============================================================================

/// Configuration for a [`TokioContext`] with its own runtime.
///
/// # Examples
///
/// ```rust
/// use deferred::context::{ContextConfig, Priority};
///
/// let context = ContextConfig::new()
///     .worker_threads(2)
///     .label("io")
///     .priority(Priority::Utility)
///     .build()
///     .unwrap();
/// assert_eq!(deferred::context::ExecutionContext::label(&context), "io");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    worker_threads: usize,
    label: String,
    priority: Priority,
}

impl ContextConfig {
    /// Defaults: one worker per CPU core, label `"deferred"`, default priority.
    #[must_use]
    pub fn new() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            label: String::from("deferred"),
            priority: Priority::Default,
        }
    }

    /// Number of worker threads; zero is treated as one.
    #[must_use]
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count.max(1);
        self
    }

    /// Context name, also used as the worker thread name.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Priority label reported by the context.
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Starts the runtime and returns a context that owns it.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by tokio if the runtime's threads or
    /// drivers cannot be created.
    pub fn build(self) -> io::Result<TokioContext> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(self.worker_threads)
            .thread_name(self.label.clone())
            .enable_all()
            .build()?;
        tracing::debug!(
            label = %self.label,
            workers = self.worker_threads,
            "started context runtime"
        );
        Ok(TokioContext {
            handle: runtime.handle().clone(),
            runtime: Some(Arc::new(OwnedRuntime(Some(runtime)))),
            priority: self.priority,
            label: Arc::from(self.label),
        })
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::new()
    }
}
