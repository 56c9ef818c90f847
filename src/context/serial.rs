//! A context that runs one job at a time.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{ExecutionContext, Job, Priority, global, run_guarded};

/// Runs submitted jobs sequentially, in submission order.
///
/// A drain task is started on the global runtime's blocking pool when a job
/// arrives at an idle context and exits once the queue is empty, so idle
/// contexts hold no thread.
///
/// A job that blocks waiting for another job on the same serial context
/// deadlocks the context.
#[derive(Clone)]
pub struct SerialContext {
    inner: Arc<Inner>,
    priority: Priority,
}

struct Inner {
    queue: Mutex<VecDeque<Job>>,
    // Jobs submitted and not yet finished. Nonzero while a drainer runs.
    scheduled: AtomicUsize,
    label: Arc<str>,
}

impl Inner {
    fn drain(&self) {
        loop {
            // Every counted job was queued before it was counted.
            let Some(job) = self.queue.lock().pop_front() else {
                std::thread::yield_now();
                continue;
            };
            run_guarded(&self.label, job);
            if self.scheduled.fetch_sub(1, Ordering::AcqRel) == 1 {
                break;
            }
        }
        tracing::trace!(context = %self.label, "serial context idle");
    }
}

impl SerialContext {
    /// Creates a serial context with the given name.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                scheduled: AtomicUsize::new(0),
                label: Arc::from(label.into()),
            }),
            priority: Priority::Default,
        }
    }

    /// Returns this context with another priority label.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

impl ExecutionContext for SerialContext {
    fn execute(&self, job: Job) {
        self.inner.queue.lock().push_back(job);
        if self.inner.scheduled.fetch_add(1, Ordering::AcqRel) == 0 {
            let inner = Arc::clone(&self.inner);
            drop(global().spawn_blocking(move || inner.drain()));
        }
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn label(&self) -> &str {
        &self.inner.label
    }
}

impl fmt::Debug for SerialContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SerialContext")
            .field("label", &self.inner.label)
            .field("priority", &self.priority)
            .field("scheduled", &self.inner.scheduled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
