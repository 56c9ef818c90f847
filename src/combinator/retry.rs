//! Bounded sequential retry.

use std::sync::Arc;

use crate::context::{self, ExecutionContext};
use crate::deferred::{Deferred, Payload};
use crate::error::DeferredError;

/// Invokes `task` up to `attempts` times, one attempt after another, until
/// one succeeds. Fails with the last attempt's failure.
///
/// Zero attempts fails with [`DeferredError::Invalid`] without invoking
/// `task`. Attempts start once the result is observed.
///
/// # Examples
///
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use deferred::{Deferred, DeferredError};
/// use deferred::combinator::retrying;
///
/// let calls = AtomicUsize::new(0);
/// let flaky = retrying(3, move || {
///     if calls.fetch_add(1, Ordering::SeqCst) < 2 {
///         Deferred::failed(DeferredError::invalid("not yet"))
///     } else {
///         Deferred::resolved("done")
///     }
/// });
/// assert_eq!(flaky.get(), Ok("done"));
/// ```
pub fn retrying<S, F>(
    attempts: usize,
    task: impl Fn() -> Deferred<S, F> + Send + Sync + 'static,
) -> Deferred<S, F>
where
    S: Payload,
    F: Payload + From<DeferredError>,
{
    retrying_on(context::default_context(), attempts, task)
}

/// [`retrying`] with the attempts chained on `context`.
pub fn retrying_on<S, F>(
    context: Arc<dyn ExecutionContext>,
    attempts: usize,
    task: impl Fn() -> Deferred<S, F> + Send + Sync + 'static,
) -> Deferred<S, F>
where
    S: Payload,
    F: Payload + From<DeferredError>,
{
    if attempts == 0 {
        return Deferred::failed_on(
            context,
            DeferredError::invalid("retrying requires at least one attempt").into(),
        );
    }
    let task = Arc::new(task);
    let first = {
        let task = Arc::clone(&task);
        Deferred::<(), F>::resolved_on(Arc::clone(&context), ()).flat_map_on(
            Arc::clone(&context),
            move |()| {
                tracing::trace!(attempt = 1, attempts, "attempting");
                task()
            },
        )
    };
    (2..=attempts).fold(first, |previous, attempt| {
        let task = Arc::clone(&task);
        previous.flat_recover_on(Arc::clone(&context), move |_| {
            tracing::debug!(attempt, attempts, "previous attempt failed; retrying");
            task()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn counting(
        calls: &Arc<AtomicUsize>,
        succeed_on: Option<usize>,
    ) -> impl Fn() -> Deferred<usize, DeferredError> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(attempt) == succeed_on {
                Deferred::resolved(attempt)
            } else {
                Deferred::failed(DeferredError::invalid(format!("attempt {attempt}")))
            }
        }
    }

    #[rstest]
    fn exhausted_retry_surfaces_last_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let retried = retrying(3, counting(&calls, None));
        assert_eq!(retried.get(), Err(DeferredError::Invalid("attempt 3".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    fn retry_stops_at_first_success(#[case] succeed_on: usize) {
        let calls = Arc::new(AtomicUsize::new(0));
        let retried = retrying(5, counting(&calls, Some(succeed_on)));
        assert_eq!(retried.get(), Ok(succeed_on));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::SeqCst), succeed_on);
    }

    #[rstest]
    fn zero_attempts_fail_without_invoking_task() {
        let calls = Arc::new(AtomicUsize::new(0));
        let retried = retrying(0, counting(&calls, Some(1)));
        assert!(matches!(retried.peek(), Some(Err(DeferredError::Invalid(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
