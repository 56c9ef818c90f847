//! Deadlines: `delay` and `timeout`.
//!
//! Timers run on the global runtime and submit their callback to the
//! deferred value's context. A timer is aborted as soon as the value it
//! guards resolves.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::transform::cancel_along;
use crate::context;
use crate::deferred::{Deferred, Payload};
use crate::error::{Cancellation, FromCancellation};

impl<S, F> Deferred<S, F>
where
    S: Payload,
    F: Payload,
{
    /// Forwards the result no earlier than `until`.
    ///
    /// Only successes are delayed; failures are forwarded immediately.
    pub fn delay(&self, until: Instant) -> Self {
        self.delay_until(Some(until))
    }

    /// [`delay`](Self::delay) by `duration` from now.
    pub fn delay_for(&self, duration: Duration) -> Self {
        self.delay_until(Instant::now().checked_add(duration))
    }

    // `None` holds successes back forever.
    fn delay_until(&self, until: Option<Instant>) -> Self {
        let source = self.clone();
        let home = Arc::clone(self.context());
        let held = Deferred::lazy_on(Arc::clone(&home), move |resolver| {
            let output = resolver.clone();
            let timer_context = Arc::clone(&home);
            source.notify_on(home, move |result| match (result, until) {
                (Err(failure), _) => {
                    output.resolve_error(failure.clone());
                }
                (Ok(value), Some(until)) if until <= Instant::now() => {
                    output.resolve_value(value.clone());
                }
                (Ok(value), Some(until)) => {
                    let value = value.clone();
                    let delayed = output.clone();
                    let timer = context::schedule(
                        timer_context,
                        until,
                        Box::new(move || {
                            delayed.resolve_value(value);
                        }),
                    );
                    output.notify(move |_| timer.abort());
                }
                (Ok(_), None) => {}
            });
            resolver.retain_source(source);
        });
        cancel_along(&held.resolver(), self.clone());
        held
    }
}

impl<S, F> Deferred<S, F>
where
    S: Payload,
    F: Payload + FromCancellation,
{
    /// Cancels this value with [`Cancellation::TimedOut`] unless it resolves
    /// within `after`. Returns a handle to this same value.
    ///
    /// Starts the task if it has not started yet. For failure types that
    /// cannot represent a cancellation, use
    /// `interruptible().timeout(after)`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use deferred::{Deferred, DeferredError, context};
    ///
    /// let (never, _resolver) = Deferred::<i32, DeferredError>::pending(context::default_context());
    /// let limited = never.timeout(Duration::from_millis(10));
    /// assert!(matches!(limited.get(), Err(DeferredError::TimedOut(_))));
    /// ```
    pub fn timeout(&self, after: Duration) -> Self {
        self.timeout_at(Instant::now().checked_add(after))
    }

    /// Cancels this value with [`Cancellation::TimedOut`] unless it resolves
    /// before `deadline`. `None` means no deadline; a deadline in the past
    /// cancels immediately.
    pub fn timeout_at(&self, deadline: Option<Instant>) -> Self {
        let Some(deadline) = deadline else {
            return self.clone();
        };
        if self.is_resolved() {
            return self.clone();
        }
        if deadline <= Instant::now() {
            self.cancel_with(Cancellation::timed_out("deadline already passed"));
            return self.clone();
        }
        let target = self.resolver();
        let timer = context::schedule(
            Arc::clone(self.context()),
            deadline,
            Box::new(move || {
                if target.cancel_with(Cancellation::timed_out("deadline elapsed")) {
                    tracing::debug!("deadline elapsed before resolution");
                }
            }),
        );
        self.notify(move |_| timer.abort());
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::default_context;
    use crate::error::{DeferredError, Interrupted};
    use rstest::rstest;
    use std::thread;

    const PATIENCE: Duration = Duration::from_secs(5);

    fn resolving_after(delay: Duration, value: i32) -> Deferred<i32, DeferredError> {
        Deferred::spawn(default_context(), move |resolver| {
            thread::sleep(delay);
            resolver.resolve_value(value);
        })
    }

    #[rstest]
    fn delay_holds_success_until_deadline() {
        let started = Instant::now();
        let delayed = Deferred::<i32, DeferredError>::resolved(1).delay_for(Duration::from_millis(40));
        assert_eq!(delayed.get(), Ok(1));
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[rstest]
    fn delay_forwards_failure_immediately() {
        let started = Instant::now();
        let delayed = Deferred::<i32, DeferredError>::failed(DeferredError::invalid("now"))
            .delay_for(Duration::from_secs(30));
        assert_eq!(
            delayed.wait_timeout(PATIENCE),
            Some(&Err(DeferredError::Invalid("now".into())))
        );
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[rstest]
    fn delay_in_the_past_forwards_at_once() {
        let delayed = Deferred::<i32, DeferredError>::resolved(2).delay(Instant::now());
        assert_eq!(delayed.wait_timeout(PATIENCE), Some(&Ok(2)));
    }

    #[rstest]
    fn timeout_fires_before_slow_resolution() {
        let started = Instant::now();
        let limited = resolving_after(Duration::from_millis(200), 1).timeout(Duration::from_millis(10));
        assert!(matches!(limited.get(), Err(DeferredError::TimedOut(_))));
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[rstest]
    fn timeout_leaves_fast_resolution_alone() {
        let limited = resolving_after(Duration::from_millis(10), 7).timeout(Duration::from_secs(1));
        assert_eq!(limited.get(), Ok(7));
    }

    #[rstest]
    fn timeout_without_deadline_is_noop() {
        let (pending, resolver) = Deferred::<i32, DeferredError>::pending(default_context());
        let limited = pending.timeout_at(None);
        assert!(limited.wait_timeout(Duration::from_millis(20)).is_none());
        resolver.resolve_value(3);
        assert_eq!(limited.get(), Ok(3));
    }

    #[rstest]
    fn past_deadline_cancels_immediately() {
        let (pending, _resolver) = Deferred::<i32, DeferredError>::pending(default_context());
        let limited = pending.timeout_at(Some(Instant::now()));
        assert!(matches!(limited.peek(), Some(Err(DeferredError::TimedOut(_)))));
    }

    #[rstest]
    fn timeout_on_resolved_value_keeps_result() {
        let resolved = Deferred::<i32, DeferredError>::resolved(4);
        let limited = resolved.timeout_at(Some(Instant::now()));
        assert_eq!(limited.get(), Ok(4));
    }

    #[rstest]
    fn canceling_unstarted_delay_cancels_source() {
        let (source, _resolver) = Deferred::<i32, DeferredError>::pending(default_context());
        let delayed = source.delay_for(Duration::from_secs(60));
        assert!(delayed.cancel("no longer wanted"));
        assert_eq!(source.get(), Err(DeferredError::Canceled("no longer wanted".into())));
    }

    #[rstest]
    fn interruptible_makes_any_failure_time_out() {
        let (pending, _resolver) = Deferred::<i32, String>::pending(default_context());
        let limited = pending.interruptible().timeout(Duration::from_millis(10));
        assert!(matches!(
            limited.get(),
            Err(Interrupted::Interrupted(Cancellation::TimedOut(_)))
        ));
    }
}
