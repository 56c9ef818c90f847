//! Waiting for every input: `combine` and `reduce`.
//!
//! The output resolves once all inputs have resolved. If every input
//! succeeded, values are folded in input order regardless of completion
//! order. Otherwise the output fails with the failure of the input that was
//! *observed* failing last, which depends on completion order and may differ
//! between runs.

use std::sync::Arc;

use parking_lot::Mutex;

use super::Tally;
use crate::context::{self, ExecutionContext};
use crate::deferred::{Deferred, Payload, WeakDeferred};

/// Collects the success values of `inputs`, in input order.
///
/// # Examples
///
/// ```rust
/// use deferred::Deferred;
/// use deferred::combinator::combine;
///
/// let inputs = vec![
///     Deferred::<i32, String>::resolved(1),
///     Deferred::resolved(2),
///     Deferred::resolved(3),
/// ];
/// assert_eq!(combine(inputs).get(), Ok(vec![1, 2, 3]));
/// ```
pub fn combine<S, F, I>(inputs: I) -> Deferred<Vec<S>, F>
where
    S: Payload,
    F: Payload,
    I: IntoIterator<Item = Deferred<S, F>> + Send + 'static,
{
    combine_on(context::default_context(), inputs)
}

/// [`combine`] with the output on `context`.
pub fn combine_on<S, F, I>(context: Arc<dyn ExecutionContext>, inputs: I) -> Deferred<Vec<S>, F>
where
    S: Payload,
    F: Payload,
    I: IntoIterator<Item = Deferred<S, F>> + Send + 'static,
{
    reduce_on(context, inputs, Vec::new(), |mut values, value| {
        values.push(value);
        values
    })
}

/// Folds the success values of `inputs`, in input order, starting from
/// `initial`. No input yields `initial`.
///
/// If `fold` panics the output never resolves.
pub fn reduce<S, F, A, I>(
    inputs: I,
    initial: A,
    fold: impl FnMut(A, S) -> A + Send + 'static,
) -> Deferred<A, F>
where
    S: Payload,
    F: Payload,
    A: Send + Sync + 'static,
    I: IntoIterator<Item = Deferred<S, F>> + Send + 'static,
{
    reduce_on(context::default_context(), inputs, initial, fold)
}

/// [`reduce`] with the output on `context`.
///
/// `inputs` is enumerated inside the output's task, on `context`.
pub fn reduce_on<S, F, A, I>(
    context: Arc<dyn ExecutionContext>,
    inputs: I,
    initial: A,
    fold: impl FnMut(A, S) -> A + Send + 'static,
) -> Deferred<A, F>
where
    S: Payload,
    F: Payload,
    A: Send + Sync + 'static,
    I: IntoIterator<Item = Deferred<S, F>> + Send + 'static,
{
    let handler_context = Arc::clone(&context);
    Deferred::lazy_on(context, move |resolver| {
        let inputs: Vec<Deferred<S, F>> = inputs.into_iter().collect();
        if inputs.is_empty() {
            resolver.resolve_value(initial);
            return;
        }
        tracing::trace!(inputs = inputs.len(), "reducing");
        let tally = Arc::new(Tally::new(inputs.len()));
        let weak: Arc<[WeakDeferred<S, F>]> = inputs.iter().map(Deferred::downgrade).collect();
        let state = Arc::new(Mutex::new(Some((initial, fold))));
        for (index, input) in inputs.iter().enumerate() {
            let tally = Arc::clone(&tally);
            let weak = Arc::clone(&weak);
            let state = Arc::clone(&state);
            let resolver = resolver.clone();
            input.notify_on(Arc::clone(&handler_context), move |result| {
                if !tally.arrive(index, result.is_err()) {
                    return;
                }
                if let Some(failed) = tally.last_failure() {
                    if let Some(Err(failure)) = weak[failed].upgrade().as_ref().and_then(Deferred::peek) {
                        resolver.resolve_error(failure.clone());
                    }
                    return;
                }
                let Some((mut accumulated, mut fold)) = state.lock().take() else {
                    return;
                };
                for input in weak.iter() {
                    let Some(Ok(value)) = input.upgrade().as_ref().and_then(Deferred::peek).cloned() else {
                        return;
                    };
                    accumulated = fold(accumulated, value);
                }
                resolver.resolve_value(accumulated);
            });
        }
        resolver.retain_source(inputs);
    })
}

macro_rules! combine_tuple {
    ($arity:literal; $($input:ident: $value:ident => $index:tt),+) => {
        paste::paste! {
            #[doc = concat!("Collects the values of ", stringify!($arity), " inputs with different success types.")]
            pub fn [<combine $arity>]<$($value,)+ F>(
                $($input: &Deferred<$value, F>,)+
            ) -> Deferred<($($value,)+), F>
            where
                $($value: Payload,)+
                F: Payload,
            {
                [<combine $arity _on>](context::default_context(), $($input,)+)
            }

            #[doc = concat!("[`combine", stringify!($arity), "`] with the output on `context`.")]
            pub fn [<combine $arity _on>]<$($value,)+ F>(
                context: Arc<dyn ExecutionContext>,
                $($input: &Deferred<$value, F>,)+
            ) -> Deferred<($($value,)+), F>
            where
                $($value: Payload,)+
                F: Payload,
            {
                let sources = ($($input.clone(),)+);
                let handler_context = Arc::clone(&context);
                Deferred::lazy_on(context, move |resolver| {
                    let tally = Arc::new(Tally::new($arity));
                    let weak = ($(sources.$index.downgrade(),)+);
                    let finish = {
                        let tally = Arc::clone(&tally);
                        let resolver = resolver.clone();
                        Arc::new(move || {
                            let outcome = match tally.last_failure() {
                                Some(failed) => match failed {
                                    $($index => weak.$index
                                        .upgrade()
                                        .and_then(|input| input.peek()?.clone().err())
                                        .map(Err),)+
                                    _ => None,
                                },
                                None => (|| {
                                    Some(Ok(($(weak.$index.upgrade()?.peek()?.clone().ok()?,)+)))
                                })(),
                            };
                            if let Some(outcome) = outcome {
                                resolver.resolve(outcome);
                            }
                        })
                    };
                    $(
                        {
                            let tally = Arc::clone(&tally);
                            let finish = Arc::clone(&finish);
                            sources.$index.notify_on(Arc::clone(&handler_context), move |result| {
                                if tally.arrive($index, result.is_err()) {
                                    finish();
                                }
                            });
                        }
                    )+
                    resolver.retain_source(sources);
                })
            }
        }
    };
}

combine_tuple!(2; first: A => 0, second: B => 1);
combine_tuple!(3; first: A => 0, second: B => 1, third: C => 2);
combine_tuple!(4; first: A => 0, second: B => 1, third: C => 2, fourth: D => 3);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SerialContext;
    use crate::error::DeferredError;
    use rstest::rstest;
    use std::thread;
    use std::time::Duration;

    fn pending() -> (Deferred<i32, String>, crate::Resolver<i32, String>) {
        Deferred::pending(context::default_context())
    }

    #[rstest]
    fn combine_preserves_input_order_under_reverse_completion() {
        let (first, first_resolver) = pending();
        let (second, second_resolver) = pending();
        let (third, third_resolver) = pending();
        let combined = combine(vec![first, second, third]);
        combined.begin_execution();

        third_resolver.resolve_value(3);
        second_resolver.resolve_value(2);
        assert!(combined.wait_timeout(Duration::from_millis(20)).is_none());
        first_resolver.resolve_value(1);
        assert_eq!(combined.get(), Ok(vec![1, 2, 3]));
    }

    #[rstest]
    fn combine_waits_for_every_input_even_after_failure() {
        let (first, first_resolver) = pending();
        let (second, second_resolver) = pending();
        let combined = combine(vec![first, second]);
        combined.begin_execution();

        first_resolver.resolve_error("first".into());
        assert!(combined.wait_timeout(Duration::from_millis(30)).is_none());
        second_resolver.resolve_value(2);
        assert_eq!(combined.get(), Err("first".to_string()));
    }

    #[rstest]
    fn combine_reports_last_observed_failure() {
        let serial: Arc<dyn ExecutionContext> = Arc::new(SerialContext::new("fan-in"));
        let (first, first_resolver) = Deferred::<i32, String>::pending(Arc::clone(&serial));
        let (second, second_resolver) = Deferred::<i32, String>::pending(Arc::clone(&serial));
        let combined = combine_on(serial, vec![first, second]);
        combined.begin_execution();
        thread::sleep(Duration::from_millis(20));

        second_resolver.resolve_error("second".into());
        thread::sleep(Duration::from_millis(20));
        first_resolver.resolve_error("first".into());
        assert_eq!(combined.get(), Err("first".to_string()));
    }

    #[rstest]
    fn empty_combine_resolves_to_empty_vec() {
        let combined = combine(Vec::<Deferred<i32, String>>::new());
        assert_eq!(combined.get(), Ok(vec![]));
    }

    #[rstest]
    fn reduce_folds_in_input_order() {
        let inputs = ["a", "b", "c"].map(Deferred::<&str, String>::resolved);
        let joined = reduce(inputs, String::new(), |mut text, part| {
            text.push_str(part);
            text
        });
        assert_eq!(joined.get(), Ok("abc".to_string()));
    }

    #[rstest]
    fn empty_reduce_yields_initial() {
        let total = reduce(Vec::<Deferred<i32, String>>::new(), 10, |sum, value| sum + value);
        assert_eq!(total.get(), Ok(10));
    }

    #[rstest]
    fn combine_tuples_keep_heterogeneous_types() {
        let number = Deferred::<i32, DeferredError>::resolved(1);
        let text = Deferred::<&str, DeferredError>::resolved("two");
        let flag = Deferred::<bool, DeferredError>::resolved(true);
        assert_eq!(combine2(&number, &text).get(), Ok((1, "two")));
        assert_eq!(combine3(&number, &text, &flag).get(), Ok((1, "two", true)));
        assert_eq!(
            combine4(&number, &text, &flag, &Deferred::resolved(4.0_f64)).get(),
            Ok((1, "two", true, 4.0))
        );
    }

    #[rstest]
    fn combine_tuple_fails_when_any_input_fails() {
        let number = Deferred::<i32, DeferredError>::resolved(1);
        let broken = Deferred::<u8, DeferredError>::failed(DeferredError::invalid("broken"));
        assert_eq!(
            combine2(&number, &broken).get(),
            Err(DeferredError::Invalid("broken".into()))
        );
    }

    #[rstest]
    fn combine_does_not_keep_unresolved_inputs_alive_after_drop() {
        let (input, resolver) = pending();
        let combined = combine(vec![input]);
        combined.begin_execution();
        thread::sleep(Duration::from_millis(20));
        assert!(resolver.needs_resolution());
        drop(combined);
        assert!(!resolver.needs_resolution());
    }
}
