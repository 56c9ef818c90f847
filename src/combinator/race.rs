//! Settling on the first input: `first_value` and `first_resolved`.
//!
//! `first_value` resolves with the first success and fails only once every
//! input has failed, with the failure observed last. `first_resolved`
//! resolves with the first input to resolve either way.
//!
//! The `_cancel_others` variants cancel every input once a selection is
//! made. Cancellation is best-effort: inputs that already resolved keep
//! their result.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::context::{self, ExecutionContext};
use crate::deferred::{Deferred, Payload, Resolver};
use crate::error::{DeferredError, FromCancellation};

/// Hook applied to every input once the output resolves.
type Losers<S, F> = Option<fn(&Deferred<S, F>) -> bool>;

const LOST_RACE: &str = "another input was selected";

fn cancel_loser<S, F>(input: &Deferred<S, F>) -> bool
where
    S: Send + Sync + 'static,
    F: FromCancellation + Send + Sync + 'static,
{
    input.cancel(LOST_RACE)
}

/// Applies `losers` to every input after `resolver`'s value resolves.
fn settle_losers<T, G, S, F>(resolver: &Resolver<T, G>, inputs: &[Deferred<S, F>], losers: Losers<S, F>)
where
    T: Send + Sync + 'static,
    G: Send + Sync + 'static,
    S: Send + Sync + 'static,
    F: Send + Sync + 'static,
{
    let Some(losers) = losers else {
        return;
    };
    let inputs = inputs.to_vec();
    resolver.notify(move |_| {
        let canceled = inputs.iter().filter(|input| losers(input)).count();
        tracing::debug!(inputs = inputs.len(), canceled, "race settled");
    });
}

// =============================================================================
// Collections
// =============================================================================

/// Resolves with the first input to succeed.
///
/// Fails with the last observed failure if every input fails, or with
/// [`DeferredError::Invalid`] if there are no inputs.
///
/// # Examples
///
/// ```rust
/// use deferred::{Deferred, DeferredError};
/// use deferred::combinator::first_value;
///
/// let inputs = vec![
///     Deferred::<i32, DeferredError>::failed(DeferredError::invalid("a")),
///     Deferred::resolved(5),
///     Deferred::failed(DeferredError::invalid("b")),
/// ];
/// assert_eq!(first_value(inputs).get(), Ok(5));
/// ```
pub fn first_value<S, F, I>(inputs: I) -> Deferred<S, F>
where
    S: Payload,
    F: Payload + From<DeferredError>,
    I: IntoIterator<Item = Deferred<S, F>> + Send + 'static,
{
    first_value_on(context::default_context(), inputs)
}

/// [`first_value`] with the output on `context`.
///
/// `inputs` is enumerated inside the output's task, on `context`.
pub fn first_value_on<S, F, I>(context: Arc<dyn ExecutionContext>, inputs: I) -> Deferred<S, F>
where
    S: Payload,
    F: Payload + From<DeferredError>,
    I: IntoIterator<Item = Deferred<S, F>> + Send + 'static,
{
    select_value(context, inputs, None)
}

/// [`first_value`], canceling the other inputs once one is selected.
pub fn first_value_cancel_others<S, F, I>(inputs: I) -> Deferred<S, F>
where
    S: Payload,
    F: Payload + From<DeferredError> + FromCancellation,
    I: IntoIterator<Item = Deferred<S, F>> + Send + 'static,
{
    select_value(context::default_context(), inputs, Some(cancel_loser::<S, F>))
}

fn select_value<S, F, I>(context: Arc<dyn ExecutionContext>, inputs: I, losers: Losers<S, F>) -> Deferred<S, F>
where
    S: Payload,
    F: Payload + From<DeferredError>,
    I: IntoIterator<Item = Deferred<S, F>> + Send + 'static,
{
    let handler_context = Arc::clone(&context);
    Deferred::lazy_on(context, move |resolver| {
        let inputs: Vec<Deferred<S, F>> = inputs.into_iter().collect();
        if inputs.is_empty() {
            resolver.resolve_error(DeferredError::invalid("first_value of no inputs").into());
            return;
        }
        race_values(&handler_context, &resolver, &inputs);
        settle_losers(&resolver, &inputs, losers);
        resolver.retain_source(inputs);
    })
}

/// Subscribes `resolver` to the first success among `inputs`, or to the last
/// failure if all fail. `inputs` must not be empty.
fn race_values<S, F>(context: &Arc<dyn ExecutionContext>, resolver: &Resolver<S, F>, inputs: &[Deferred<S, F>])
where
    S: Payload,
    F: Payload,
{
    let remaining = Arc::new(AtomicUsize::new(inputs.len()));
    for input in inputs {
        let remaining = Arc::clone(&remaining);
        let resolver = resolver.clone();
        input.notify_on(Arc::clone(context), move |result| match result {
            Ok(value) => {
                // resolve before counting so a concurrent last failure loses
                resolver.resolve_value(value.clone());
                remaining.fetch_sub(1, Ordering::AcqRel);
            }
            Err(failure) => {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    resolver.resolve_error(failure.clone());
                }
            }
        });
    }
}

/// Resolves with the first input to resolve, successfully or not.
///
/// Fails with [`DeferredError::Invalid`] if there are no inputs.
pub fn first_resolved<S, F, I>(inputs: I) -> Deferred<Deferred<S, F>, DeferredError>
where
    S: Send + Sync + 'static,
    F: Send + Sync + 'static,
    I: IntoIterator<Item = Deferred<S, F>> + Send + 'static,
{
    first_resolved_on(context::default_context(), inputs)
}

/// [`first_resolved`] with the output on `context`.
pub fn first_resolved_on<S, F, I>(
    context: Arc<dyn ExecutionContext>,
    inputs: I,
) -> Deferred<Deferred<S, F>, DeferredError>
where
    S: Send + Sync + 'static,
    F: Send + Sync + 'static,
    I: IntoIterator<Item = Deferred<S, F>> + Send + 'static,
{
    select_resolved(context, inputs, None)
}

/// [`first_resolved`], canceling the other inputs once one is selected.
pub fn first_resolved_cancel_others<S, F, I>(inputs: I) -> Deferred<Deferred<S, F>, DeferredError>
where
    S: Send + Sync + 'static,
    F: FromCancellation + Send + Sync + 'static,
    I: IntoIterator<Item = Deferred<S, F>> + Send + 'static,
{
    select_resolved(context::default_context(), inputs, Some(cancel_loser::<S, F>))
}

fn select_resolved<S, F, I>(
    context: Arc<dyn ExecutionContext>,
    inputs: I,
    losers: Losers<S, F>,
) -> Deferred<Deferred<S, F>, DeferredError>
where
    S: Send + Sync + 'static,
    F: Send + Sync + 'static,
    I: IntoIterator<Item = Deferred<S, F>> + Send + 'static,
{
    let handler_context = Arc::clone(&context);
    Deferred::lazy_on(context, move |resolver| {
        let inputs: Vec<Deferred<S, F>> = inputs.into_iter().collect();
        if inputs.is_empty() {
            resolver.resolve_error(DeferredError::invalid("first_resolved of no inputs"));
            return;
        }
        for input in &inputs {
            let winner = input.downgrade();
            let resolver = resolver.clone();
            input.notify_on(Arc::clone(&handler_context), move |_| {
                if let Some(winner) = winner.upgrade() {
                    resolver.resolve_value(winner);
                }
            });
        }
        settle_losers(&resolver, &inputs, losers);
        resolver.retain_source(inputs);
    })
}

// =============================================================================
// Fixed arity
// =============================================================================

/// The selected input of a two-way race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pick2<A, B> {
    /// The first input won.
    First(A),
    /// The second input won.
    Second(B),
}

/// The selected input of a three-way race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pick3<A, B, C> {
    /// The first input won.
    First(A),
    /// The second input won.
    Second(B),
    /// The third input won.
    Third(C),
}

/// The selected input of a four-way race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pick4<A, B, C, D> {
    /// The first input won.
    First(A),
    /// The second input won.
    Second(B),
    /// The third input won.
    Third(C),
    /// The fourth input won.
    Fourth(D),
}

macro_rules! race_tuple {
    ($arity:literal, $pick:ident; $($input:ident: $value:ident, $failure:ident => $variant:ident),+) => {
        paste::paste! {
            #[doc = concat!("Resolves with the first of ", stringify!($arity), " inputs to succeed, tagged by position.")]
            ///
            /// Fails with the last observed failure if every input fails.
            pub fn [<first_value $arity>]<$($value,)+ F>(
                $($input: &Deferred<$value, F>,)+
            ) -> Deferred<$pick<$($value,)+>, F>
            where
                $($value: Payload,)+
                F: Payload,
            {
                [<first_value $arity _on>](context::default_context(), $($input,)+)
            }

            #[doc = concat!("[`first_value", stringify!($arity), "`] with the output on `context`.")]
            pub fn [<first_value $arity _on>]<$($value,)+ F>(
                context: Arc<dyn ExecutionContext>,
                $($input: &Deferred<$value, F>,)+
            ) -> Deferred<$pick<$($value,)+>, F>
            where
                $($value: Payload,)+
                F: Payload,
            {
                let sources = ($($input.clone(),)+);
                let handler_context = Arc::clone(&context);
                Deferred::lazy_on(context, move |resolver| {
                    let ($($input,)+) = sources;
                    let tagged = vec![$($input.map($pick::$variant),)+];
                    race_values(&handler_context, &resolver, &tagged);
                    resolver.retain_source(tagged);
                })
            }

            #[doc = concat!("[`first_value", stringify!($arity), "`], canceling the other inputs once one is selected.")]
            pub fn [<first_value $arity _cancel_others>]<$($value,)+ F>(
                $($input: &Deferred<$value, F>,)+
            ) -> Deferred<$pick<$($value,)+>, F>
            where
                $($value: Payload,)+
                F: Payload + FromCancellation,
            {
                let output = [<first_value $arity>]($($input,)+);
                $(
                    let $input = $input.clone();
                )+
                output.on_settle(move |_| {
                    $(
                        cancel_loser(&$input);
                    )+
                });
                output
            }

            #[doc = concat!("Resolves with the first of ", stringify!($arity), " inputs to resolve, tagged by position.")]
            ///
            /// Inputs may have different failure types; the output never fails.
            pub fn [<first_resolved $arity>]<$($value, $failure,)+>(
                $($input: &Deferred<$value, $failure>,)+
            ) -> Deferred<$pick<$(Deferred<$value, $failure>,)+>, Infallible>
            where
                $($value: Send + Sync + 'static, $failure: Send + Sync + 'static,)+
            {
                [<first_resolved $arity _on>](context::default_context(), $($input,)+)
            }

            #[doc = concat!("[`first_resolved", stringify!($arity), "`] with the output on `context`.")]
            pub fn [<first_resolved $arity _on>]<$($value, $failure,)+>(
                context: Arc<dyn ExecutionContext>,
                $($input: &Deferred<$value, $failure>,)+
            ) -> Deferred<$pick<$(Deferred<$value, $failure>,)+>, Infallible>
            where
                $($value: Send + Sync + 'static, $failure: Send + Sync + 'static,)+
            {
                let sources = ($($input.clone(),)+);
                let handler_context = Arc::clone(&context);
                Deferred::lazy_on(context, move |resolver| {
                    let ($($input,)+) = sources;
                    $(
                        {
                            let winner = $input.downgrade();
                            let resolver = resolver.clone();
                            $input.notify_on(Arc::clone(&handler_context), move |_| {
                                if let Some(winner) = winner.upgrade() {
                                    resolver.resolve_value($pick::$variant(winner));
                                }
                            });
                        }
                    )+
                    resolver.retain_source(($($input,)+));
                })
            }

            #[doc = concat!("[`first_resolved", stringify!($arity), "`], canceling the other inputs once one is selected.")]
            pub fn [<first_resolved $arity _cancel_others>]<$($value, $failure,)+>(
                $($input: &Deferred<$value, $failure>,)+
            ) -> Deferred<$pick<$(Deferred<$value, $failure>,)+>, Infallible>
            where
                $($value: Send + Sync + 'static, $failure: FromCancellation + Send + Sync + 'static,)+
            {
                let output = [<first_resolved $arity>]($($input,)+);
                $(
                    let $input = $input.clone();
                )+
                output.on_settle(move |_| {
                    $(
                        cancel_loser(&$input);
                    )+
                });
                output
            }
        }
    };
}

race_tuple!(2, Pick2; first: A, FA => First, second: B, FB => Second);
race_tuple!(3, Pick3; first: A, FA => First, second: B, FB => Second, third: C, FC => Third);
race_tuple!(
    4, Pick4;
    first: A, FA => First, second: B, FB => Second, third: C, FC => Third, fourth: D, FD => Fourth
);
