//! Integration tests for the combinators.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use deferred::combinator::{
    Pick3, combine, combine3, first_resolved, first_value, first_value_on, first_value3, reduce,
    retrying,
};
use deferred::context::{self, ContextConfig, ExecutionContext, Priority, SerialContext};
use deferred::{Cancellation, Deferred, DeferredError, Interrupted, Resolver};
use rstest::{fixture, rstest};

#[fixture]
fn serial() -> Arc<dyn ExecutionContext> {
    Arc::new(SerialContext::new("combinator-tests"))
}

fn pending<S, F>() -> (Deferred<S, F>, Resolver<S, F>)
where
    S: Send + Sync + 'static,
    F: Send + Sync + 'static,
{
    Deferred::pending(context::default_context())
}

fn resolving_after(delay: Duration, value: i32) -> Deferred<i32, DeferredError> {
    Deferred::spawn(context::default_context(), move |resolver| {
        thread::sleep(delay);
        resolver.resolve_value(value);
    })
}

// =============================================================================
// Fan-in
// =============================================================================

#[rstest]
fn combine_resolves_in_input_order_regardless_of_completion() {
    let (first, first_resolver) = pending::<i32, String>();
    let (second, second_resolver) = pending::<i32, String>();
    let (third, third_resolver) = pending::<i32, String>();
    let combined = combine(vec![first, second, third]);
    combined.begin_execution();

    second_resolver.resolve_value(2);
    third_resolver.resolve_value(3);
    first_resolver.resolve_value(1);
    assert_eq!(combined.get(), Ok(vec![1, 2, 3]));
}

#[rstest]
fn combine_fails_if_any_input_fails() {
    let inputs = vec![
        Deferred::<i32, String>::resolved(1),
        Deferred::failed("broken".into()),
        Deferred::resolved(3),
    ];
    assert_eq!(combine(inputs).get(), Err("broken".to_string()));
}

#[rstest]
fn combine_failure_identity_follows_completion_order(serial: Arc<dyn ExecutionContext>) {
    let (first, first_resolver) = Deferred::<i32, String>::pending(Arc::clone(&serial));
    let (second, second_resolver) = Deferred::<i32, String>::pending(Arc::clone(&serial));
    let combined = deferred::combinator::combine_on(serial, vec![first, second]);
    combined.begin_execution();
    thread::sleep(Duration::from_millis(20));

    first_resolver.resolve_error("first".into());
    thread::sleep(Duration::from_millis(20));
    second_resolver.resolve_error("second".into());
    assert_eq!(combined.get(), Err("second".to_string()));
}

#[rstest]
fn reduce_sums_values() {
    let inputs: Vec<_> = (1..=10).map(Deferred::<u32, String>::resolved).collect();
    assert_eq!(reduce(inputs, 0, |sum, value| sum + value).get(), Ok(55));
}

#[rstest]
fn combine3_joins_heterogeneous_inputs() {
    let name = Deferred::<String, DeferredError>::resolved("deferred".into());
    let (version, version_resolver) = pending::<u32, DeferredError>();
    let stable = Deferred::<bool, DeferredError>::resolved(false);
    let joined = combine3(&name, &version, &stable);
    joined.begin_execution();
    version_resolver.resolve_value(1);
    assert_eq!(joined.get(), Ok(("deferred".to_string(), 1, false)));
}

// =============================================================================
// Race
// =============================================================================

#[rstest]
fn first_value_picks_success_among_failures(serial: Arc<dyn ExecutionContext>) {
    let (failing_a, resolver_a) = pending::<i32, DeferredError>();
    let (succeeding, resolver_success) = pending::<i32, DeferredError>();
    let (failing_b, resolver_b) = pending::<i32, DeferredError>();
    let winner = first_value_on(serial, vec![failing_a, succeeding, failing_b]);
    winner.begin_execution();
    thread::sleep(Duration::from_millis(20));

    resolver_a.resolve_error(DeferredError::invalid("A"));
    resolver_success.resolve_value(5);
    resolver_b.resolve_error(DeferredError::invalid("B"));
    assert_eq!(winner.get(), Ok(5));
}

#[rstest]
fn first_value_of_failures_surfaces_last_observed(serial: Arc<dyn ExecutionContext>) {
    let (failing_a, resolver_a) = pending::<i32, DeferredError>();
    let (failing_b, resolver_b) = pending::<i32, DeferredError>();
    let winner = first_value_on(serial, vec![failing_a, failing_b]);
    winner.begin_execution();
    thread::sleep(Duration::from_millis(20));

    resolver_a.resolve_error(DeferredError::invalid("A"));
    thread::sleep(Duration::from_millis(20));
    resolver_b.resolve_error(DeferredError::invalid("B"));
    assert_eq!(winner.get(), Err(DeferredError::Invalid("B".into())));
}

#[rstest]
fn first_value_with_no_inputs_is_invalid() {
    let winner = first_value(Vec::<Deferred<i32, DeferredError>>::new());
    assert!(matches!(winner.get(), Err(DeferredError::Invalid(_))));
}

#[rstest]
fn first_resolved_accepts_failures() {
    let slow = resolving_after(Duration::from_millis(200), 1);
    let fast = Deferred::<i32, DeferredError>::failed(DeferredError::invalid("fast"));
    let selected = first_resolved(vec![slow, fast]).get().unwrap();
    assert_eq!(selected.get(), Err(DeferredError::Invalid("fast".into())));
}

#[rstest]
fn first_value3_reports_position() {
    let (never_a, _resolver_a) = pending::<u8, String>();
    let (never_b, _resolver_b) = pending::<char, String>();
    let winner = first_value3(&never_a, &never_b, &Deferred::<i64, String>::resolved(-1));
    assert_eq!(winner.get(), Ok(Pick3::Third(-1)));
}

// =============================================================================
// Deadlines
// =============================================================================

#[rstest]
fn timeout_fires_before_slow_value() {
    let started = Instant::now();
    let limited = resolving_after(Duration::from_millis(50), 1).timeout(Duration::from_millis(10));
    assert!(matches!(limited.get(), Err(DeferredError::TimedOut(_))));
    assert!(started.elapsed() < Duration::from_millis(50));
}

#[rstest]
fn timeout_fires_while_default_context_tasks_block() {
    let started = Instant::now();
    let blocked: Vec<_> = (0..num_blocking_tasks())
        .map(|index| {
            Deferred::<usize, DeferredError>::new(move |resolver| {
                thread::sleep(Duration::from_millis(300));
                resolver.resolve_value(index);
            })
            .timeout(Duration::from_millis(10))
        })
        .collect();
    for limited in &blocked {
        assert!(matches!(limited.get(), Err(DeferredError::TimedOut(_))));
    }
    assert!(started.elapsed() < Duration::from_millis(250));
}

fn num_blocking_tasks() -> usize {
    thread::available_parallelism().map_or(4, usize::from) * 2
}

#[rstest]
fn timeout_does_not_affect_fast_value() {
    let limited = resolving_after(Duration::from_millis(10), 9).timeout(Duration::from_secs(1));
    assert_eq!(limited.get(), Ok(9));
}

#[rstest]
fn timeout_of_interruptible_wrapper() {
    let (never, _resolver) = pending::<i32, std::io::ErrorKind>();
    let limited = never.interruptible().timeout(Duration::from_millis(10));
    assert!(matches!(
        limited.get(),
        Err(Interrupted::Interrupted(Cancellation::TimedOut(_)))
    ));
}

#[rstest]
fn delay_holds_success_but_not_failure() {
    let started = Instant::now();
    let delayed = Deferred::<i32, String>::resolved(1).delay_for(Duration::from_millis(30));
    assert_eq!(delayed.get(), Ok(1));
    assert!(started.elapsed() >= Duration::from_millis(30));

    let started = Instant::now();
    let failed = Deferred::<i32, String>::failed("now".into()).delay_for(Duration::from_secs(60));
    assert_eq!(failed.get(), Err("now".to_string()));
    assert!(started.elapsed() < Duration::from_secs(60));
}

// =============================================================================
// Retry
// =============================================================================

#[rstest]
fn retrying_always_failing_task_surfaces_third_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let retried = retrying(3, move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Deferred::<(), DeferredError>::failed(DeferredError::invalid(format!("failure {attempt}")))
    });
    assert_eq!(retried.get(), Err(DeferredError::Invalid("failure 3".into())));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[rstest]
fn retrying_zero_times_never_invokes_task() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let retried = retrying(0, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Deferred::<(), DeferredError>::resolved(())
    });
    assert!(matches!(retried.get(), Err(DeferredError::Invalid(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Cancellation
// =============================================================================

#[rstest]
#[case(Ok(1))]
#[case(Err(DeferredError::invalid("own failure")))]
fn canceling_resolved_value_changes_nothing(#[case] result: Result<i32, DeferredError>) {
    let deferred = Deferred::from_result(result.clone());
    assert!(!deferred.cancel("late"));
    assert!(!deferred.cancel_with(Cancellation::timed_out("late")));
    assert_eq!(deferred.get(), result);
}

#[rstest]
fn canceling_pipeline_reaches_the_source() {
    let (source, source_resolver) = pending::<i32, DeferredError>();
    let pipeline = source
        .map(|value| value * 2)
        .validate(|value| *value > 0, "positive")
        .recover(|_| Ok(0));
    pipeline.begin_execution();
    thread::sleep(Duration::from_millis(50));

    assert!(pipeline.cancel("shutdown"));
    assert_eq!(source.get(), Err(DeferredError::Canceled("shutdown".into())));
    assert!(!source_resolver.resolve_value(1));
}

#[rstest]
fn canceling_unobserved_pipeline_reaches_the_source() {
    let (source, source_resolver) = pending::<i32, DeferredError>();
    let pipeline = source.map(|value| value * 2).recover(|_| Ok(0));

    assert!(pipeline.cancel("never started"));
    assert_eq!(source.get(), Err(DeferredError::Canceled("never started".into())));
    assert!(!source_resolver.resolve_value(1));
}

#[rstest]
fn on_cancel_hook_sees_timeout(serial: Arc<dyn ExecutionContext>) {
    let (sender, receiver) = std::sync::mpsc::channel();
    let operation = Deferred::<(), DeferredError>::spawn(serial, move |resolver| {
        resolver.on_cancel(move |failure| sender.send(failure.clone()).unwrap());
    });
    operation.timeout(Duration::from_millis(10));
    assert!(matches!(
        receiver.recv_timeout(Duration::from_secs(5)),
        Ok(DeferredError::TimedOut(_))
    ));
}

// =============================================================================
// Execution contexts
// =============================================================================

#[rstest]
fn owned_runtime_context_runs_tasks() {
    let context = ContextConfig::new()
        .worker_threads(2)
        .label("owned")
        .priority(Priority::Utility)
        .build()
        .unwrap();
    assert_eq!(context.priority(), Priority::Utility);
    let context: Arc<dyn ExecutionContext> = Arc::new(context);
    let deferred = Deferred::<i32, String>::execute(context, || Ok(6 * 7));
    assert_eq!(deferred.get(), Ok(42));
}
