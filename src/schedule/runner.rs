//! The scheduled-action executor.
//!
//! [`schedule_action`] runs an asynchronous operation under delay,
//! deadline, bounded or unbounded retry, per-attempt timeout,
//! inter-attempt backoff, and cooperative cancellation.
//!
//! # Race structure
//!
//! Three sources race with first-settled-wins semantics:
//!
//! 1. the caller's `signal` token (loser error: [`Error::SignalAborted`]),
//! 2. the deadline timer, if set ([`Error::DeadlineExceeded`]),
//! 3. the attempt loop itself, preceded by the optional `delay`.
//!
//! Whichever settles first determines the outcome; when the deadline
//! and an attempt failure land at nearly the same moment, either may
//! win. That nondeterminism is part of the contract and is not
//! resolved by a priority order.
//!
//! Once any source settles, the internal teardown token fires so every
//! attempt-scoped child token is cancelled; the losing race branches
//! are dropped, which releases their timers.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

use super::params::{AttemptPlan, AttemptSpec, FailureHook, ScheduleParams};

// ============================================================================
// Constants
// ============================================================================

/// Pacing floor for unbounded retries with no configured gap.
///
/// Without it a synchronously failing action would spin the retry loop
/// at full speed until the deadline fires.
const UNBOUNDED_GAP_FLOOR: Duration = Duration::from_millis(1);

// ============================================================================
// schedule_action
// ============================================================================

/// Runs `action` under the schedule described by `params`.
///
/// The action is invoked once per attempt with a fresh attempt-scoped
/// [`CancelToken`]; it should observe that token to stop work early.
/// Cancellation is cooperative — triggering the token settles the
/// scheduler's races immediately, but opaque in-flight work can only
/// stop itself.
///
/// Attempts are strictly sequential: attempt *k+1* never starts before
/// attempt *k* has settled.
///
/// # Errors
///
/// - [`Error::SignalAborted`] if `signal` fires (or was already fired
///   on entry, in which case neither the delay nor any attempt runs).
/// - [`Error::DeadlineExceeded`] if the deadline elapses first.
/// - [`Error::AttemptTimeout`] if the final attempt exceeds its
///   per-attempt timeout.
/// - The action's own error from the final attempt, or a veto error
///   produced by the failure hook.
pub async fn schedule_action<T, F, Fut>(mut action: F, params: ScheduleParams) -> Result<T>
where
    F: FnMut(CancelToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if let Some(signal) = &params.signal
        && signal.is_triggered()
    {
        trace!("Signal already triggered, rejecting before first attempt");
        return Err(Error::SignalAborted);
    }

    let plan = params.resolve_plan();
    let ScheduleParams {
        delay,
        deadline,
        signal,
        on_attempt_failure,
        ..
    } = params;

    let clear = CancelToken::new();

    let result = tokio::select! {
        _ = wait_signal(signal) => {
            debug!("Scheduled action aborted by signal");
            Err(Error::SignalAborted)
        }
        _ = wait_deadline(deadline) => {
            debug!("Scheduled action abandoned at deadline");
            Err(Error::DeadlineExceeded)
        }
        outcome = run_attempts(&mut action, plan, delay, on_attempt_failure, &clear) => outcome,
    };

    // Tear down any attempt scope still in flight; the losing select
    // branches were already dropped along with their timers.
    clear.trigger();

    result
}

// ============================================================================
// Race Sources
// ============================================================================

/// Resolves when the caller's signal fires; pends forever without one.
async fn wait_signal(signal: Option<CancelToken>) {
    match signal {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Resolves at the deadline; pends forever without one.
async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// Attempt Loop
// ============================================================================

/// Runs the delay and then the attempts, strictly in sequence.
async fn run_attempts<T, F, Fut>(
    action: &mut F,
    plan: AttemptPlan,
    delay: Option<Duration>,
    mut on_failure: Option<FailureHook>,
    clear: &CancelToken,
) -> Result<T>
where
    F: FnMut(CancelToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if let Some(delay) = delay {
        sleep(delay).await;
    }

    match plan {
        AttemptPlan::Bounded(specs) => {
            // resolve_plan never yields an empty bounded plan.
            let last = specs.len() - 1;

            for index in 0..last {
                match run_attempt(action, index, &specs[index], clear).await {
                    Ok(value) => return Ok(value),
                    Err(error) => {
                        debug!(attempt = index, %error, "Attempt failed, retrying");
                        if let Some(hook) = on_failure.as_mut()
                            && let Some(veto) = hook(index, &error)
                        {
                            debug!(attempt = index, "Failure hook vetoed further retries");
                            return Err(veto);
                        }
                        wait_gap(specs[index + 1].gap).await;
                    }
                }
            }

            // Final attempt: no failure-hook catch, its error or
            // timeout propagates as the terminal rejection.
            run_attempt(action, last, &specs[last], clear).await
        }

        AttemptPlan::Unbounded(spec) => {
            let gap = spec.gap.max(UNBOUNDED_GAP_FLOOR);
            let mut index = 0;
            loop {
                match run_attempt(action, index, &spec, clear).await {
                    Ok(value) => return Ok(value),
                    Err(error) => {
                        debug!(attempt = index, %error, "Attempt failed, retrying until deadline");
                        if let Some(hook) = on_failure.as_mut()
                            && let Some(veto) = hook(index, &error)
                        {
                            return Err(veto);
                        }
                        wait_gap(gap).await;
                        index += 1;
                    }
                }
            }
        }
    }
}

/// Waits the backoff gap before the next attempt.
///
/// With a zero gap this still yields once, so an action that fails
/// synchronously cannot starve the deadline and signal race branches.
async fn wait_gap(gap: Duration) {
    if gap.is_zero() {
        tokio::task::yield_now().await;
    } else {
        sleep(gap).await;
    }
}

/// Runs one attempt under its own cancellation scope and timeout.
async fn run_attempt<T, F, Fut>(
    action: &mut F,
    index: usize,
    spec: &AttemptSpec,
    clear: &CancelToken,
) -> Result<T>
where
    F: FnMut(CancelToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let scope = clear.child();
    let work = action(scope.clone());

    match spec.timeout {
        Some(limit) => match timeout(limit, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // Ask the abandoned attempt to stop its work.
                scope.trigger();
                Err(Error::attempt_timeout(index, limit.as_millis() as u64))
            }
        },
        None => work.await,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    /// Shared attempt counter for test actions.
    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = counter();
        let seen = Arc::clone(&calls);

        let value = schedule_action(
            move |_scope| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            },
            ScheduleParams::new().attempts(5),
        )
        .await
        .expect("first attempt succeeds");

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_action_runs_at_most_n_times() {
        let calls = counter();
        let seen = Arc::clone(&calls);

        let err = schedule_action::<(), _, _>(
            move |_scope| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(Error::action("always fails"))
                }
            },
            ScheduleParams::new().attempts(3),
        )
        .await
        .expect_err("all attempts fail");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, Error::Action { .. }));
    }

    #[tokio::test]
    async fn test_success_stops_further_attempts() {
        let calls = counter();
        let seen = Arc::clone(&calls);

        let value = schedule_action(
            move |_scope| {
                let seen = Arc::clone(&seen);
                async move {
                    let attempt = seen.fetch_add(1, Ordering::SeqCst);
                    if attempt == 1 {
                        Ok("second")
                    } else {
                        Err(Error::action("not yet"))
                    }
                }
            },
            ScheduleParams::new().attempts(4),
        )
        .await
        .expect("second attempt succeeds");

        assert_eq!(value, "second");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_gapped_plan_succeeds_on_third() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let started = Instant::now();

        let plan = vec![
            AttemptSpec::new(),
            AttemptSpec::new().gap(Duration::from_millis(100)),
            AttemptSpec::new().gap(Duration::from_millis(200)),
        ];

        let value = schedule_action(
            move |_scope| {
                let seen = Arc::clone(&seen);
                async move {
                    let attempt = seen.fetch_add(1, Ordering::SeqCst);
                    if attempt == 2 {
                        Ok("third time lucky")
                    } else {
                        Err(Error::action("fail"))
                    }
                }
            },
            ScheduleParams::new().plan(plan),
        )
        .await
        .expect("third attempt succeeds");

        assert_eq!(value, "third time lucky");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_wins_over_failing_action() {
        let started = Instant::now();

        let err = schedule_action::<(), _, _>(
            |_scope| async { Err(Error::action("boom")) },
            ScheduleParams::new()
                .deadline_in(Duration::from_millis(500))
                .gap(Duration::from_millis(50)),
        )
        .await
        .expect_err("deadline fires");

        assert!(matches!(err, Error::DeadlineExceeded));
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_wins_over_hung_attempt() {
        let err = schedule_action::<(), _, _>(
            |_scope| async {
                std::future::pending::<()>().await;
                unreachable!()
            },
            ScheduleParams::new().deadline_in(Duration::from_millis(200)),
        )
        .await
        .expect_err("deadline fires");

        assert!(matches!(err, Error::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_pre_triggered_signal_rejects_immediately() {
        let calls = counter();
        let seen = Arc::clone(&calls);

        let signal = CancelToken::new();
        signal.trigger();

        let err = schedule_action::<(), _, _>(
            move |_scope| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            ScheduleParams::new()
                .delay(Duration::from_secs(3600))
                .signal(signal),
        )
        .await
        .expect_err("signal already fired");

        assert!(matches!(err, Error::SignalAborted));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_aborts_mid_attempt_and_cancels_scope() {
        let scopes: Arc<Mutex<Vec<CancelToken>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&scopes);

        let signal = CancelToken::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.trigger();
        });

        let err = schedule_action::<(), _, _>(
            move |scope| {
                captured.lock().push(scope);
                async {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            },
            ScheduleParams::new().signal(signal),
        )
        .await
        .expect_err("signal fires mid-attempt");

        assert!(matches!(err, Error::SignalAborted));

        // The attempt scope was cancelled so cooperative work stops.
        let scopes = scopes.lock();
        assert_eq!(scopes.len(), 1);
        assert!(scopes[0].is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_on_final_attempt_propagates() {
        let started = Instant::now();

        let err = schedule_action::<(), _, _>(
            |_scope| async {
                std::future::pending::<()>().await;
                unreachable!()
            },
            ScheduleParams::new()
                .attempts(2)
                .timeout(Duration::from_millis(100)),
        )
        .await
        .expect_err("both attempts time out");

        assert!(matches!(err, Error::AttemptTimeout { attempt: 1, .. }));
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_failure_hook_vetoes_retries() {
        let calls = counter();
        let seen = Arc::clone(&calls);

        let err = schedule_action::<(), _, _>(
            move |_scope| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(Error::action("transient"))
                }
            },
            ScheduleParams::new()
                .attempts(5)
                .on_attempt_failure(|attempt, _error| {
                    (attempt == 1).then(|| Error::action("gave up"))
                }),
        )
        .await
        .expect_err("hook vetoes");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, Error::Action { message } if message == "gave up"));
    }

    #[tokio::test]
    async fn test_failure_hook_not_invoked_for_final_attempt() {
        let hook_calls = counter();
        let seen = Arc::clone(&hook_calls);

        let _ = schedule_action::<(), _, _>(
            |_scope| async { Err(Error::action("fail")) },
            ScheduleParams::new()
                .attempts(2)
                .on_attempt_failure(move |_attempt, _error| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    None
                }),
        )
        .await;

        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_postpones_only_first_attempt() {
        let started = Instant::now();

        let err = schedule_action::<(), _, _>(
            |_scope| async { Err(Error::action("fail")) },
            ScheduleParams::new()
                .delay(Duration::from_millis(100))
                .attempts(3),
        )
        .await
        .expect_err("all fail");

        assert!(matches!(err, Error::Action { .. }));
        // One delay, zero gaps: only the 100ms delay shows up.
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_with_default_gap_is_paced_until_it_fires() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let started = Instant::now();

        let err = schedule_action::<(), _, _>(
            move |_scope| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(Error::action("boom"))
                }
            },
            ScheduleParams::new().deadline_in(Duration::from_millis(500)),
        )
        .await
        .expect_err("deadline fires");

        assert!(matches!(err, Error::DeadlineExceeded));
        assert_eq!(started.elapsed(), Duration::from_millis(500));
        // Synchronous failures are paced at the retry floor, one per
        // millisecond, instead of spinning the loop.
        let calls = calls.load(Ordering::SeqCst);
        assert!((500..=501).contains(&calls), "paced {calls} attempts");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_keeps_retrying_until_it_fires() {
        let calls = counter();
        let seen = Arc::clone(&calls);

        let err = schedule_action::<(), _, _>(
            move |_scope| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(Error::action("boom"))
                }
            },
            ScheduleParams::new()
                .deadline_in(Duration::from_millis(500))
                .gap(Duration::from_millis(150)),
        )
        .await
        .expect_err("deadline fires");

        assert!(matches!(err, Error::DeadlineExceeded));
        // Attempts at t=0,150,300,450: four runs before the deadline.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
