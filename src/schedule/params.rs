//! Scheduling parameters and attempt-plan resolution.
//!
//! [`ScheduleParams`] is the configuration surface of
//! [`schedule_action`](crate::schedule::schedule_action). Attempt
//! resolution follows one rule:
//!
//! - an explicit per-attempt [`plan`](ScheduleParams::plan) fixes the
//!   total attempt count, each entry governing its own attempt;
//! - a plain [`attempts`](ScheduleParams::attempts) count applies the
//!   uniform `timeout`/`gap` to every attempt;
//! - with neither given, the count is 1 — unless a `deadline` is set,
//!   in which case attempts are unbounded until the deadline fires.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::Instant;

use crate::cancel::CancelToken;
use crate::error::Error;

// ============================================================================
// Types
// ============================================================================

/// Hook invoked after a failed attempt (except the last).
///
/// Receives the zero-based attempt index and the attempt's error.
/// Returning `Some(error)` vetoes further retries: the scheduler
/// aborts immediately with that error, skipping the remaining attempts
/// and the inter-attempt gap.
pub type FailureHook = Box<dyn FnMut(usize, &Error) -> Option<Error> + Send>;

// ============================================================================
// AttemptSpec
// ============================================================================

/// Per-attempt timing: optional execution timeout and the gap waited
/// after this attempt fails before the next one starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptSpec {
    /// Per-attempt timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Backoff gap after this attempt fails.
    pub gap: Duration,
}

impl AttemptSpec {
    /// Creates a spec with no timeout and zero gap.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-attempt timeout.
    #[inline]
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the backoff gap.
    #[inline]
    #[must_use]
    pub const fn gap(mut self, gap: Duration) -> Self {
        self.gap = gap;
        self
    }
}

// ============================================================================
// Attempts
// ============================================================================

/// How the total attempt count was specified.
#[derive(Debug, Clone, Default)]
enum Attempts {
    /// Nothing specified: 1 attempt, or unbounded under a deadline.
    #[default]
    Unset,
    /// Fixed count with uniform timing.
    Count(usize),
    /// Explicit per-attempt plan; length fixes the count.
    Plan(Vec<AttemptSpec>),
}

// ============================================================================
// AttemptPlan
// ============================================================================

/// Resolved attempt schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttemptPlan {
    /// Fixed, non-empty sequence of attempts.
    Bounded(Vec<AttemptSpec>),
    /// Repeat the same spec until an outer source (deadline, signal)
    /// settles the race.
    Unbounded(AttemptSpec),
}

// ============================================================================
// ScheduleParams
// ============================================================================

/// Configuration for one scheduled action.
///
/// # Example
///
/// ```ignore
/// let params = ScheduleParams::new()
///     .attempts(3)
///     .timeout(Duration::from_secs(2))
///     .gap(Duration::from_millis(100))
///     .signal(token);
/// ```
#[derive(Default)]
pub struct ScheduleParams {
    /// Delay before the first attempt only.
    pub(crate) delay: Option<Duration>,
    /// Absolute point after which all attempts are abandoned.
    pub(crate) deadline: Option<Instant>,
    /// Attempt count specification.
    attempts: Attempts,
    /// Uniform per-attempt timeout (count form).
    pub(crate) timeout: Option<Duration>,
    /// Uniform inter-attempt gap (count form).
    pub(crate) gap: Duration,
    /// External cancellation token.
    pub(crate) signal: Option<CancelToken>,
    /// Hook invoked between failed attempts.
    pub(crate) on_attempt_failure: Option<FailureHook>,
}

impl ScheduleParams {
    /// Creates empty params: one attempt, no delay, no deadline, no
    /// timeout, zero gap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay before the first attempt.
    ///
    /// The delay is paid once; it is not repeated per attempt.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sets the absolute deadline.
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the deadline relative to now.
    #[must_use]
    pub fn deadline_in(self, from_now: Duration) -> Self {
        self.deadline(Instant::now() + from_now)
    }

    /// Sets a fixed attempt count with uniform timing.
    ///
    /// A count of 0 is treated as 1: the action always runs at least
    /// once.
    #[must_use]
    pub fn attempts(mut self, count: usize) -> Self {
        self.attempts = Attempts::Count(count);
        self
    }

    /// Sets an explicit per-attempt plan.
    ///
    /// The plan's length fixes the total attempt count; each entry's
    /// timing governs that specific attempt. An empty plan is treated
    /// as if no attempt count was given.
    #[must_use]
    pub fn plan(mut self, plan: Vec<AttemptSpec>) -> Self {
        self.attempts = if plan.is_empty() {
            Attempts::Unset
        } else {
            Attempts::Plan(plan)
        };
        self
    }

    /// Sets the uniform per-attempt timeout (count form).
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the uniform inter-attempt gap (count form).
    #[must_use]
    pub fn gap(mut self, gap: Duration) -> Self {
        self.gap = gap;
        self
    }

    /// Attaches an external cancellation token.
    #[must_use]
    pub fn signal(mut self, signal: CancelToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Installs the attempt-failure hook.
    #[must_use]
    pub fn on_attempt_failure(
        mut self,
        hook: impl FnMut(usize, &Error) -> Option<Error> + Send + 'static,
    ) -> Self {
        self.on_attempt_failure = Some(Box::new(hook));
        self
    }

    /// Resolves the attempt specification into a concrete plan.
    pub(crate) fn resolve_plan(&self) -> AttemptPlan {
        let uniform = AttemptSpec {
            timeout: self.timeout,
            gap: self.gap,
        };

        match &self.attempts {
            Attempts::Plan(plan) => AttemptPlan::Bounded(plan.clone()),
            Attempts::Count(count) => AttemptPlan::Bounded(vec![uniform; (*count).max(1)]),
            Attempts::Unset if self.deadline.is_some() => AttemptPlan::Unbounded(uniform),
            Attempts::Unset => AttemptPlan::Bounded(vec![uniform]),
        }
    }
}

impl std::fmt::Debug for ScheduleParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleParams")
            .field("delay", &self.delay)
            .field("deadline", &self.deadline)
            .field("attempts", &self.attempts)
            .field("timeout", &self.timeout)
            .field("gap", &self.gap)
            .field("has_signal", &self.signal.is_some())
            .field("has_failure_hook", &self.on_attempt_failure.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
