//! Scheduled-action execution.
//!
//! This module orchestrates delay, deadline, attempt count, per-attempt
//! timeout, inter-attempt backoff, and cooperative cancellation for a
//! single asynchronous operation.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `params` | [`ScheduleParams`], [`AttemptSpec`], failure hook |
//! | `runner` | [`schedule_action`] and its race/attempt loop |
//!
//! # Composition
//!
//! Retry policy for transport calls lives here, not in the transport:
//! wrap [`CorrelatedClient::send`](crate::transport::CorrelatedClient::send)
//! in a [`schedule_action`] invocation to retry a call.

// ============================================================================
// Submodules
// ============================================================================

/// Scheduling parameters and attempt-plan resolution.
pub mod params;

/// The scheduled-action executor.
pub mod runner;

// ============================================================================
// Re-exports
// ============================================================================

pub use params::{AttemptSpec, FailureHook, ScheduleParams};
pub use runner::schedule_action;
