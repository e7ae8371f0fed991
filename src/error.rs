//! Error types for peerlink.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use peerlink::{Result, ScheduleParams, schedule_action};
//!
//! async fn example() -> Result<()> {
//!     let value = schedule_action(|_scope| async { Ok(42) }, ScheduleParams::new()).await?;
//!     assert_eq!(value, 42);
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Cancellation | [`Error::SignalAborted`], [`Error::DeadlineExceeded`] |
//! | Scheduling | [`Error::AttemptTimeout`], [`Error::Action`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectTimeout`], [`Error::ClosedUnexpectedly`], [`Error::NotConnected`] |
//! | Calls | [`Error::CallTimeout`], [`Error::Backpressure`], [`Error::Peer`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::CallId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Cancellation Errors
    // ========================================================================
    /// The caller-supplied cancellation signal fired.
    ///
    /// Returned when a scheduled action is torn down because the
    /// external `signal` token was triggered.
    #[error("Aborted by signal")]
    SignalAborted,

    /// The scheduling deadline elapsed.
    ///
    /// Returned when all remaining attempts are abandoned because the
    /// absolute deadline passed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    // ========================================================================
    // Scheduling Errors
    // ========================================================================
    /// A single attempt exceeded its per-attempt timeout.
    #[error("Attempt {attempt} timed out after {timeout_ms}ms")]
    AttemptTimeout {
        /// Zero-based index of the attempt that timed out.
        attempt: usize,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// A scheduled action failed on its own terms.
    ///
    /// Convenience variant for callers wrapping foreign failures; the
    /// scheduler itself propagates the action's error unchanged.
    #[error("Action failed: {message}")]
    Action {
        /// Description of the action failure.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Channel open failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Channel did not open within the connect timeout.
    #[error("Connect timeout after {timeout_ms}ms")]
    ConnectTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The channel closed while calls were still pending.
    ///
    /// Delivered uniformly to every pending call on unexpected closure.
    #[error("Transport closed unexpectedly")]
    ClosedUnexpectedly,

    /// `send` was invoked while the transport was not connected.
    #[error("Transport not initialized")]
    NotConnected,

    // ========================================================================
    // Call Errors
    // ========================================================================
    /// A pending call's per-entry timeout expired before a response
    /// arrived.
    #[error("Call {id} timed out after {timeout_ms}ms")]
    CallTimeout {
        /// The call id that timed out.
        id: CallId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Too many calls are already pending on this transport.
    #[error("Too many pending calls: {pending}/{max}")]
    Backpressure {
        /// Calls currently pending.
        pending: usize,
        /// Configured pending-call cap.
        max: usize,
    },

    /// The peer answered a call with a failure envelope.
    #[error("Peer error: {message}")]
    Peer {
        /// Message extracted from the failure envelope.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an attempt timeout error.
    #[inline]
    pub fn attempt_timeout(attempt: usize, timeout_ms: u64) -> Self {
        Self::AttemptTimeout {
            attempt,
            timeout_ms,
        }
    }

    /// Creates an action error.
    #[inline]
    pub fn action(message: impl Into<String>) -> Self {
        Self::Action {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connect timeout error.
    #[inline]
    pub fn connect_timeout(timeout_ms: u64) -> Self {
        Self::ConnectTimeout { timeout_ms }
    }

    /// Creates a call timeout error.
    #[inline]
    pub fn call_timeout(id: CallId, timeout_ms: u64) -> Self {
        Self::CallTimeout { id, timeout_ms }
    }

    /// Creates a backpressure error.
    #[inline]
    pub fn backpressure(pending: usize, max: usize) -> Self {
        Self::Backpressure { pending, max }
    }

    /// Creates a peer error.
    #[inline]
    pub fn peer(message: impl Into<String>) -> Self {
        Self::Peer {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error came from a cancellation source
    /// (signal or deadline) rather than the work itself.
    #[inline]
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::SignalAborted | Self::DeadlineExceeded)
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::AttemptTimeout { .. } | Self::ConnectTimeout { .. } | Self::CallTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectTimeout { .. }
                | Self::ClosedUnexpectedly
                | Self::NotConnected
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AttemptTimeout { .. }
                | Self::ConnectTimeout { .. }
                | Self::CallTimeout { .. }
                | Self::ClosedUnexpectedly
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
