//! Peerlink - correlated calls to unreliable peers.
//!
//! This library makes it tractable to call external, unreliable peers
//! — helper processes, signaling relays, bridge daemons — over duplex
//! channels that can stall, drop, or close at any time. Two
//! tightly-coupled primitives do the work:
//!
//! - [`schedule_action`]: a generic scheduled-action executor running
//!   an async operation under delay, deadline, bounded/unbounded
//!   retry, per-attempt timeout, backoff, and cooperative cancellation.
//! - [`CorrelatedClient`]: a request/response transport built on the
//!   same primitives, multiplexing many concurrent calls over one
//!   duplex channel with per-call ids, liveness heartbeats, and
//!   all-or-nothing teardown.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use serde_json::json;
//! use peerlink::{
//!     ClientConfig, CorrelatedClient, Result, ScheduleParams, WsConnector, schedule_action,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connector = WsConnector::new("ws://127.0.0.1:7700")?;
//!     let client = CorrelatedClient::new(connector, ClientConfig::new())?;
//!     client.connect().await?;
//!
//!     // Retry policy is composed around send, not baked into it.
//!     let status = schedule_action(
//!         |_scope| client.send(json!({ "method": "relay.status" })),
//!         ScheduleParams::new()
//!             .attempts(3)
//!             .gap(Duration::from_millis(200)),
//!     )
//!     .await?;
//!     println!("relay status: {status}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cancel`] | Composable one-shot cancellation tokens |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire envelope construction and demux |
//! | [`registry`] | Pending-call correlation registry |
//! | [`schedule`] | Scheduled-action executor |
//! | [`transport`] | Duplex-channel client and channel contract |
//!
//! # Guarantees and non-guarantees
//!
//! Per-call correlation guarantees each response settles exactly the
//! matching pending call regardless of arrival order; attempts within
//! one scheduled action are strictly sequential. There is no
//! exactly-once delivery to the peer, no persistence of pending calls
//! across restarts, and no ordering between independent calls.

// ============================================================================
// Modules
// ============================================================================

/// Composable one-shot cancellation tokens.
pub mod cancel;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Wire protocol envelope handling.
pub mod protocol;

/// Request/response correlation registry.
pub mod registry;

/// Scheduled-action execution.
pub mod schedule;

/// Correlated duplex transport.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Cancellation
pub use cancel::CancelToken;

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CallId, ObserverId};

// Registry types
pub use registry::{CorrelationRegistry, PendingCall, RegistryConfig};

// Scheduling types
pub use schedule::{AttemptSpec, ScheduleParams, schedule_action};

// Transport types
pub use transport::{
    ClientConfig, ConnectionState, Connector, CorrelatedClient, LinkEvent, LinkObserver,
    MemoryConnector, WsConnector,
};
