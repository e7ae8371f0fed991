//! Correlated duplex transport.
//!
//! This module turns one unreliable duplex channel into a multiplexed
//! request/response client.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐        duplex channel        ┌─────────────────┐
//! │ CorrelatedClient │◄────────────────────────────►│  Peer process   │
//! │  state machine   │   { id, ... } envelopes      │ (helper, relay, │
//! │  + registry      │   + liveness probes          │  bridge daemon) │
//! └──────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | The consumed open/send/receive/close contract |
//! | `client` | Connection state machine and call multiplexing |
//! | `events` | Typed lifecycle events and observers |
//! | `memory` | In-process channels for tests and simulation |
//! | `ws` | WebSocket channel implementation |

// ============================================================================
// Submodules
// ============================================================================

/// The duplex-channel contract.
pub mod channel;

/// The correlated client.
pub mod client;

/// Typed transport events.
pub mod events;

/// In-memory channels for tests and simulation.
pub mod memory;

/// WebSocket channels.
pub mod ws;

/// Channel event loop (internal).
mod link;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{Channel, ChannelReader, ChannelWriter, Connector};
pub use client::{ClientConfig, ConnectionState, CorrelatedClient};
pub use events::{LinkEvent, LinkObserver};
pub use memory::{MemoryChannel, MemoryConnector, duplex_pair};
pub use ws::{WsChannel, WsConnector};
