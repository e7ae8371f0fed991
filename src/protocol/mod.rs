//! Wire protocol message handling.
//!
//! The transport multiplexes many concurrent calls over one duplex
//! channel; this module defines the envelope that makes the
//! multiplexing work.
//!
//! | Message | Direction | Shape |
//! |---------|-----------|-------|
//! | request | local → peer | `{ id, ...payload }` |
//! | success | peer → local | `{ id, data\|payload }` |
//! | failure | peer → local | `{ id, error: { message } }` or bare non-success |
//!
//! The payload schema inside the envelope belongs to the peer; this
//! crate only owns the `id` routing and the success/failure split.

// ============================================================================
// Submodules
// ============================================================================

/// Envelope construction and demultiplexing.
pub mod envelope;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{Inbound, outbound, parse_inbound};
