//! The duplex-channel contract consumed by the transport.
//!
//! The transport does not own a socket implementation; it consumes
//! anything that can open, send, receive, and close text frames. The
//! crate ships two implementations:
//!
//! - [`ws`](crate::transport::ws): WebSocket via tokio-tungstenite
//! - [`memory`](crate::transport::memory): in-process pair for tests
//!   and simulation

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;

// ============================================================================
// Channel Traits
// ============================================================================

/// Write half of a duplex channel.
#[async_trait]
pub trait ChannelWriter: Send + 'static {
    /// Writes one text frame.
    async fn write(&mut self, text: String) -> Result<()>;

    /// Closes the channel from this side.
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a duplex channel.
#[async_trait]
pub trait ChannelReader: Send + 'static {
    /// Receives the next inbound text frame.
    ///
    /// `None` means the channel is closed; `Some(Err(_))` is a channel
    /// error after which no further frames will arrive.
    async fn read(&mut self) -> Option<Result<String>>;
}

/// An open duplex channel, splittable into its two halves.
pub trait Channel: Send + 'static {
    /// Write half type.
    type Writer: ChannelWriter;
    /// Read half type.
    type Reader: ChannelReader;

    /// Splits the channel so reads and writes can proceed
    /// independently.
    fn split(self) -> (Self::Writer, Self::Reader);
}

// ============================================================================
// Connector
// ============================================================================

/// Opens fresh channels to a peer.
///
/// One connector may be asked to open many channels over the life of a
/// client (reconnects), but never two at once — the client's
/// single-flight connect guarantees that.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The channel type this connector produces.
    type Channel: Channel;

    /// Opens a new channel.
    async fn open(&self) -> Result<Self::Channel>;
}
