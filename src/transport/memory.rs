//! In-memory duplex channels for tests and simulation.
//!
//! [`duplex_pair`] returns two [`MemoryChannel`]s wired back-to-back:
//! frames written on one side arrive on the other. Dropping or closing
//! either side reads as a channel close on its peer, which is exactly
//! how an unexpected socket closure presents.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

use super::channel::{Channel, ChannelReader, ChannelWriter, Connector};

// ============================================================================
// MemoryChannel
// ============================================================================

/// One side of an in-process duplex pair.
pub struct MemoryChannel {
    /// Frames written by this side.
    tx: mpsc::UnboundedSender<String>,
    /// Frames written by the peer side.
    rx: mpsc::UnboundedReceiver<String>,
}

/// Creates two channels wired back-to-back.
#[must_use]
pub fn duplex_pair() -> (MemoryChannel, MemoryChannel) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    (
        MemoryChannel { tx: a_tx, rx: b_rx },
        MemoryChannel { tx: b_tx, rx: a_rx },
    )
}

impl Channel for MemoryChannel {
    type Writer = MemoryWriter;
    type Reader = MemoryReader;

    fn split(self) -> (Self::Writer, Self::Reader) {
        (
            MemoryWriter { tx: Some(self.tx) },
            MemoryReader { rx: self.rx },
        )
    }
}

// ============================================================================
// MemoryWriter / MemoryReader
// ============================================================================

/// Write half of a [`MemoryChannel`].
pub struct MemoryWriter {
    /// Dropped on close so the peer's reader sees end-of-stream.
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl ChannelWriter for MemoryWriter {
    async fn write(&mut self, text: String) -> Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(text)
                .map_err(|_| Error::connection("memory channel closed")),
            None => Err(Error::connection("memory channel closed")),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// Read half of a [`MemoryChannel`].
pub struct MemoryReader {
    /// Frames from the peer side.
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl ChannelReader for MemoryReader {
    async fn read(&mut self) -> Option<Result<String>> {
        self.rx.recv().await.map(Ok)
    }
}

// ============================================================================
// MemoryConnector
// ============================================================================

/// A connector that hands out pre-staged [`MemoryChannel`]s.
///
/// Tests stage one side of a [`duplex_pair`] here and drive the other
/// side as the fake peer. The connector counts opens so single-flight
/// connect behavior is observable.
#[derive(Default)]
pub struct MemoryConnector {
    /// Staged channels, handed out in order.
    staged: Mutex<VecDeque<MemoryChannel>>,
    /// Number of `open` calls that reached the staging queue.
    opens: AtomicUsize,
    /// Artificial open latency.
    open_delay: Duration,
}

impl MemoryConnector {
    /// Creates an empty connector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an artificial delay applied before each open completes.
    #[must_use]
    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Stages a channel for the next `open` call.
    pub fn stage(&self, channel: MemoryChannel) {
        self.staged.lock().push_back(channel);
    }

    /// Returns how many times `open` has been called.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Channel = MemoryChannel;

    async fn open(&self) -> Result<Self::Channel> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.staged
            .lock()
            .pop_front()
            .ok_or_else(|| Error::connection("no staged channel"))
    }
}

// ============================================================================
// Tests
// ============================================================================
