//! Channel event loop.
//!
//! A [`Link`] wraps one open channel in a spawned task that:
//!
//! - demultiplexes inbound frames into the correlation registry,
//! - writes outbound frames handed over from the client,
//! - fires a liveness probe after a configurable period of silence,
//! - reports how it ended (requested shutdown vs. unexpected close).
//!
//! The loop owns both channel halves and the liveness timer; when it
//! exits they are dropped with it, so no timer or listener outlives
//! the connection.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{Inbound, parse_inbound};
use crate::registry::CorrelationRegistry;

use super::channel::{Channel, ChannelReader, ChannelWriter};
use super::events::{LinkEvent, ObserverSet};

// ============================================================================
// Constants
// ============================================================================

/// Stand-in silence period when heartbeats are disabled.
const IDLE_DISABLED: Duration = Duration::from_secs(60 * 60 * 24 * 365);

// ============================================================================
// Types
// ============================================================================

/// How the event loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// A shutdown was requested from this side.
    Requested,
    /// The channel errored or the peer closed it.
    Unexpected,
}

/// Liveness configuration for one link.
pub(crate) struct HeartbeatConfig {
    /// Silence period before a probe fires; `None` disables probing.
    pub after: Option<Duration>,
    /// Pre-serialized probe frame.
    pub probe: String,
}

/// Commands from the client to the event loop.
enum LinkCommand {
    /// Write one outbound frame.
    Write(String),
    /// Close the channel and exit.
    Shutdown,
}

// ============================================================================
// Link
// ============================================================================

/// Handle to one channel's event loop.
#[derive(Clone)]
pub(crate) struct Link {
    /// Command channel into the loop.
    command_tx: mpsc::UnboundedSender<LinkCommand>,
}

impl Link {
    /// Splits `channel` and spawns its event loop.
    ///
    /// `on_closed` runs exactly once, after the loop has released the
    /// channel halves and the liveness timer.
    pub(crate) fn spawn<C: Channel>(
        channel: C,
        registry: CorrelationRegistry,
        observers: Arc<ObserverSet>,
        heartbeat: HeartbeatConfig,
        on_closed: impl FnOnce(CloseReason) + Send + 'static,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (writer, reader) = channel.split();

        tokio::spawn(async move {
            let reason =
                run_event_loop(writer, reader, command_rx, &registry, &observers, &heartbeat)
                    .await;
            debug!(?reason, "Link event loop terminated");
            on_closed(reason);
        });

        Self { command_tx }
    }

    /// Queues one outbound frame.
    ///
    /// # Errors
    ///
    /// [`Error::ClosedUnexpectedly`] if the event loop is gone.
    pub(crate) fn write(&self, text: String) -> Result<()> {
        self.command_tx
            .send(LinkCommand::Write(text))
            .map_err(|_| Error::ClosedUnexpectedly)
    }

    /// Asks the event loop to close the channel and exit.
    pub(crate) fn shutdown(&self) {
        let _ = self.command_tx.send(LinkCommand::Shutdown);
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Drives one channel until it closes; returns how it ended.
async fn run_event_loop<W, R>(
    mut writer: W,
    mut reader: R,
    mut command_rx: mpsc::UnboundedReceiver<LinkCommand>,
    registry: &CorrelationRegistry,
    observers: &ObserverSet,
    heartbeat: &HeartbeatConfig,
) -> CloseReason
where
    W: ChannelWriter,
    R: ChannelReader,
{
    let probing = heartbeat.after.is_some();
    let silence = heartbeat.after.unwrap_or(IDLE_DISABLED);

    // Liveness timer, reset on every send and every receive.
    let idle = sleep(silence);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            frame = reader.read() => {
                match frame {
                    Some(Ok(text)) => {
                        idle.as_mut().reset(Instant::now() + silence);
                        handle_inbound(&text, registry);
                    }
                    Some(Err(error)) => {
                        error!(%error, "Channel error");
                        return CloseReason::Unexpected;
                    }
                    None => {
                        debug!("Channel closed by peer");
                        return CloseReason::Unexpected;
                    }
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(LinkCommand::Write(text)) => {
                        idle.as_mut().reset(Instant::now() + silence);
                        if let Err(error) = writer.write(text).await {
                            error!(%error, "Channel write failed");
                            return CloseReason::Unexpected;
                        }
                    }
                    Some(LinkCommand::Shutdown) => {
                        let _ = writer.close().await;
                        return CloseReason::Requested;
                    }
                    None => {
                        // Every client handle is gone.
                        let _ = writer.close().await;
                        return CloseReason::Requested;
                    }
                }
            }

            () = idle.as_mut(), if probing => {
                trace!("Silence threshold reached, sending liveness probe");
                if let Err(error) = writer.write(heartbeat.probe.clone()).await {
                    // Probes are not retried; a dead channel surfaces here.
                    warn!(%error, "Liveness probe failed");
                    return CloseReason::Unexpected;
                }
                observers.emit(&LinkEvent::HeartbeatSent);
                idle.as_mut().reset(Instant::now() + silence);
            }
        }
    }
}

/// Routes one inbound frame through the registry.
///
/// Malformed frames are logged and dropped: they cannot be attributed
/// to a pending call, so surfacing them could only corrupt unrelated
/// calls.
fn handle_inbound(text: &str, registry: &CorrelationRegistry) {
    match parse_inbound(text) {
        Some(Inbound::Success { id, payload }) => registry.resolve(id, payload),
        Some(Inbound::Failure { id, message }) => registry.reject(id, Error::peer(message)),
        None => warn!(frame = %text, "Dropping malformed inbound frame"),
    }
}
