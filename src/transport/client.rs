//! Correlated request/response client.
//!
//! [`CorrelatedClient`] multiplexes many concurrent calls over one
//! duplex channel using per-call identifiers. It owns the connection
//! state machine, the single-flight connect path, and the teardown
//! rules; per-call bookkeeping lives in the
//! [`CorrelationRegistry`](crate::registry::CorrelationRegistry) and
//! channel I/O in the link event loop.
//!
//! # State machine
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──channel-open──► Connected
//!       ▲                         │                            │
//!       │     open error/timeout/ │ disconnect()/dispose()     │ disconnect()/
//!       │◄────────────────────────┘                            │ close/error
//!       │                                                      ▼
//!       └◄───────────────close-completion─────────────────  Closing
//! ```
//!
//! A `connect()` issued while `Closing` waits for the close to
//! complete before starting a new attempt, so two live channels can
//! never race. Each connect attempt runs in its own task: dropping a
//! caller's `connect` future detaches only that caller, and a teardown
//! during `Connecting` abandons the attempt — if the open still
//! completes, its channel is shut down instead of installed.
//!
//! # What this client does not do
//!
//! It never retries on the caller's behalf. Retry policy is composed
//! one layer up by wrapping [`send`](CorrelatedClient::send) in
//! [`schedule_action`](crate::schedule::schedule_action).

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ObserverId;
use crate::protocol;
use crate::registry::{CorrelationRegistry, RegistryConfig};

use super::channel::Connector;
use super::events::{LinkEvent, LinkObserver, ObserverSet};
use super::link::{CloseReason, HeartbeatConfig, Link};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for the channel-open handshake (10s).
///
/// Distinct from the per-call timeout: this one bounds `connect`, the
/// other bounds each pending call.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default silence period before a liveness probe fires (30s).
pub const DEFAULT_HEARTBEAT_AFTER: Duration = Duration::from_secs(30);

/// Default cap on concurrently pending calls.
pub const DEFAULT_MAX_PENDING: usize = 100;

// ============================================================================
// ClientConfig
// ============================================================================

/// Configuration for a [`CorrelatedClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Timeout for the channel-open handshake.
    pub connect_timeout: Duration,
    /// Per-call timeout; `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
    /// Cap on concurrently pending calls.
    pub max_pending: usize,
    /// Silence period before a liveness probe; `None` disables probes.
    pub heartbeat_after: Option<Duration>,
    /// Probe frame; its schema belongs to the peer protocol.
    pub heartbeat_probe: Value,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: Some(crate::registry::DEFAULT_CALL_TIMEOUT),
            max_pending: DEFAULT_MAX_PENDING,
            heartbeat_after: Some(DEFAULT_HEARTBEAT_AFTER),
            heartbeat_probe: json!({ "method": "ping" }),
        }
    }
}

impl ClientConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the pending-call cap.
    #[must_use]
    pub fn max_pending(mut self, max: usize) -> Self {
        self.max_pending = max;
        self
    }

    /// Sets the heartbeat silence period.
    #[must_use]
    pub fn heartbeat_after(mut self, after: Option<Duration>) -> Self {
        self.heartbeat_after = after;
        self
    }

    /// Sets the heartbeat probe frame.
    #[must_use]
    pub fn heartbeat_probe(mut self, probe: Value) -> Self {
        self.heartbeat_probe = probe;
        self
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel, no connect in flight.
    Disconnected,
    /// A connect is in flight; further `connect` calls share it.
    Connecting,
    /// Channel open, calls may be sent.
    Connected,
    /// A close is in flight; `connect` waits for its completion.
    Closing,
}

// ============================================================================
// Internal State
// ============================================================================

/// Why a connect attempt failed, in a shape every waiter can receive.
#[derive(Clone, Debug)]
enum ConnectFailure {
    /// The channel did not open within the connect timeout.
    Timeout(u64),
    /// The open failed, or the attempt was aborted by a teardown.
    Failed(String),
}

impl ConnectFailure {
    fn into_error(self) -> Error {
        match self {
            Self::Timeout(timeout_ms) => Error::connect_timeout(timeout_ms),
            Self::Failed(message) => Error::connection(message),
        }
    }
}

/// What a teardown request found to dismantle.
enum Teardown {
    /// A live link to shut down.
    Link(Link),
    /// An in-flight connect attempt's waiters.
    Attempt(Vec<oneshot::Sender<StdResult<(), ConnectFailure>>>),
}

/// The state machine's internal representation.
enum LinkState {
    /// No channel.
    Disconnected,
    /// Connect in flight; waiters share its outcome.
    Connecting {
        /// Identifies the attempt, so an abandoned open can tell it
        /// was superseded.
        attempt: u64,
        /// Callers coalesced onto the in-flight connect.
        waiters: Vec<oneshot::Sender<StdResult<(), ConnectFailure>>>,
    },
    /// Channel open.
    Connected {
        /// Handle to the channel's event loop.
        link: Link,
        /// Guards against a stale loop's close notification.
        generation: u64,
    },
    /// Close in flight; waiters resume once it completes.
    Closing {
        /// Callers waiting for close-completion before reconnecting.
        waiters: Vec<oneshot::Sender<()>>,
    },
}

/// Shared client internals.
struct ClientInner<C: Connector> {
    /// Opens channels to the peer.
    connector: C,
    /// Client configuration.
    config: ClientConfig,
    /// Pre-serialized heartbeat probe.
    probe_text: String,
    /// Pending-call owner.
    registry: CorrelationRegistry,
    /// Registered lifecycle observers.
    observers: Arc<ObserverSet>,
    /// Connection state machine.
    state: Mutex<LinkState>,
    /// Mints connect-attempt ids, which double as link generations.
    generation: AtomicU64,
}

// ============================================================================
// CorrelatedClient
// ============================================================================

/// A duplex-channel client with per-call correlation.
///
/// Clones share the same connection and registry. All operations are
/// non-blocking; waiting is expressed as future suspension.
///
/// # Example
///
/// ```ignore
/// let client = CorrelatedClient::new(WsConnector::new("ws://127.0.0.1:7700")?, ClientConfig::new())?;
/// client.connect().await?;
/// let reply = client.send(json!({ "method": "relay.status" })).await?;
/// ```
pub struct CorrelatedClient<C: Connector> {
    /// Shared internals.
    inner: Arc<ClientInner<C>>,
}

impl<C: Connector> Clone for CorrelatedClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> CorrelatedClient<C> {
    /// Creates a client over `connector`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the configured heartbeat probe does
    /// not serialize.
    pub fn new(connector: C, config: ClientConfig) -> Result<Self> {
        let probe_text = serde_json::to_string(&config.heartbeat_probe)?;
        let registry = CorrelationRegistry::new(RegistryConfig {
            call_timeout: config.call_timeout,
            on_timeout: None,
        });

        Ok(Self {
            inner: Arc::new(ClientInner {
                connector,
                config,
                probe_text,
                registry,
                observers: Arc::new(ObserverSet::new()),
                state: Mutex::new(LinkState::Disconnected),
                generation: AtomicU64::new(0),
            }),
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connects to the peer.
    ///
    /// Single-flight: if a connect is already in progress, this call
    /// shares its outcome instead of opening a second channel. If a
    /// close is in progress, the call first waits for close-completion
    /// so two live channels never race.
    ///
    /// The attempt itself runs in its own task: dropping this future
    /// (a caller-side timeout, an abandoned retry) detaches only that
    /// caller, never the shared attempt.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectTimeout`] if the channel does not open in time
    /// - [`Error::Connection`] if the open fails or the attempt is
    ///   aborted by [`disconnect`](Self::disconnect) or
    ///   [`dispose`](Self::dispose)
    pub async fn connect(&self) -> Result<()> {
        loop {
            enum Plan {
                AlreadyConnected,
                Join(oneshot::Receiver<StdResult<(), ConnectFailure>>),
                AwaitClose(oneshot::Receiver<()>),
                Lead(u64, oneshot::Receiver<StdResult<(), ConnectFailure>>),
            }

            let plan = {
                let mut state = self.inner.state.lock();
                match &mut *state {
                    LinkState::Connected { .. } => Plan::AlreadyConnected,
                    LinkState::Connecting { waiters, .. } => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        Plan::Join(rx)
                    }
                    LinkState::Closing { waiters } => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        Plan::AwaitClose(rx)
                    }
                    LinkState::Disconnected => {
                        let attempt = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
                        let (tx, rx) = oneshot::channel();
                        *state = LinkState::Connecting {
                            attempt,
                            waiters: vec![tx],
                        };
                        Plan::Lead(attempt, rx)
                    }
                }
            };

            match plan {
                Plan::AlreadyConnected => return Ok(()),
                Plan::Join(rx) => return Self::connect_outcome(rx).await,
                Plan::AwaitClose(rx) => {
                    trace!("Connect waiting for close-completion");
                    let _ = rx.await;
                    // Re-evaluate from the top; someone else may lead.
                }
                Plan::Lead(attempt, rx) => {
                    tokio::spawn(Self::drive_connect(Arc::clone(&self.inner), attempt));
                    return Self::connect_outcome(rx).await;
                }
            }
        }
    }

    /// Maps a connect waiter's settlement onto the public error surface.
    async fn connect_outcome(rx: oneshot::Receiver<StdResult<(), ConnectFailure>>) -> Result<()> {
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(failure)) => Err(failure.into_error()),
            Err(_) => Err(Error::connection("connect aborted")),
        }
    }

    /// Emits a disconnect notification and closes the channel.
    ///
    /// While a connect is in flight, the attempt is aborted instead:
    /// its waiters fail, and if the open still completes the channel
    /// is shut down rather than installed.
    ///
    /// Does not clear the registry: callers that mean "tear down" must
    /// also settle pending calls, or use [`dispose`](Self::dispose).
    pub fn disconnect(&self) {
        match self.take_connection() {
            Some(Teardown::Link(link)) => {
                debug!("Disconnect requested");
                self.inner.observers.emit(&LinkEvent::Disconnected);
                link.shutdown();
            }
            Some(Teardown::Attempt(waiters)) => {
                debug!("Disconnect aborted in-flight connect");
                for waiter in waiters {
                    let _ = waiter.send(Err(ConnectFailure::Failed("connect aborted".into())));
                }
            }
            None => {}
        }
    }

    /// Removes every observer, closes the channel or aborts an
    /// in-flight connect, and rejects all pending calls.
    ///
    /// Equivalent to an unexpected close with the observers silenced
    /// first.
    pub fn dispose(&self) {
        self.inner.observers.clear();

        match self.take_connection() {
            Some(Teardown::Link(link)) => link.shutdown(),
            Some(Teardown::Attempt(waiters)) => {
                for waiter in waiters {
                    let _ = waiter.send(Err(ConnectFailure::Failed("connect aborted".into())));
                }
            }
            None => {}
        }
        self.inner.registry.reject_all(|| Error::ClosedUnexpectedly);
        debug!("Client disposed");
    }

    /// Dismantles the current connection state.
    ///
    /// `Connected` moves to `Closing`, where close-completion resumes
    /// any reconnect waiters; `Connecting` moves straight to
    /// `Disconnected`, leaving the attempt's owning task to discard
    /// its channel when the open settles.
    fn take_connection(&self) -> Option<Teardown> {
        let mut state = self.inner.state.lock();
        match &mut *state {
            LinkState::Connected { link, .. } => {
                let link = link.clone();
                *state = LinkState::Closing {
                    waiters: Vec::new(),
                };
                Some(Teardown::Link(link))
            }
            LinkState::Connecting { waiters, .. } => {
                let waiters = std::mem::take(waiters);
                *state = LinkState::Disconnected;
                Some(Teardown::Attempt(waiters))
            }
            _ => None,
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Sends one correlated call and waits for its settlement.
    ///
    /// The correlation id is merged into `payload` to form the wire
    /// envelope; the matching response settles the returned future no
    /// matter what order responses arrive in.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the client is not connected
    /// - [`Error::Backpressure`] if too many calls are pending
    /// - [`Error::CallTimeout`] if no response arrives in time
    /// - [`Error::Peer`] if the peer answers with a failure envelope
    /// - [`Error::ClosedUnexpectedly`] if the channel dies first
    pub async fn send(&self, payload: Value) -> Result<Value> {
        let link = match &*self.inner.state.lock() {
            LinkState::Connected { link, .. } => link.clone(),
            _ => return Err(Error::NotConnected),
        };

        let pending = self.inner.registry.pending_count();
        if pending >= self.inner.config.max_pending {
            warn!(
                pending,
                max = self.inner.config.max_pending,
                "Rejecting call, too many pending"
            );
            return Err(Error::backpressure(pending, self.inner.config.max_pending));
        }

        let (id, call) = self.inner.registry.create();
        let envelope = protocol::outbound(id, payload);

        match serde_json::to_string(&envelope) {
            Ok(text) => {
                if let Err(error) = link.write(text) {
                    self.inner.registry.reject(id, error);
                } else {
                    trace!(%id, "Call sent");
                }
            }
            Err(error) => {
                self.inner.registry.reject(id, Error::Json(error));
            }
        }

        call.settled().await
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Returns the observable connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match &*self.inner.state.lock() {
            LinkState::Disconnected => ConnectionState::Disconnected,
            LinkState::Connecting { .. } => ConnectionState::Connecting,
            LinkState::Connected { .. } => ConnectionState::Connected,
            LinkState::Closing { .. } => ConnectionState::Closing,
        }
    }

    /// Returns `true` while connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the number of unsettled calls.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.registry.pending_count()
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Registers a lifecycle observer.
    pub fn register_observer(&self, observer: Arc<dyn LinkObserver>) -> ObserverId {
        self.inner.observers.register(observer)
    }

    /// Unregisters an observer; returns `false` for unknown handles.
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.unregister(id)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Owns one connect attempt, from open to installation.
    ///
    /// Runs in its own task so a caller dropping its `connect` future
    /// cannot strand the attempt. The attempt's id doubles as the
    /// installed link's generation.
    async fn drive_connect(inner: Arc<ClientInner<C>>, attempt: u64) {
        let limit = inner.config.connect_timeout;

        // On expiry the open future is dropped, which forces any
        // half-open channel closed.
        let outcome = match timeout(limit, inner.connector.open()).await {
            Err(_elapsed) => Err(ConnectFailure::Timeout(limit.as_millis() as u64)),
            Ok(Err(error)) => Err(ConnectFailure::Failed(error.to_string())),
            Ok(Ok(channel)) => {
                let closer = Arc::clone(&inner);
                Ok(Link::spawn(
                    channel,
                    inner.registry.clone(),
                    Arc::clone(&inner.observers),
                    HeartbeatConfig {
                        after: inner.config.heartbeat_after,
                        probe: inner.probe_text.clone(),
                    },
                    move |reason| Self::on_link_closed(&closer, attempt, reason),
                ))
            }
        };

        match outcome {
            Ok(link) => {
                let waiters = {
                    let mut state = inner.state.lock();
                    match &mut *state {
                        LinkState::Connecting {
                            attempt: current,
                            waiters,
                        } if *current == attempt => {
                            let waiters = std::mem::take(waiters);
                            *state = LinkState::Connected {
                                link: link.clone(),
                                generation: attempt,
                            };
                            Some(waiters)
                        }
                        _ => None,
                    }
                };

                match waiters {
                    Some(waiters) => {
                        for waiter in waiters {
                            let _ = waiter.send(Ok(()));
                        }
                        debug!(generation = attempt, "Connected");
                        inner.observers.emit(&LinkEvent::Connected);
                    }
                    None => {
                        // Abandoned mid-open: nobody wants this channel.
                        debug!(attempt, "Connect attempt abandoned, closing channel");
                        link.shutdown();
                    }
                }
            }
            Err(failure) => {
                let waiters = {
                    let mut state = inner.state.lock();
                    match &mut *state {
                        LinkState::Connecting {
                            attempt: current,
                            waiters,
                        } if *current == attempt => {
                            let waiters = std::mem::take(waiters);
                            *state = LinkState::Disconnected;
                            waiters
                        }
                        _ => Vec::new(),
                    }
                };

                warn!(attempt, ?failure, "Connect failed");
                for waiter in waiters {
                    let _ = waiter.send(Err(failure.clone()));
                }
            }
        }
    }

    /// Finalizes state when a link's event loop exits.
    ///
    /// A requested close only completes the `Closing` state; an
    /// unexpected close additionally rejects every pending call and
    /// notifies observers.
    fn on_link_closed(inner: &Arc<ClientInner<C>>, generation: u64, reason: CloseReason) {
        enum Cleanup {
            /// Close we asked for: resume close-waiters, keep registry.
            Requested(Vec<oneshot::Sender<()>>),
            /// Close nobody asked for: reject pending, notify.
            Unexpected,
            /// A newer link already took over.
            Stale,
        }

        let cleanup = {
            let mut state = inner.state.lock();
            match &*state {
                LinkState::Connected {
                    generation: current,
                    ..
                } if *current == generation => {
                    *state = LinkState::Disconnected;
                    Cleanup::Unexpected
                }
                LinkState::Closing { .. } => {
                    let previous = std::mem::replace(&mut *state, LinkState::Disconnected);
                    match previous {
                        LinkState::Closing { waiters } => Cleanup::Requested(waiters),
                        _ => Cleanup::Stale,
                    }
                }
                _ => Cleanup::Stale,
            }
        };

        match cleanup {
            Cleanup::Requested(waiters) => {
                debug!(generation, "Close completed");
                for waiter in waiters {
                    let _ = waiter.send(());
                }
            }
            Cleanup::Unexpected => {
                warn!(generation, ?reason, "Channel closed unexpectedly");
                inner.registry.reject_all(|| Error::ClosedUnexpectedly);
                inner.observers.emit(&LinkEvent::Disconnected);
            }
            Cleanup::Stale => {}
        }
    }
}

impl<C: Connector> std::fmt::Debug for CorrelatedClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelatedClient")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
