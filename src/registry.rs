//! Request/response correlation registry.
//!
//! The [`CorrelationRegistry`] is the single owner of the pending-call
//! map: it mints call ids, hands out exactly-once-settlable
//! [`PendingCall`] handles, and arms a per-entry timeout for each call.
//! No other component reads or mutates the map.
//!
//! # Settlement rules
//!
//! - Exactly one terminal settlement (success or failure) per id.
//! - A late or duplicate settlement for the same id is a silent no-op;
//!   [`resolve`](CorrelationRegistry::resolve) and
//!   [`reject`](CorrelationRegistry::reject) never fail and never
//!   panic, because a slow peer must not be able to corrupt unrelated
//!   pending calls.
//! - [`reject_all`](CorrelationRegistry::reject_all) settles every
//!   pending call at once; it is the transport-teardown path and is
//!   safe to call when nothing is pending.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::CallId;

// ============================================================================
// Constants
// ============================================================================

/// Default per-call timeout (30s).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

/// Hook invoked when a pending call times out, before the handle is
/// rejected.
pub type TimeoutHook = Arc<dyn Fn(CallId) + Send + Sync>;

/// Map of call ids to unsettled entries.
type PendingMap = FxHashMap<CallId, PendingEntry>;

/// One unsettled call.
struct PendingEntry {
    /// Settles the caller's [`PendingCall`].
    tx: oneshot::Sender<Result<Value>>,
    /// Timeout task armed at creation, aborted on settlement.
    timer: Option<JoinHandle<()>>,
}

// ============================================================================
// RegistryConfig
// ============================================================================

/// Configuration for a [`CorrelationRegistry`].
#[derive(Clone, Default)]
pub struct RegistryConfig {
    /// Per-entry timeout; `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
    /// Hook invoked on entry timeout, before rejection.
    pub on_timeout: Option<TimeoutHook>,
}

impl RegistryConfig {
    /// Creates a config with the default 30s call timeout and no hook.
    #[must_use]
    pub fn new() -> Self {
        Self {
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
            on_timeout: None,
        }
    }

    /// Sets the per-entry timeout.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the timeout hook.
    #[must_use]
    pub fn on_timeout(mut self, hook: TimeoutHook) -> Self {
        self.on_timeout = Some(hook);
        self
    }
}

// ============================================================================
// PendingCall
// ============================================================================

/// An exactly-once-settlable handle for a value that will become
/// available later.
///
/// Obtained from [`CorrelationRegistry::create`]; settles when the
/// registry resolves or rejects the matching id.
pub struct PendingCall {
    /// Receives the terminal settlement.
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingCall {
    /// Waits for the call's terminal settlement.
    ///
    /// # Errors
    ///
    /// Whatever error the call was rejected with, or
    /// [`Error::ChannelClosed`] if the registry was dropped with the
    /// entry unsettled.
    pub async fn settled(self) -> Result<Value> {
        self.rx.await?
    }
}

// ============================================================================
// CorrelationRegistry
// ============================================================================

/// Owner of the pending-call map.
///
/// Clones share the same map; the registry is `Send + Sync` and all
/// operations are non-blocking.
#[derive(Clone)]
pub struct CorrelationRegistry {
    /// Pending entries keyed by call id.
    pending: Arc<Mutex<PendingMap>>,
    /// Per-entry timeout; `None` waits indefinitely.
    call_timeout: Option<Duration>,
    /// Hook invoked on entry timeout.
    on_timeout: Option<TimeoutHook>,
}

impl CorrelationRegistry {
    /// Creates a registry from config.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            pending: Arc::new(Mutex::new(PendingMap::default())),
            call_timeout: config.call_timeout,
            on_timeout: config.on_timeout,
        }
    }

    /// Allocates a fresh id and an unsettled handle for it.
    ///
    /// If a call timeout is configured, a timer is armed that, on
    /// expiry, invokes the timeout hook and rejects the handle with
    /// [`Error::CallTimeout`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(&self) -> (CallId, PendingCall) {
        let id = CallId::mint();
        let (tx, rx) = oneshot::channel();

        let timer = self.call_timeout.map(|duration| {
            let pending = Arc::clone(&self.pending);
            let hook = self.on_timeout.clone();

            tokio::spawn(async move {
                tokio::time::sleep(duration).await;

                let entry = pending.lock().remove(&id);
                if let Some(entry) = entry {
                    debug!(%id, timeout_ms = duration.as_millis() as u64, "Pending call timed out");
                    if let Some(hook) = hook {
                        hook(id);
                    }
                    let _ = entry
                        .tx
                        .send(Err(Error::call_timeout(id, duration.as_millis() as u64)));
                }
            })
        });

        self.pending.lock().insert(id, PendingEntry { tx, timer });
        trace!(%id, "Pending call created");

        (id, PendingCall { rx })
    }

    /// Settles the handle for `id` with a success value.
    ///
    /// Silent no-op if the id is unknown or already settled.
    pub fn resolve(&self, id: CallId, value: Value) {
        self.settle(id, Ok(value));
    }

    /// Settles the handle for `id` with an error.
    ///
    /// Silent no-op if the id is unknown or already settled.
    pub fn reject(&self, id: CallId, error: Error) {
        self.settle(id, Err(error));
    }

    /// Settles every currently pending handle with an error produced
    /// by `make_error`.
    ///
    /// Used on transport teardown. Safe to call when nothing is
    /// pending; any settlement arriving afterwards for a drained id is
    /// a no-op.
    pub fn reject_all(&self, make_error: impl Fn() -> Error) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();

        for (id, entry) in drained {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            trace!(%id, "Rejecting pending call on teardown");
            let _ = entry.tx.send(Err(make_error()));
        }

        if count > 0 {
            debug!(count, "Rejected all pending calls");
        }
    }

    /// Returns the number of unsettled calls.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if no calls are pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Removes and settles one entry; no-op for unknown ids.
    fn settle(&self, id: CallId, outcome: Result<Value>) {
        let entry = self.pending.lock().remove(&id);

        match entry {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                let _ = entry.tx.send(outcome);
                trace!(%id, "Pending call settled");
            }
            None => {
                // Late or duplicate settlement; the first one won.
                warn!(%id, "Settlement for unknown or already-settled call");
            }
        }
    }
}

impl std::fmt::Debug for CorrelationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationRegistry")
            .field("pending", &self.pending_count())
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    fn registry_without_timeout() -> CorrelationRegistry {
        CorrelationRegistry::new(RegistryConfig::default())
    }

    #[tokio::test]
    async fn test_create_and_resolve() {
        let registry = registry_without_timeout();
        let (id, call) = registry.create();

        assert_eq!(registry.pending_count(), 1);
        registry.resolve(id, json!({"ok": true}));

        let value = call.settled().await.expect("resolved");
        assert_eq!(value, json!({"ok": true}));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_create_and_reject() {
        let registry = registry_without_timeout();
        let (id, call) = registry.create();

        registry.reject(id, Error::peer("boom"));

        let err = call.settled().await.expect_err("rejected");
        assert!(matches!(err, Error::Peer { .. }));
    }

    #[tokio::test]
    async fn test_settlement_is_idempotent() {
        let registry = registry_without_timeout();
        let (id, call) = registry.create();

        registry.resolve(id, json!(1));
        // All of these must be silent no-ops.
        registry.resolve(id, json!(2));
        registry.reject(id, Error::peer("late"));
        registry.reject(id, Error::peer("later"));

        let value = call.settled().await.expect("first settlement wins");
        assert_eq!(value, json!(1));
    }

    #[tokio::test]
    async fn test_unknown_id_is_noop() {
        let registry = registry_without_timeout();
        registry.resolve(CallId::from_raw(u64::MAX), json!(null));
        registry.reject(CallId::from_raw(u64::MAX - 1), Error::peer("x"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reject_all_settles_everything_once() {
        let registry = registry_without_timeout();
        let (id_a, call_a) = registry.create();
        let (_id_b, call_b) = registry.create();

        registry.reject_all(|| Error::ClosedUnexpectedly);

        assert!(registry.is_empty());
        assert!(matches!(
            call_a.settled().await,
            Err(Error::ClosedUnexpectedly)
        ));
        assert!(matches!(
            call_b.settled().await,
            Err(Error::ClosedUnexpectedly)
        ));

        // A response arriving afterwards for a stale id changes nothing.
        registry.resolve(id_a, json!("stale"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reject_all_when_empty_is_safe() {
        let registry = registry_without_timeout();
        registry.reject_all(|| Error::ClosedUnexpectedly);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_invokes_hook_then_rejects() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hook_calls);

        let config = RegistryConfig::new()
            .call_timeout(Some(Duration::from_millis(250)))
            .on_timeout(Arc::new(move |_id| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        let registry = CorrelationRegistry::new(config);

        let (id, call) = registry.create();
        let err = call.settled().await.expect_err("times out");

        assert!(matches!(err, Error::CallTimeout { .. }));
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());

        // The timed-out id is gone; a late response is a no-op.
        registry.resolve(id, json!("late"));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settlement_disarms_timeout() {
        let config = RegistryConfig::new().call_timeout(Some(Duration::from_millis(100)));
        let registry = CorrelationRegistry::new(config);

        let (id, call) = registry.create();
        registry.resolve(id, json!(7));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let value = call.settled().await.expect("resolved before timeout");
        assert_eq!(value, json!(7));
    }
}
