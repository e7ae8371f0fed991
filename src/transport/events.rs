//! Typed transport event observation.
//!
//! The client owns an explicit observer registry instead of a
//! process-wide emitter: observers register for the typed
//! [`LinkEvent`] stream and unregister with the handle they got back.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::identifiers::ObserverId;

// ============================================================================
// LinkEvent
// ============================================================================

/// Lifecycle notifications emitted by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The channel opened and the client is ready to send.
    Connected,
    /// The channel is gone, whether by request or unexpectedly.
    Disconnected,
    /// A liveness probe was written after a period of silence.
    HeartbeatSent,
}

// ============================================================================
// LinkObserver
// ============================================================================

/// Receiver of transport lifecycle events.
///
/// Called from the transport's own tasks; implementations should not
/// block.
pub trait LinkObserver: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &LinkEvent);
}

impl<F> LinkObserver for F
where
    F: Fn(&LinkEvent) + Send + Sync,
{
    fn on_event(&self, event: &LinkEvent) {
        self(event);
    }
}

// ============================================================================
// ObserverSet
// ============================================================================

/// The client's observer registry.
#[derive(Default)]
pub(crate) struct ObserverSet {
    /// Registered observers by handle.
    observers: Mutex<FxHashMap<ObserverId, Arc<dyn LinkObserver>>>,
}

impl ObserverSet {
    /// Creates an empty set.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers an observer, returning its handle.
    pub(crate) fn register(&self, observer: Arc<dyn LinkObserver>) -> ObserverId {
        let id = ObserverId::mint();
        self.observers.lock().insert(id, observer);
        id
    }

    /// Unregisters by handle; returns `false` for unknown handles.
    pub(crate) fn unregister(&self, id: ObserverId) -> bool {
        self.observers.lock().remove(&id).is_some()
    }

    /// Removes every observer.
    pub(crate) fn clear(&self) {
        self.observers.lock().clear();
    }

    /// Delivers `event` to every registered observer.
    ///
    /// Observers run outside the lock so one may re-register or
    /// unregister from its callback.
    pub(crate) fn emit(&self, event: &LinkEvent) {
        let snapshot: Vec<_> = self.observers.lock().values().cloned().collect();
        trace!(?event, observers = snapshot.len(), "Emitting link event");
        for observer in snapshot {
            observer.on_event(event);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
