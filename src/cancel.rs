//! Composable one-shot cancellation tokens.
//!
//! A [`CancelToken`] is a cooperative trigger: firing it never
//! interrupts work by force, it only makes outstanding waits settle and
//! asks the work holding the token to stop early.
//!
//! # Propagation
//!
//! Tokens compose parent→child via [`CancelToken::child`]:
//!
//! - Triggering a parent cascades to every derived child.
//! - Triggering a child never affects its parent.
//!
//! This is the idiom used by the scheduler to scope each attempt
//! beneath an outer caller-supplied signal: the attempt's scope token
//! is a child of the scheduler's internal teardown token, which itself
//! tears down when the caller's signal fires.
//!
//! # One-shot semantics
//!
//! Triggering is idempotent and irreversible. Listeners run exactly
//! once and are released afterwards, so a triggered token retains no
//! closures.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked when a token is triggered.
type TriggerListener = Box<dyn FnOnce() + Send>;

/// Shared token state.
struct Inner {
    /// Whether the token has been triggered.
    triggered: bool,
    /// Listeners awaiting the trigger; cleared on fire.
    listeners: Vec<TriggerListener>,
}

// ============================================================================
// CancelToken
// ============================================================================

/// A composable, one-shot cancellation trigger.
///
/// Clones share the same underlying state; triggering any clone
/// triggers them all.
///
/// # Example
///
/// ```ignore
/// let token = CancelToken::new();
/// let scope = token.child();
///
/// token.trigger();
/// assert!(scope.is_triggered());
/// ```
#[derive(Clone)]
pub struct CancelToken {
    /// Shared trigger state.
    inner: Arc<Mutex<Inner>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates a new, untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                triggered: false,
                listeners: Vec::new(),
            })),
        }
    }

    /// Returns `true` if the token has been triggered.
    #[inline]
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner.lock().triggered
    }

    /// Triggers the token.
    ///
    /// Idempotent: the first call fires every registered listener
    /// exactly once and clears them; later calls do nothing.
    pub fn trigger(&self) {
        let listeners = {
            let mut inner = self.inner.lock();
            if inner.triggered {
                return;
            }
            inner.triggered = true;
            std::mem::take(&mut inner.listeners)
        };

        // Run listeners outside the lock: a listener may touch this
        // token or register on a sibling.
        for listener in listeners {
            listener();
        }
    }

    /// Registers a listener invoked when the token triggers.
    ///
    /// If the token is already triggered, the listener runs
    /// immediately on the calling task.
    pub fn on_trigger(&self, listener: impl FnOnce() + Send + 'static) {
        let run_now = {
            let mut inner = self.inner.lock();
            if inner.triggered {
                true
            } else {
                inner.listeners.push(Box::new(listener));
                return;
            }
        };

        if run_now {
            listener();
        }
    }

    /// Derives a child token linked to this one.
    ///
    /// The child fires when this token fires (or immediately, if it
    /// already has). Triggering the child leaves this token untouched.
    #[must_use]
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        let linked = child.clone();
        self.on_trigger(move || linked.trigger());
        child
    }

    /// Resolves once the token is triggered.
    ///
    /// If every clone of the token is dropped untriggered, the returned
    /// future never resolves: an abandoned signal is not a fired one.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.on_trigger(move || {
            let _ = tx.send(());
        });

        async move {
            if rx.await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("triggered", &self.is_triggered())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
