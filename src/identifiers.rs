//! Type-safe identifiers for transport entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`CallId`] | Correlation id attached to an outbound request and echoed in its response |
//! | [`ObserverId`] | Handle returned when registering a [`LinkObserver`](crate::transport::LinkObserver) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// CallId
// ============================================================================

/// Process-wide counter for minting fresh call ids.
static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Correlation identifier for a single request/response pair.
///
/// Ids are minted monotonically per process, so an id is never reused
/// while any call it once named could still be pending.
///
/// Serialized as a plain JSON number in the wire envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(u64);

impl CallId {
    /// Mints a fresh, currently-unused call id.
    #[inline]
    #[must_use]
    pub fn mint() -> Self {
        Self(NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a call id from a raw value.
    ///
    /// Intended for tests and for parsing inbound envelopes.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ObserverId
// ============================================================================

/// Process-wide counter for observer registration handles.
static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle identifying a registered transport observer.
///
/// Returned by `register_observer`, consumed by `unregister_observer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Mints a fresh observer handle.
    #[inline]
    #[must_use]
    pub fn mint() -> Self {
        Self(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_mint_unique() {
        let a = CallId::mint();
        let b = CallId::mint();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_call_id_serde_transparent() {
        let id = CallId::from_raw(7);
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "7");

        let back: CallId = serde_json::from_str("7").expect("parse");
        assert_eq!(back, id);
    }

    #[test]
    fn test_observer_id_mint_unique() {
        let a = ObserverId::mint();
        let b = ObserverId::mint();
        assert_ne!(a, b);
    }
}
