//! Capability-passing cancellation.
//!
//! `Channel::subscribe` needs a way to observe a subscriber's cancel signal
//! without knowing anything about `Component`. Passing an opaque
//! `Arc<dyn Cancellable>` lets the two modules stay mutually unaware of each
//! other's concrete types.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Anything that can be asked "has the owner of this been told to stop?".
pub trait Cancellable: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// A tripwire a component's worker and its channel subscriptions observe.
///
/// Cloning shares the same underlying flag: every clone of a `CancelSignal`
/// observes the same trip.
#[derive(Clone)]
pub struct CancelSignal {
    tripped: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self {
            tripped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trip(&self) {
        self.tripped.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.tripped.store(false, Ordering::Release);
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Wraps this signal as an opaque `Cancellable` for `Channel::subscribe`.
    pub fn as_cancellable(&self) -> Arc<dyn Cancellable> {
        Arc::new(self.clone())
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellable for CancelSignal {
    fn is_cancelled(&self) -> bool {
        self.is_tripped()
    }
}
