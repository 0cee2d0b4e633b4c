//! Global concurrency gate
//!
//! Caps how many task executions may be in flight at once. Waiting for a slot
//! happens inside the execution's own task, never in the check loop.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Bounded (or disabled) execution gate
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Option<Arc<Semaphore>>,
    capacity: Option<usize>,
}

impl ConcurrencyGate {
    /// Create a gate with `max` slots, or an open gate for `None`.
    pub fn new(max: Option<usize>) -> Self {
        Self {
            semaphore: max.map(|permits| Arc::new(Semaphore::new(permits))),
            capacity: max,
        }
    }

    /// Wait for a slot. An open gate returns immediately.
    pub async fn acquire(&self) -> GatePermit {
        let permit = match &self.semaphore {
            // the semaphore is never closed, so acquisition only fails if it were
            Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
            None => None,
        };
        debug!(capacity = ?self.capacity, "Execution slot acquired");
        GatePermit { _permit: permit }
    }

    /// Configured capacity (`None` = unlimited)
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Free slots (`None` = unlimited)
    #[must_use]
    pub fn available_slots(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }
}

/// A permit that releases its execution slot when dropped.
#[derive(Debug)]
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}
