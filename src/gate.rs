//! Bounded concurrency gate
//!
//! A counting semaphore capping how many workers of one kind are active at
//! the same time. Admission is first come, first served.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::ImportError;

#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot in a [`ConcurrencyGate`].
///
/// The slot is released when the permit is dropped or [`release`]d. A
/// permit that is leaked (e.g. with `mem::forget`) keeps its slot for the
/// lifetime of the gate; that is the holder's responsibility.
///
/// [`release`]: GatePermit::release
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    pub fn release(self) {}
}

impl ConcurrencyGate {
    /// Create a gate admitting `capacity` holders, at least one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait until a slot is free and take it.
    ///
    /// The gate never closes its semaphore, so this only fails if that
    /// invariant is broken.
    pub async fn acquire(&self) -> Result<GatePermit, ImportError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ImportError::GateClosed)?;
        Ok(GatePermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
