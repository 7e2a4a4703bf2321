//! Concurrency gate bounding outstanding leases

use std::sync::Arc;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Counting gate sized once at pool start.
///
/// Waiters are admitted in arrival order. Closing the gate fails every
/// pending and future `acquire` with `PoolStopped`.
#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    size: usize,
    closed: Notify,
}

/// Holds one unit of the gate until dropped.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            closed: Notify::new(),
        }
    }

    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolStopped)?;
        Ok(GatePermit { _permit: permit })
    }

    pub fn close(&self) {
        self.semaphore.close();
        self.closed.notify_waiters();
    }

    /// Resolves once the gate is closed. Lets permit holders abandon other
    /// waits on shutdown.
    pub async fn closed(&self) {
        let notified = self.closed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}
