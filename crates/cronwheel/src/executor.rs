//! Worker submission interface.
//!
//! The firing loop never runs jobs inline; it reserves a slot from a
//! [`WorkerPool`] and spawns the execution with the slot held, so the pool
//! bounds concurrency and provides the backpressure signal the loop blocks
//! on before acquiring triggers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A reserved worker slot; the slot frees when dropped.
pub struct WorkerSlot {
    _permit: Option<OwnedSemaphorePermit>,
}

#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Block until at least one slot is free; returns the free count.
    async fn wait_for_available(&self) -> usize;

    /// Reserve one slot, waiting if none is free. The slot is held for the
    /// duration of one job execution.
    async fn reserve(&self) -> WorkerSlot;

    fn capacity(&self) -> usize;

    fn available(&self) -> usize;
}

/// Semaphore-gated pool running executions on the tokio runtime.
pub struct TokioWorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl TokioWorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }
}

#[async_trait]
impl WorkerPool for TokioWorkerPool {
    async fn wait_for_available(&self) -> usize {
        // Briefly take and release a permit to park until one frees up.
        if let Ok(permit) = self.semaphore.acquire().await {
            drop(permit);
        }
        self.semaphore.available_permits().max(1)
    }

    async fn reserve(&self) -> WorkerSlot {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok();
        WorkerSlot { _permit: permit }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
