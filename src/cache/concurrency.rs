use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ElevationError;

/// Global cap on in-flight outbound object-storage reads (spec §5,
/// default 64), with a bounded wait queue of length `max_queued` beyond
/// which new requests are rejected with `ErrOverloaded` rather than
/// queued indefinitely.
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    queued: AtomicUsize,
    max_queued: usize,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: usize, max_queued: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            queued: AtomicUsize::new(0),
            max_queued,
        }
    }

    /// Acquires a permit, queueing if the cap is currently saturated.
    /// Rejects outright once the wait queue is already at capacity.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ElevationError> {
        if self.semaphore.available_permits() == 0 {
            let waiting = self.queued.fetch_add(1, Ordering::AcqRel) + 1;
            if waiting > self.max_queued {
                self.queued.fetch_sub(1, Ordering::AcqRel);
                return Err(ElevationError::Overloaded);
            }
            let permit = self.semaphore.clone().acquire_owned().await.expect("limiter semaphore is never closed");
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return Ok(permit);
        }
        Ok(self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("limiter semaphore is never closed"))
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
