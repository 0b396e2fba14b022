//! Global bound on concurrent sandbox executions

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// FIFO limiter with a cap on how many callers may wait
///
/// `tokio::sync::Semaphore` is fair, so waiters are served in arrival order.
#[derive(Debug)]
pub struct CompileLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    max_queue_depth: usize,
    queued: AtomicUsize,
}

/// A held execution slot, released on drop
#[derive(Debug)]
pub struct CompilePermit {
    _permit: OwnedSemaphorePermit,
}

/// Returned when both the slots and the queue are full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Saturated;

/// Snapshot of the limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterStatus {
    pub max_concurrency: usize,
    pub active: usize,
    pub queued: usize,
    pub max_queue_depth: usize,
}

/// Decrements the queue counter even if the waiting future is dropped
struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl CompileLimiter {
    #[must_use]
    pub fn new(max_concurrency: usize, max_queue_depth: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            max_queue_depth,
            queued: AtomicUsize::new(0),
        }
    }

    /// Take a slot, waiting in line if all are busy
    ///
    /// # Errors
    /// Returns `Saturated` when `max_queue_depth` callers are already waiting.
    pub async fn acquire(&self) -> Result<CompilePermit, Saturated> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(CompilePermit { _permit: permit });
        }

        if self.queued.fetch_add(1, Ordering::AcqRel) >= self.max_queue_depth {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(Saturated);
        }
        let _slot = QueueSlot(&self.queued);

        tracing::debug!(queued = self.queued.load(Ordering::Acquire), "waiting for compile slot");

        // the semaphore is never closed
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map(|permit| CompilePermit { _permit: permit })
            .map_err(|_| Saturated)
    }

    #[must_use]
    pub fn status(&self) -> LimiterStatus {
        LimiterStatus {
            max_concurrency: self.max_concurrency,
            active: self.max_concurrency - self.semaphore.available_permits(),
            queued: self.queued.load(Ordering::Acquire),
            max_queue_depth: self.max_queue_depth,
        }
    }
}
