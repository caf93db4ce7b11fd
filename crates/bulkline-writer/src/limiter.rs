//! Bound on concurrent sink calls

use bulkline_core::prelude::*;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore shared by every dispatch task that holds a clone.
///
/// A slot is taken with [`acquire`](Self::acquire) and given back when the
/// returned [`LimiterSlot`] is dropped, whatever the dispatch outcome was.
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
}

/// One unit of permission to run a dispatch
#[derive(Debug)]
pub struct LimiterSlot {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    pub fn new(max: usize) -> Result<Self> {
        if max == 0 {
            return Err(BulkError::config("limiter needs at least one slot"));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        })
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<LimiterSlot> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BulkError::Shutdown)?;
        Ok(LimiterSlot { _permit: permit })
    }

    /// Refuse every later `acquire`
    #[cfg(test)]
    pub(crate) fn close(&self) {
        self.semaphore.close();
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held
    pub fn in_use(&self) -> usize {
        self.max - self.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zero_slots_rejected() {
        assert!(ConcurrencyLimiter::new(0).is_err());
    }

    #[tokio::test]
    async fn test_release_on_drop() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);
        assert_eq!(limiter.in_use(), 2);

        drop(a);
        assert_eq!(limiter.available(), 1);
        assert_eq!(limiter.in_use(), 1);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_slot() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn test_closed_limiter_refuses() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        limiter.close();
        assert!(matches!(limiter.acquire().await, Err(BulkError::Shutdown)));
    }
}
