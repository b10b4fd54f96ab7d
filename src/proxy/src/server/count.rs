use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// Admission bound on concurrent frontend sessions. Two strategies: the
/// semaphore variant backpressures the accept loop, the atomic variant turns
/// connections away at the cap.
#[async_trait]
pub trait ConnCounter: Send + Sync {
    /// Claims one slot. `false` means the connection must be closed.
    async fn incr(&self) -> bool;
    fn decr(&self);
    fn size(&self) -> usize;
}

pub struct SemaphoreCounter {
    permits: Semaphore,
    max: usize,
}

impl SemaphoreCounter {
    pub fn new(max: usize) -> Self {
        Self {
            permits: Semaphore::new(max),
            max,
        }
    }
}

#[async_trait]
impl ConnCounter for SemaphoreCounter {
    async fn incr(&self) -> bool {
        match self.permits.acquire().await {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    fn decr(&self) {
        self.permits.add_permits(1);
    }

    fn size(&self) -> usize {
        self.max - self.permits.available_permits()
    }
}

pub struct AtomicCounter {
    max: usize,
    cur: AtomicUsize,
}

impl AtomicCounter {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            cur: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConnCounter for AtomicCounter {
    async fn incr(&self) -> bool {
        let mut cur = self.cur.load(Ordering::Acquire);
        loop {
            if cur >= self.max {
                return false;
            }
            match self
                .cur
                .compare_exchange(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(observed) => cur = observed,
            }
        }
    }

    fn decr(&self) {
        self.cur.fetch_sub(1, Ordering::AcqRel);
    }

    fn size(&self) -> usize {
        self.cur.load(Ordering::Acquire)
    }
}
