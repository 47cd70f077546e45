//! Bounded worker pool for CPU-bound frame work
//!
//! Jobs run on tokio's blocking threads; a semaphore caps how many run at
//! once so a burst of connections cannot flood the blocking pool.

use crate::error::{BrokerError, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` once a worker is free
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| BrokerError::worker_pool("pool is closed"))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| BrokerError::worker_pool(format!("job did not complete: {e}")))
    }

    /// Reject new jobs; running jobs finish normally
    pub fn close(&self) {
        self.permits.close();
    }
}
