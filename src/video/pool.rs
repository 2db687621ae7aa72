//! Bounded offload of blocking device work
//!
//! Device open/read/close block on native I/O, so they never run on the
//! async workers. Each job holds a semaphore permit for its whole run,
//! capping how many blocking threads capture work can occupy.

use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::{AppError, Result};

#[derive(Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl BlockingPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Run `job` on a blocking thread once a slot is free
    pub async fn submit<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("Worker pool closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| AppError::Internal(format!("Worker task failed: {}", e)))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots not currently held by a running job
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
