use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::HttpError;

/// Bounded in-flight request count. Permits release on drop and wake one
/// waiter; tokio's semaphore queues waiters fairly. A cancelled acquire
/// never consumes capacity.
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
}

/// RAII permit; hold it for the duration of the guarded call.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<GatePermit, HttpError> {
        let permit = tokio::select! {
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.map_err(|_| HttpError::Cancelled)?
            }
            _ = cancel.cancelled() => return Err(HttpError::Cancelled),
        };

        Ok(GatePermit { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
