/// Shared concurrency limit and per-call timeout for provider calls.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::EmbedderError;

/// Bounds in-flight embedding calls across every indexer and assembler that
/// shares it. Clones share the same permits.
#[derive(Clone, Debug)]
pub struct EmbedLimiter {
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    call_timeout: Duration,
}

impl EmbedLimiter {
    pub fn new(max_concurrency: usize, call_timeout: Duration) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            call_timeout,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `call` under a permit and the per-call timeout.
    ///
    /// Cancellation is only observed while waiting for a permit; a call that
    /// has started runs until it completes or times out.
    pub async fn run<T, F>(&self, cancel: &CancellationToken, call: F) -> Result<T, EmbedderError>
    where
        F: Future<Output = Result<T, EmbedderError>>,
    {
        if cancel.is_cancelled() {
            return Err(EmbedderError::Cancelled);
        }
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EmbedderError::Cancelled),
            permit = self.permits.acquire() => {
                permit.map_err(|_| EmbedderError::Cancelled)?
            }
        };
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(EmbedderError::Timeout(self.call_timeout)),
        }
    }
}
