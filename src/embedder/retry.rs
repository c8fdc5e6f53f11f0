/// Bounded exponential backoff around embedding provider calls.
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::limiter::EmbedLimiter;
use super::{Embedder, EmbedderError};

/// Retry policy: `delay(n) = min(base * 2^n, max)`, at most `max_attempts` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            max: Duration::from_secs(8),
            max_attempts: 4,
        }
    }
}

impl Backoff {
    /// Delay after the failed attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Embed `texts` through `limiter`, retrying retryable failures.
///
/// No new attempt starts once `cancel` fires; the backoff sleep is cut short too.
pub async fn embed_with_retry(
    embedder: &dyn Embedder,
    limiter: &EmbedLimiter,
    backoff: &Backoff,
    texts: &[String],
    model: &str,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    let max_attempts = backoff.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let result = limiter.run(cancel, embedder.embed_batch(texts, model)).await;
        let err = match result {
            Ok(vectors) if vectors.len() == texts.len() => return Ok(vectors),
            Ok(vectors) => {
                return Err(EmbedderError::InvalidResponse(format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    vectors.len()
                )));
            }
            Err(err) => err,
        };

        attempt += 1;
        if !err.is_retryable() || attempt >= max_attempts {
            return Err(err);
        }

        let delay = backoff.delay(attempt - 1);
        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "embedding failed, retrying: {err}"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(EmbedderError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
