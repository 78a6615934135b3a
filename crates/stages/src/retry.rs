//! Bounded retry with exponential backoff and jitter
//!
//! Only `Transient` failures are retried. When the budget runs out the
//! last transient error escalates to a `StageFailure` so the controller
//! applies the per-stage fallback instead of looping forever.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use eca_core::StageError;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF);
        // Up to 50% jitter so concurrent turns don't retry in lockstep
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2);
        base + Duration::from_millis(jitter_ms)
    }
}

pub async fn with_retries<T, F, Fut>(
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, StageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err @ StageError::Transient { .. }) if attempt < policy.max_retries => {
                let delay = policy.backoff_for(attempt);
                tracing::warn!(
                    stage = %err.stage(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient stage failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err.escalate()),
        }
    }
}
