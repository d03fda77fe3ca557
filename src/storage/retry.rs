use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::metrics::STORE_RETRIES_TOTAL;
use crate::BackoffPolicy;
use crate::Error;
use crate::Result;
use crate::StoreError;
use crate::StoreResult;

/// Exponential delay generator bounded by a policy's floor and ceiling.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    ceiling: Duration,
    factor: u32,
    next: Duration,
}

impl Backoff {
    pub(crate) fn new(policy: &BackoffPolicy) -> Self {
        Self {
            ceiling: policy.max_delay(),
            factor: policy.factor.max(1),
            next: policy.base_delay(),
        }
    }

    /// Delay to wait before the next attempt, with up to 10% jitter.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = delay.saturating_mul(self.factor).min(self.ceiling);

        let jitter_ms = (delay.as_millis() / 10) as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        (delay + jitter).min(self.ceiling)
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
pub(crate) async fn cancellable_sleep(
    cancel: &CancellationToken,
    delay: Duration,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = sleep(delay) => Ok(()),
    }
}

/// Runs one store call, retrying transient failures.
///
/// Errors for which [`StoreError::is_retryable`] is false are returned
/// straight away. Retryable ones are retried with exponential backoff until
/// `policy.max_retries` is exhausted (0 retries forever), at which point the
/// last error is returned. Cancellation aborts both the call in flight and
/// any pending backoff.
pub async fn retry_store_call<T, F, Fut>(
    cancel: &CancellationToken,
    policy: &BackoffPolicy,
    op: &'static str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut backoff = Backoff::new(policy);
    let mut retries = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let attempt = async {
            match policy.timeout() {
                Some(limit) => timeout(limit, call()).await.unwrap_or(Err(StoreError::Timeout(limit))),
                None => call().await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = attempt => r,
        };

        match result {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && (policy.max_retries == 0 || retries < policy.max_retries) => {
                retries += 1;
                STORE_RETRIES_TOTAL.with_label_values(&[op]).inc();
                let delay = backoff.next_delay();
                warn!(op, retries, ?delay, "store call failed, retrying: {}", e);
                cancellable_sleep(cancel, delay).await?;
            }
            Err(e) => {
                debug!(op, retries, "store call failed: {}", e);
                return Err(e.into());
            }
        }
    }
}
