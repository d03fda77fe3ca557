use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::storage::cancellable_sleep;
use crate::Result;

/// Token bucket bounding how often failed watch sessions are restarted.
#[derive(Debug)]
pub(crate) struct RestartLimiter {
    rate_per_sec: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    updated: Instant,
}

impl RestartLimiter {
    pub(crate) fn new(
        rate_per_sec: f64,
        burst: u32,
    ) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate_per_sec,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                updated: Instant::now(),
            }),
        }
    }

    /// Takes a token if one is available, otherwise returns how long until
    /// the next one is.
    pub(crate) fn try_acquire(&self) -> std::result::Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        bucket.tokens = replenished(
            bucket.tokens,
            now.saturating_duration_since(bucket.updated),
            self.rate_per_sec,
            self.burst,
        );
        bucket.updated = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(wait_for_token(bucket.tokens, self.rate_per_sec))
        }
    }

    /// Waits for a token; fails only when `cancel` fires.
    pub(crate) async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => cancellable_sleep(cancel, wait).await?,
            }
        }
    }
}

fn replenished(
    tokens: f64,
    elapsed: Duration,
    rate_per_sec: f64,
    burst: f64,
) -> f64 {
    (tokens + elapsed.as_secs_f64() * rate_per_sec).min(burst)
}

fn wait_for_token(
    tokens: f64,
    rate_per_sec: f64,
) -> Duration {
    if rate_per_sec <= 0.0 {
        // never refills; poll at a slow pace rather than spin
        return Duration::from_secs(1);
    }
    let secs = ((1.0 - tokens) / rate_per_sec).max(0.001);
    Duration::from_secs_f64(secs)
}
