//! Bounded exponential backoff around one upstream-dependent step.
//!
//! Permanent errors return immediately. Retryable errors sleep and try again,
//! doubling the delay up to `max_delay`, until either `max_attempts` calls were
//! made or the next sleep would push past `max_elapsed`. A rate-limit error with
//! a `Retry-After` hint sleeps exactly that long instead of the computed delay.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::error::{TrackerError, TrackerResult};
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt + 1` (attempt is 0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails permanently, or the retry budget runs out.
///
/// A triggered `shutdown` aborts a pending backoff with `TrackerError::Cancelled`.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    config: &RetryConfig,
    shutdown: &mut ShutdownSignal,
    mut op: F,
) -> TrackerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TrackerResult<T>>,
{
    let started = Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        let err = match op().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(op = label, attempts = attempt + 1, "✅ Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        attempt += 1;
        if attempt >= max_attempts {
            return Err(TrackerError::Exhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let delay = err
            .retry_after()
            .unwrap_or_else(|| config.backoff(attempt - 1));
        if started.elapsed() + delay > config.max_elapsed {
            warn!(
                op = label,
                attempts = attempt,
                delay_ms = delay.as_millis() as u64,
                "Retry budget exhausted"
            );
            return Err(TrackerError::Exhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        warn!(
            op = label,
            attempt,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "Retryable failure, backing off"
        );

        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.triggered() => return Err(TrackerError::Cancelled),
        }
    }
}
