//! Shared token bucket for upstream calls.
//!
//! Sized by a sustained rate and a burst allowance. `acquire` never rejects:
//! a caller that finds the bucket empty reserves the next token (the balance
//! goes negative) and sleeps until that token would have been refilled. Only
//! the calling task waits; the lock is released before sleeping.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub requests_per_second: f64,
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        // 20 req/s sustained, up to 100 back-to-back after an idle stretch.
        // A single bucket: longer windows on the key are not enforced here.
        Self {
            requests_per_second: 20.0,
            burst: 100,
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let rate = if config.requests_per_second.is_finite() && config.requests_per_second > 0.0 {
            config.requests_per_second
        } else {
            1.0
        };
        let burst = config.burst.max(1) as f64;
        Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait for a slot. Cancellation-safe only in the sense that a dropped
    /// future keeps its reservation; the token is not returned.
    pub async fn acquire(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "Rate limiter delaying request");
            sleep(wait).await;
        }
    }

    /// Take one token and return how long the caller must wait for it.
    fn reserve(&self) -> Duration {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;

        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.rate)
        }
    }

    /// Tokens currently available (may be negative while callers are queued).
    #[cfg(test)]
    fn available(&self) -> f64 {
        let bucket = self.bucket.lock();
        let elapsed = Instant::now()
            .duration_since(bucket.last_refill)
            .as_secs_f64();
        (bucket.tokens + elapsed * self.rate).min(self.burst)
    }
}
