//! Per-resource token-bucket rate limiting (C1).
//!
//! Paces outbound camera calls. `acquire` never fails - it only delays - so callers
//! never need to handle a rejection path, only the suspension point.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default refill rate, in tokens per second, for newly seen resources.
pub const DEFAULT_CALLS_PER_SECOND: f64 = 0.5;

/// Default bucket capacity for newly seen resources.
pub const DEFAULT_BURST: f64 = 3.0;

struct Bucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_update: Instant,
}

impl Bucket {
    fn new(rate: f64, burst: f64) -> Self {
        Self {
            rate,
            burst,
            tokens: burst,
            last_update: Instant::now(),
        }
    }

    /// Refills the bucket for elapsed time and returns the wait needed before
    /// a token can be consumed, if any. Consumes the token as part of the call,
    /// matching the source's "wait-then-set-tokens" semantics.
    fn acquire(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Duration::ZERO
        } else {
            let wait = (1.0 - self.tokens) / self.rate;
            self.tokens = 1.0;
            self.tokens -= 1.0;
            Duration::from_secs_f64(wait.max(0.0))
        }
    }
}

/// A single token bucket keyed by an opaque resource identity.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(calls_per_second: f64, burst: f64) -> Self {
        Self {
            bucket: Mutex::new(Bucket::new(calls_per_second, burst)),
        }
    }

    /// Waits, if necessary, until a token is available, then consumes it.
    pub async fn acquire(&self) {
        let wait = self.bucket.lock().acquire();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// A rate limiter keyed per resource (typically an Integration identity), with
/// lazily-created buckets. The outer map lock only guards bucket creation; the
/// wait itself happens against the bucket's own lock, matching the source's
/// `PerResourceRateLimiter`.
pub struct PerResourceRateLimiter {
    default_calls_per_second: f64,
    default_burst: f64,
    limiters: Mutex<HashMap<String, std::sync::Arc<RateLimiter>>>,
}

impl PerResourceRateLimiter {
    pub fn new(default_calls_per_second: f64, default_burst: f64) -> Self {
        Self {
            default_calls_per_second,
            default_burst,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    fn limiter_for(&self, resource_id: &str) -> std::sync::Arc<RateLimiter> {
        let mut limiters = self.limiters.lock();
        limiters
            .entry(resource_id.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(RateLimiter::new(
                    self.default_calls_per_second,
                    self.default_burst,
                ))
            })
            .clone()
    }

    /// Acquires a token for the given resource, creating its bucket on first use.
    pub async fn acquire(&self, resource_id: &str) {
        let limiter = self.limiter_for(resource_id);
        limiter.acquire().await;
    }
}

impl Default for PerResourceRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CALLS_PER_SECOND, DEFAULT_BURST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_consumed_without_delay() {
        let limiter = RateLimiter::new(1.0, 3.0);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn fourth_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(10.0, 1.0);
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn per_resource_buckets_are_independent() {
        let limiter = PerResourceRateLimiter::new(10.0, 1.0);
        let start = Instant::now();
        limiter.acquire("cam-a").await;
        limiter.acquire("cam-b").await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
