//! Per-provider token buckets.
//!
//! Process-local: a daemon restart refills every bucket. Capacity equals
//! the configured requests-per-minute; refill is continuous at rpm/60
//! tokens per second, computed lazily on consume.

use std::time::Instant;

use dashmap::DashMap;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

/// In-memory rate limiter.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    /// A limiter with no buckets yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take one token for `provider`.
    ///
    /// `rpm` is the currently configured limit; `None` admits everything
    /// and drops any stale bucket. Changing the limit reshapes the bucket
    /// in place (tokens clamped to the new capacity).
    #[must_use]
    pub fn try_consume(&self, provider: &str, rpm: Option<u32>) -> bool {
        let Some(rpm) = rpm else {
            self.buckets.remove(provider);
            return true;
        };
        if rpm == 0 {
            return false;
        }
        let capacity = f64::from(rpm);
        let now = Instant::now();

        let mut bucket = self
            .buckets
            .entry(provider.to_owned())
            .or_insert_with(|| Bucket {
                capacity,
                tokens: capacity,
                last_refill: now,
            });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        let refill = elapsed * capacity / 60.0;
        bucket.capacity = capacity;
        bucket.tokens = (bucket.tokens + refill).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Remaining tokens for a provider, for diagnostics.
    #[must_use]
    pub fn remaining(&self, provider: &str) -> Option<f64> {
        self.buckets.get(provider).map(|b| b.tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_without_rpm() {
        let limiter = RateLimiter::new();
        for _ in 0..1000 {
            assert!(limiter.try_consume("openai", None));
        }
    }

    #[test]
    fn test_bucket_exhausts_at_capacity() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.try_consume("openai", Some(5)));
        }
        // Sixth request inside the same instant is refused.
        assert!(!limiter.try_consume("openai", Some(5)));
    }

    #[test]
    fn test_buckets_are_per_provider() {
        let limiter = RateLimiter::new();
        assert!(limiter.try_consume("openai", Some(1)));
        assert!(!limiter.try_consume("openai", Some(1)));
        // A different provider has its own bucket.
        assert!(limiter.try_consume("anthropic", Some(1)));
    }

    #[test]
    fn test_refill_over_time() {
        let limiter = RateLimiter::new();
        // 6000 rpm = 100 tokens/second, so ~40ms refills several tokens.
        for _ in 0..6000 {
            let _ = limiter.try_consume("openai", Some(6000));
        }
        assert!(!limiter.try_consume("openai", Some(6000)));
        std::thread::sleep(std::time::Duration::from_millis(40));
        assert!(limiter.try_consume("openai", Some(6000)));
    }

    #[test]
    fn test_clearing_limit_drops_bucket() {
        let limiter = RateLimiter::new();
        assert!(limiter.try_consume("openai", Some(1)));
        assert!(!limiter.try_consume("openai", Some(1)));
        // Limit removed: admitted again, bucket gone.
        assert!(limiter.try_consume("openai", None));
        assert!(limiter.remaining("openai").is_none());
    }

    #[test]
    fn test_capacity_change_clamps_tokens() {
        let limiter = RateLimiter::new();
        assert!(limiter.try_consume("openai", Some(100)));
        // Shrink the limit; the stored tokens clamp to the new capacity.
        assert!(limiter.try_consume("openai", Some(2)));
        assert!(limiter.remaining("openai").unwrap() <= 2.0);
    }
}
