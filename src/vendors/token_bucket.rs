//! Token bucket rate limiting.
//!
//! Two uses share this module: each vendor adapter holds one bucket
//! sized to that vendor's published quota and waits on it before wire
//! calls, and the server keeps keyed registries (per IP, per endpoint)
//! that reject instead of waiting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

const NANOS_PER_MINUTE: u64 = 60_000_000_000;

/// A single token bucket: `capacity` tokens, refilled continuously at
/// `limit_per_minute / 60` tokens per second.
///
/// The whole state is one atomic word, the virtual arrival time of the
/// next conforming call. Refill and take are a single compare-and-swap
/// on that word.
#[derive(Debug)]
pub struct TokenBucket {
    /// Nanoseconds between calls at the sustained rate.
    emission_nanos: u64,
    /// How far the schedule may run ahead of real time; this is the
    /// burst allowance of `capacity` calls expressed as time.
    tolerance_nanos: u64,
    start: Instant,
    /// Virtual arrival time, nanoseconds since `start`.
    tat: AtomicU64,
}

impl TokenBucket {
    /// Bucket allowing `limit_per_minute` calls per minute, starting full.
    pub fn per_minute(limit_per_minute: u32) -> Self {
        let limit = limit_per_minute.max(1) as u64;
        let emission_nanos = NANOS_PER_MINUTE / limit;
        Self {
            emission_nanos,
            tolerance_nanos: emission_nanos * (limit - 1),
            start: Instant::now(),
            tat: AtomicU64::new(0),
        }
    }

    /// Take one token, or report how long until one is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = self.start.elapsed().as_nanos() as u64;
        let mut tat = self.tat.load(Ordering::Relaxed);
        loop {
            let next = tat.max(now);
            if next - now > self.tolerance_nanos {
                return Err(Duration::from_nanos(next - self.tolerance_nanos - now));
            }
            match self.tat.compare_exchange_weak(
                tat,
                next + self.emission_nanos,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => tat = observed,
            }
        }
    }

    /// Wait until a token is available, then take it. Vendor adapters
    /// use this so bursts queue instead of erroring.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }
}

/// Keyed bucket registry for per-IP and per-endpoint limits. Buckets are
/// created on first sight of a key and pruned once idle.
pub struct BucketRegistry {
    limit_per_minute: u32,
    buckets: RwLock<HashMap<String, BucketEntry>>,
}

struct BucketEntry {
    bucket: TokenBucket,
    last_used: Instant,
}

/// Drop idle entries once the registry grows past this.
const PRUNE_THRESHOLD: usize = 4096;

impl BucketRegistry {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            limit_per_minute,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Take a token for `key`, or return the suggested `Retry-After`
    /// seconds (always at least 1).
    pub async fn try_acquire(&self, key: &str) -> Result<(), u64> {
        {
            let buckets = self.buckets.read().await;
            if let Some(entry) = buckets.get(key) {
                return Self::map_result(entry.bucket.try_acquire());
            }
        }

        let mut buckets = self.buckets.write().await;
        if buckets.len() >= PRUNE_THRESHOLD {
            let cutoff = Instant::now() - Duration::from_secs(600);
            buckets.retain(|_, e| e.last_used >= cutoff);
        }
        let entry = buckets.entry(key.to_string()).or_insert_with(|| BucketEntry {
            bucket: TokenBucket::per_minute(self.limit_per_minute),
            last_used: Instant::now(),
        });
        entry.last_used = Instant::now();
        Self::map_result(entry.bucket.try_acquire())
    }

    fn map_result(result: Result<(), Duration>) -> Result<(), u64> {
        result.map_err(|wait| wait.as_secs().max(1))
    }

    pub async fn tracked_keys(&self) -> usize {
        self.buckets.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_bucket_allows_capacity_then_rejects() {
        let bucket = TokenBucket::per_minute(10);
        for _ in 0..10 {
            assert!(bucket.try_acquire().is_ok());
        }
        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(6));
    }

    #[test]
    fn test_refill_restores_tokens() {
        // 600/min refills at 10 tokens per second.
        let bucket = TokenBucket::per_minute(600);
        while bucket.try_acquire().is_ok() {}
        std::thread::sleep(Duration::from_millis(150));
        assert!(bucket.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_token() {
        let bucket = TokenBucket::per_minute(600);
        while bucket.try_acquire().is_ok() {}
        // A token refills within 100ms at this rate.
        tokio::time::timeout(Duration::from_millis(500), bucket.acquire())
            .await
            .expect("token should refill in time");
    }

    #[tokio::test]
    async fn test_registry_keys_are_independent() {
        let registry = BucketRegistry::new(2);
        assert!(registry.try_acquire("1.2.3.4").await.is_ok());
        assert!(registry.try_acquire("1.2.3.4").await.is_ok());
        let retry = registry.try_acquire("1.2.3.4").await.unwrap_err();
        assert!(retry >= 1);
        // A different key still has a full bucket.
        assert!(registry.try_acquire("5.6.7.8").await.is_ok());
        assert_eq!(registry.tracked_keys().await, 2);
    }
}
