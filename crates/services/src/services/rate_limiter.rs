use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Token-bucket limiter at the LLM client level (§5: "LLM: rate-limited at
/// the client level (token-bucket, default 100 req/min per process)").
/// Lock-free: tokens and the last-refill timestamp are both atomics, so
/// `check` never blocks a concurrent caller.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    tokens: AtomicU64,
    refill_per_sec: f64,
    last_refill_nanos: AtomicU64,
}

impl TokenBucket {
    pub fn new(capacity: u64, refill_per_minute: u64) -> Self {
        TokenBucket {
            capacity,
            tokens: AtomicU64::new(capacity),
            refill_per_sec: refill_per_minute as f64 / 60.0,
            last_refill_nanos: AtomicU64::new(now_nanos()),
        }
    }

    fn refill(&self) {
        let now = now_nanos();
        let last = self.last_refill_nanos.load(Ordering::Relaxed);
        let elapsed_secs = (now.saturating_sub(last)) as f64 / 1_000_000_000.0;
        if elapsed_secs <= 0.0 {
            return;
        }
        let added = (elapsed_secs * self.refill_per_sec) as u64;
        if added == 0 {
            return;
        }
        if self.last_refill_nanos.compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed).is_ok() {
            let current = self.tokens.load(Ordering::Relaxed);
            let new_value = (current + added).min(self.capacity);
            self.tokens.store(new_value, Ordering::Relaxed);
        }
    }

    /// Attempts to consume one token. Returns `true` if allowed.
    pub fn try_acquire(&self) -> bool {
        self.refill();
        loop {
            let current = self.tokens.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            if self
                .tokens
                .compare_exchange(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

fn now_nanos() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

/// Bounds total in-flight LLM calls process-wide via a semaphore (default
/// 16, §5) and per-model request rate via a token bucket. Keyed `DashMap`
/// because a deployment may route to more than one model, each with its own
/// quota.
pub struct LlmRateLimiter {
    inflight: Arc<Semaphore>,
    buckets: DashMap<String, Arc<TokenBucket>>,
    capacity: u64,
    refill_per_minute: u64,
}

pub struct LlmPermit<'a> {
    _permit: SemaphorePermit<'a>,
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded for model {0}")]
    Exceeded(String),
}

impl LlmRateLimiter {
    pub fn new(concurrency_limit: usize, refill_per_minute: u64) -> Self {
        LlmRateLimiter {
            inflight: Arc::new(Semaphore::new(concurrency_limit)),
            buckets: DashMap::new(),
            capacity: refill_per_minute,
            refill_per_minute,
        }
    }

    /// Acquires both the concurrency permit and a rate-limit token before a
    /// call is allowed to proceed. Holds the semaphore permit for the
    /// lifetime of the returned guard.
    pub async fn acquire(&self, model: &str) -> Result<LlmPermit<'_>, RateLimitError> {
        let bucket = self
            .buckets
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(self.capacity, self.refill_per_minute)))
            .clone();

        if !bucket.try_acquire() {
            return Err(RateLimitError::Exceeded(model.to_string()));
        }

        // Semaphore is never closed, so this only blocks until a slot frees.
        let permit = self.inflight.acquire().await.expect("semaphore never closed");
        Ok(LlmPermit { _permit: permit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_exhausts_after_capacity_requests() {
        let bucket = TokenBucket::new(3, 60);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }
}
