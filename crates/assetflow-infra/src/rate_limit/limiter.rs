use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use assetflow_core::models::JobKind;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    /// Holds two seconds' worth of tokens, starting full.
    fn with_rate(rate: f64) -> Self {
        Self {
            tokens: rate * 2.0,
            capacity: rate * 2.0,
            refill_rate: rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn take(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let missing = 1.0 - self.tokens;
        Err(Duration::from_secs_f64((missing / self.refill_rate).max(0.0)))
    }
}

/// Limits how fast jobs of the expensive kinds start.
///
/// Only transcodes are limited. Every other kind starts as soon as a worker
/// is free, so the worker pool size is its only bound.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<JobKind, TokenBucket>>>,
    transcode_rate: f64,
}

impl RateLimiter {
    pub fn new(transcode_rate: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            transcode_rate,
        }
    }

    fn rate_for(&self, kind: JobKind) -> Option<f64> {
        match kind {
            JobKind::Transcode => Some(self.transcode_rate),
            _ => None,
        }
    }

    async fn take(&self, kind: JobKind) -> Result<f64, Duration> {
        let Some(rate) = self.rate_for(kind) else {
            return Ok(f64::INFINITY);
        };
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(kind)
            .or_insert_with(|| TokenBucket::with_rate(rate));
        bucket.take().map(|()| bucket.tokens)
    }

    /// Take a token for `kind` if one is available right now.
    pub async fn try_acquire(&self, kind: JobKind) -> bool {
        self.take(kind).await.is_ok()
    }

    /// Tokens left for `kind`; unlimited kinds report infinity.
    pub async fn available_tokens(&self, kind: JobKind) -> f64 {
        let Some(rate) = self.rate_for(kind) else {
            return f64::INFINITY;
        };
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(kind)
            .or_insert_with(|| TokenBucket::with_rate(rate));
        bucket.refill();
        bucket.tokens
    }
}
