//! Rate limiting and circuit breaking for external backend calls (§6, §7).
//!
//! Every OCR/VLM/embedder/reranker call is wrapped by a [`CircuitBreaker`]
//! (closed/open/half-open per the spec's thresholds) and a [`TokenBucket`]
//! rate limiter, mirroring the semaphore-guarded connection pool pattern the
//! teacher used for its Ollama client.

use crate::config::ResilienceConfig;
use crate::error::{BackendError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Token-bucket rate limiter. Refills continuously at `rate_per_sec`.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    rate_per_sec: f64,
    capacity: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            rate_per_sec,
            capacity,
        }
    }

    /// Block until a single token is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - state.tokens) / self.rate_per_sec))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// Closed → Open after `failure_threshold` consecutive failures.
/// Open → HalfOpen after `recovery_time_ms`.
/// HalfOpen → Closed after `half_open_success_threshold` successes, → Open on any failure.
pub struct CircuitBreaker {
    name: String,
    config: ResilienceConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: ResilienceConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
        }
    }

    async fn pre_check(&self) -> std::result::Result<(), BackendError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed().as_millis() as u64)
                    .unwrap_or(u64::MAX);
                if elapsed >= self.config.recovery_time_ms {
                    debug!(breaker = %self.name, "circuit breaker half-opening");
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    Ok(())
                } else {
                    Err(BackendError::CircuitOpen(self.name.clone()))
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_success_threshold {
                    debug!(breaker = %self.name, "circuit breaker closing");
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(breaker = %self.name, "circuit breaker opening");
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                warn!(breaker = %self.name, "circuit breaker re-opening from half-open");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Open => {}
        }
    }

    /// Run `f` through the breaker, updating state based on its outcome.
    pub async fn call<T, F, Fut>(&self, f: F) -> std::result::Result<T, BackendError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, BackendError>>,
    {
        self.pre_check().await?;
        match f().await {
            Ok(v) => {
                self.record_success().await;
                Ok(v)
            }
            Err(e) => {
                self.record_failure().await;
                Err(e)
            }
        }
    }
}

/// Bounded retry with exponential backoff, used by backend wrappers for
/// transient resource errors. OCR callers must pass `max_retries = 1`.
pub async fn retry_with_backoff<T, F, Fut>(max_retries: u32, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                let delay = Duration::from_millis(100 * 2u64.pow(attempt));
                warn!(attempt, ?delay, "retrying after transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Wraps a circuit breaker + rate limiter pair for one named backend.
pub struct Resilient {
    pub breaker: Arc<CircuitBreaker>,
    pub limiter: Arc<TokenBucket>,
}

impl Resilient {
    pub fn new(name: impl Into<String>, config: ResilienceConfig, rate_per_sec: f64, burst: f64) -> Self {
        Self {
            breaker: Arc::new(CircuitBreaker::new(name, config)),
            limiter: Arc::new(TokenBucket::new(rate_per_sec, burst)),
        }
    }

    pub async fn call<T, F, Fut>(&self, f: F) -> std::result::Result<T, BackendError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, BackendError>>,
    {
        self.limiter.acquire().await;
        self.breaker.call(f).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_rejects() {
        let cfg = ResilienceConfig {
            failure_threshold: 2,
            recovery_time_ms: 50_000,
            half_open_success_threshold: 1,
            ocr_timeout_secs: 1,
        };
        let breaker = CircuitBreaker::new("test", cfg);

        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(BackendError::OcrApi("boom".into())) })
                .await;
        }

        let result = breaker.call(|| async { Ok::<_, BackendError>(()) }).await;
        assert!(matches!(result, Err(BackendError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn breaker_half_opens_after_recovery_and_closes_on_success() {
        let cfg = ResilienceConfig {
            failure_threshold: 1,
            recovery_time_ms: 10,
            half_open_success_threshold: 1,
            ocr_timeout_secs: 1,
        };
        let breaker = CircuitBreaker::new("test", cfg);

        let _ = breaker
            .call(|| async { Err::<(), _>(BackendError::OcrApi("boom".into())) })
            .await;

        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = breaker.call(|| async { Ok::<_, BackendError>(()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn token_bucket_throttles() {
        let bucket = TokenBucket::new(1000.0, 1.0);
        bucket.acquire().await;
        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
