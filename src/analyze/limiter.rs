// src/analyze/limiter.rs
//! Bounds in-flight extraction calls and retries rate-limited ones.

use metrics::{counter, gauge};
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::RetryPolicy;
use crate::error::{PipelineError, Result};

pub struct ExtractionLimiter {
    permits: Arc<Semaphore>,
    capacity: usize,
    retry: RetryPolicy,
    call_timeout: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ExtractionLimiter {
    pub fn new(capacity: usize, retry: RetryPolicy, call_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        gauge!("extraction_limiter_capacity").set(capacity as f64);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            retry,
            call_timeout,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously executing calls seen so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Run `task` under a permit. `CapabilityRateLimited` is retried with capped
    /// exponential backoff plus jitter; the permit is released while sleeping.
    /// Any other error, or exhausting the attempts, is returned to the caller.
    pub async fn run<F, Fut, T>(&self, mut task: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let res = self.run_once(&mut task).await;
            match res {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    counter!("extraction_retries_total").increment(1);
                    tracing::debug!(
                        target: "analysis",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "extraction rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn run_once<F, Fut, T>(&self, task: &mut F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PipelineError::CapabilityUnavailable("limiter closed".into()))?;

        let _slot = InFlight::enter(&self.in_flight, &self.peak);
        counter!("extraction_calls_total").increment(1);

        let res = tokio::time::timeout(self.call_timeout, task()).await;

        match res {
            Ok(r) => r,
            Err(_) => Err(PipelineError::CapabilityUnavailable(format!(
                "timed out after {} ms",
                self.call_timeout.as_millis()
            ))),
        }
    }

    /// Policy delay for this retry plus up to 25% jitter, never above the cap.
    fn backoff(&self, retry: u32) -> Duration {
        let base = self.retry.delay_for(retry);
        let jitter_max = (base.as_millis() as u64) / 4;
        let jitter = if jitter_max == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_max)
        };
        (base + Duration::from_millis(jitter)).min(Duration::from_millis(self.retry.max_delay_ms))
    }
}

/// Counts one executing call; released on drop, including cancellation.
struct InFlight<'a> {
    count: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = count.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        gauge!("extraction_in_flight").set(now as f64);
        Self { count }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let left = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!("extraction_in_flight").set(left as f64);
    }
}
