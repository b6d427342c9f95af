//! Transactional retry executor
//!
//! Re-runs a unit of work that failed with a retryable error, sleeping with
//! jittered exponential backoff between attempts, until the retry budget is
//! spent. The budget is measured from the first failure.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};

use super::error::{DriverError, DriverResult};

/// Retry budget and backoff shape
///
/// | field | default |
/// |-------|---------|
/// | `max_retry_time` | 30s |
/// | `initial_delay` | 1s |
/// | `multiplier` | 2.0 |
/// | `jitter_factor` | 0.2 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    /// Total time retries may take; zero means a single attempt
    pub max_retry_time: Duration,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Growth of the delay per retry
    pub multiplier: f64,
    /// Each delay varies by up to this fraction, both ways
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl RetrySettings {
    /// Default backoff with the given budget
    pub fn new(max_retry_time: Duration) -> Self {
        Self {
            max_retry_time,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    /// Set the first delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the jitter factor
    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    fn validate(&self) -> DriverResult<()> {
        if !(self.multiplier >= 1.0) || !self.multiplier.is_finite() {
            return Err(DriverError::configuration(format!(
                "Retry multiplier should be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(DriverError::configuration(format!(
                "Retry jitter factor should be in [0, 1], got {}",
                self.jitter_factor
            )));
        }
        Ok(())
    }
}

/// Runs units of work under [`RetrySettings`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    settings: RetrySettings,
}

impl RetryExecutor {
    pub fn new(settings: RetrySettings) -> DriverResult<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Run `work` until it succeeds, fails with a non-retryable error, or
    /// the budget is spent. The last error is returned as is.
    pub async fn run<F, Fut, T>(&self, mut work: F) -> DriverResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let max_retry_time = self.settings.max_retry_time;
        let mut first_failure: Option<Instant> = None;
        let mut next_delay = self.settings.initial_delay;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let error = match work().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_retryable() || max_retry_time.is_zero() {
                return Err(error);
            }

            let elapsed = first_failure.get_or_insert_with(Instant::now).elapsed();
            if elapsed >= max_retry_time {
                tracing::warn!(attempt, error = %error, "retry time exhausted");
                return Err(error);
            }

            let delay = self.jittered(next_delay).min(max_retry_time - elapsed);
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after transient failure"
            );
            sleep(delay).await;

            next_delay = next_delay
                .mul_f64(self.settings.multiplier)
                .min(max_retry_time);
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let secs = delay.as_secs_f64();
        let jitter = secs * self.settings.jitter_factor;
        if jitter <= 0.0 {
            return delay;
        }
        let value = rand::thread_rng().gen_range((secs - jitter)..=(secs + jitter));
        Duration::from_secs_f64(value.max(0.0))
    }
}

/// Run `work` with default backoff and the given budget.
pub async fn run_with_retry<F, Fut, T>(work: F, max_retry_time: Duration) -> DriverResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DriverResult<T>>,
{
    RetryExecutor::new(RetrySettings::new(max_retry_time))?
        .run(work)
        .await
}
