//! Retry with exponential backoff
//!
//! Failed jobs are re-attempted as a whole: all steps run again from the
//! first. `max_retries = N` means exactly N+1 attempts before the job is
//! marked Failed. Cancellation is never retried.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::workflow::{parse_duration, RetrySpec};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the initial attempt)
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (2.0 doubles the delay each time)
    pub backoff_multiplier: f64,
    /// Optional jitter factor (0.0 to 1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Build from the retry: block of a job definition
    pub fn from_spec(spec: &RetrySpec) -> Self {
        let mut config = Self {
            max_retries: spec.max_retries,
            ..Self::default()
        };
        if let Some(delay) = spec.backoff.as_deref().and_then(parse_duration) {
            config.initial_delay = delay;
        }
        config
    }

    /// Set max retries
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set jitter factor (0.0 to 1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

/// Retry policy that executes operations with exponential backoff
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.config.max_delay.as_millis() as f64);

        let jittered_delay = if self.config.jitter > 0.0 {
            let jitter_range = capped_delay * self.config.jitter;
            let jitter_offset = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
            (capped_delay + jitter_offset).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_millis(jittered_delay as u64)
    }

    /// Execute an operation, retrying transient failures with backoff.
    ///
    /// Step failures and timeouts are retryable; cancellation and
    /// configuration errors surface immediately. The backoff sleep observes
    /// the cancellation token, so a cancelled run never waits out a backoff.
    /// The operation receives the attempt index and the delay actually slept
    /// before it (None on the first attempt).
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, EngineError>
    where
        F: Fn(u32, Option<Duration>) -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut last_error = None;
        let mut slept: Option<Duration> = None;

        for attempt in 0..=self.config.max_retries {
            match operation(attempt, slept).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !Self::is_retryable(&e) {
                        return Err(e);
                    }

                    last_error = Some(e);

                    // Don't sleep after the last attempt
                    if attempt < self.config.max_retries {
                        let delay = self.calculate_delay(attempt);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                        }
                        slept = Some(delay);
                    }
                }
            }
        }

        // max_retries >= 0 guarantees at least one attempt ran
        Err(last_error.unwrap_or(EngineError::Cancelled))
    }

    /// Determine if an error is retryable
    fn is_retryable(error: &EngineError) -> bool {
        matches!(
            error,
            EngineError::StepFailed { .. } | EngineError::Timeout { .. }
        )
    }
}
