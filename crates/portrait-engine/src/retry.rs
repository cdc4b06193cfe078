use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(2000);

/// What the retry loop needs to know about an operation's error type.
pub trait RetrySignal {
    /// Rate-limit failures are the only ones worth waiting out.
    fn is_rate_limited(&self) -> bool;

    /// Value returned when the caller's cancellation token fires.
    fn cancelled() -> Self;
}

/// Bounded exponential backoff for rate-limited calls.
///
/// Attempt `i` (0-based) that fails rate-limited waits `initial_delay * 2^i`
/// before the next one. There is no jitter. Any other failure, or a rate-limit
/// on the last attempt, is returned untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_INITIAL_DELAY)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        self.initial_delay.saturating_mul(2u32.saturating_pow(attempt_index))
    }

    /// Runs `operation` until it succeeds, fails for good, or `cancel` fires.
    ///
    /// The operation receives the 0-based attempt index. Cancellation is observed
    /// both while an attempt is in flight and during the backoff wait.
    pub async fn execute<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetrySignal + Display,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(E::cancelled());
            }
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(E::cancelled()),
                outcome = operation(attempt) => outcome,
            };
            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let is_last = attempt + 1 >= self.max_attempts;
            if is_last || !err.is_rate_limited() {
                return Err(err);
            }

            let wait = self.delay_for(attempt);
            warn!(
                error = %err,
                wait_ms = wait.as_millis() as u64,
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                "rate limited; backing off before retry"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(E::cancelled()),
                _ = tokio::time::sleep(wait) => {}
            }
            attempt += 1;
        }
    }
}
