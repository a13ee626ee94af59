use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff policy for outbound calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles the delay each time)
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Provider calls made while a user waits: 3 attempts, 250ms then 500ms
    pub fn translation_call() -> Self {
        Self::new(3, Duration::from_millis(250)).with_max_delay(Duration::from_secs(1))
    }

    /// Preset: dictionary lookups for new phrases (2 attempts)
    pub fn lexicon_call() -> Self {
        Self::new(2, Duration::from_millis(500)).with_max_delay(Duration::from_secs(1))
    }

    /// Single attempt, no backoff
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay after the given failed attempt (1-indexed); zero for attempt 0
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::translation_call()
    }
}

/// Execute an async operation with retries, consulting `should_retry` after
/// each failure.
///
/// Client errors (4xx) should not be retried; rate limits, 5xx responses
/// and transport failures usually should. A zero `max_attempts` is treated
/// as one attempt.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);

    let mut attempt = 1;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} recovered on attempt {}", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if attempt == max_attempts || !should_retry(&error) {
            warn!(
                "{} failed after {} of {} attempts: {}",
                operation_name, attempt, max_attempts, error
            );
            return Err(error);
        }

        let delay = config.delay_for_attempt(attempt);
        debug!(
            "{} attempt {} failed ({}), retrying in {:?}",
            operation_name, attempt, error, delay
        );
        sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Run `with_retry_if` over an operation failing with `errors` in order,
    /// then succeeding with the attempt number. Returns the result and the
    /// number of attempts made.
    async fn run(
        config: RetryConfig,
        errors: &[&'static str],
        should_retry: impl Fn(&&'static str) -> bool,
    ) -> (Result<u32, &'static str>, u32) {
        let attempts = AtomicU32::new(0);
        let result = with_retry_if(
            &config,
            "provider call",
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                let outcome = errors.get(n as usize).map_or(Ok(n + 1), |e| Err(*e));
                async move { outcome }
            },
            should_retry,
        )
        .await;
        (result, attempts.load(Ordering::SeqCst))
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts, Duration::from_millis(5))
    }

    #[test]
    fn test_presets() {
        let default = RetryConfig::default();
        assert_eq!(default.max_attempts, 3);
        assert_eq!(default.initial_delay, Duration::from_millis(250));
        assert_eq!(default.max_delay, Duration::from_secs(1));

        assert_eq!(RetryConfig::lexicon_call().max_attempts, 2);
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let config = RetryConfig::new(6, Duration::from_millis(100))
            .with_backoff_multiplier(3.0)
            .with_max_delay(Duration::from_millis(500));

        let delays: Vec<u64> = (0..5)
            .map(|attempt| config.delay_for_attempt(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![0, 100, 300, 500, 500]);
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let (result, attempts) = run(fast(3), &[], |_| true).await;
        assert_eq!(result, Ok(1));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (result, attempts) = run(fast(3), &["429", "503"], |_| true).await;
        assert_eq!(result, Ok(3));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_gives_up_with_last_error() {
        let (result, attempts) = run(fast(2), &["503", "502", "500"], |_| true).await;
        assert_eq!(result, Err("502"));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (result, attempts) = run(fast(3), &["400", "503"], |e| !e.starts_with('4')).await;
        assert_eq!(result, Err("400"));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let (result, attempts) = run(fast(0), &["503"], |_| true).await;
        assert_eq!(result, Err("503"));
        assert_eq!(attempts, 1);
    }
}
