use crate::error::{ExecutorError, Result};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

type Retryable = Arc<dyn Fn(&ExecutorError) -> bool + Send + Sync>;

/// Exponential backoff for idempotent agent commands.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
    retryable: Retryable,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("multiplier", &self.multiplier)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1,
            retryable: Arc::new(|_| false),
        }
    }

    /// Three attempts, waiting 4s then 8s, only on connectivity failures.
    pub fn read_only() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(4),
            max_backoff: Duration::from_secs(10),
            multiplier: 2,
            retryable: Arc::new(ExecutorError::is_connectivity),
        }
    }

    pub fn with_retryable<F>(mut self, retryable: F) -> Self
    where
        F: Fn(&ExecutorError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(retryable);
        self
    }

    /// Delay after the `attempt`-th failure, counting from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
            .max(self.initial_backoff.min(self.max_backoff))
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && (self.retryable)(&e) => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        "'{}' failed (attempt {}/{}): {}. Retrying in {:?}.",
                        operation,
                        attempt,
                        self.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_backoff_schedule() {
        let policy = RetryPolicy::read_only();
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(2), Duration::from_secs(8));
        assert_eq!(policy.backoff(3), Duration::from_secs(10));
        assert_eq!(policy.backoff(30), Duration::from_secs(10));
    }

    #[test]
    fn test_none_never_waits() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff(1), Duration::ZERO);
    }

    fn failed(code: i32) -> ExecutorError {
        ExecutorError::CommandFailed {
            target: "hpc".into(),
            command: "squeue".into(),
            code,
            stderr: "slurm_load_jobs error: Socket timed out".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate_retries_matching_errors() {
        let policy = RetryPolicy::read_only().with_retryable(|e| {
            e.is_connectivity() || matches!(e, ExecutorError::CommandFailed { code: 1, .. })
        });
        let mut attempts = 0;
        let result = policy
            .run("squeue", || {
                attempts += 1;
                let outcome = if attempts < 3 { Err(failed(1)) } else { Ok(attempts) };
                async move { outcome }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_at_once() {
        let mut attempts = 0;
        let result: Result<()> = RetryPolicy::read_only()
            .run("squeue", || {
                attempts += 1;
                async { Err(failed(2)) }
            })
            .await;
        assert!(matches!(result, Err(ExecutorError::CommandFailed { code: 2, .. })));
        assert_eq!(attempts, 1);
    }
}
