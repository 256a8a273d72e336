use crate::error::{PipelineError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Fixed-delay retry contract for a whole stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_secs(max_attempts: usize, delay_secs: u64) -> Self {
        Self::new(max_attempts, Duration::from_secs(delay_secs))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the zero-based attempt number.
    pub async fn run<F, Fut, T>(&self, stage: &str, mut op: F) -> Result<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if !err.is_retryable() || attempt >= self.max_attempts {
                        return Err(err);
                    }
                    warn!(
                        stage,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %err,
                        "Stage failed, retrying"
                    );
                    sleep(self.delay).await;
                }
            }
        }
    }
}

impl RetryPolicy {
    /// Like [`RetryPolicy::run`], but an `Ok` value that `is_complete` rejects
    /// (a partial batch) is also retried. The last value is returned as-is
    /// once the budget is spent.
    pub async fn run_until_complete<F, Fut, T, C>(
        &self,
        stage: &str,
        mut op: F,
        is_complete: C,
    ) -> Result<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&T) -> bool,
    {
        let mut attempt = 0;
        loop {
            let outcome = op(attempt).await;
            attempt += 1;
            match outcome {
                Ok(value) if is_complete(&value) || attempt >= self.max_attempts => {
                    return Ok(value)
                }
                Err(err) if !err.is_retryable() || attempt >= self.max_attempts => {
                    return Err(err)
                }
                Ok(_) => {
                    warn!(stage, attempt, max_attempts = self.max_attempts, "Stage incomplete, retrying");
                }
                Err(err) => {
                    warn!(stage, attempt, max_attempts = self.max_attempts, error = %err, "Stage failed, retrying");
                }
            }
            sleep(self.delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_secs(3, 3)
    }
}

/// Run a blocking stage body on the blocking pool so retries can await between attempts.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(PipelineError::from)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn new_clamps_attempts() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_transient_failures_until_success() {
        let policy = RetryPolicy::from_secs(3, 30);
        let attempts = Arc::new(AtomicUsize::new(0));

        let result = policy
            .run("extract", |attempt| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err(PipelineError::Remote("connection reset".to_string()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_after_max_attempts() {
        let policy = RetryPolicy::from_secs(2, 3);
        let attempts = Arc::new(AtomicUsize::new(0));

        let result: Result<()> = policy
            .run("load", |_| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(PipelineError::CommitAborted("rename failed".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(PipelineError::CommitAborted(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_complete_retries_partial_results() {
        let policy = RetryPolicy::from_secs(3, 3);

        let value = policy
            .run_until_complete("extract", |attempt| async move { Ok(attempt) }, |&n| n >= 1)
            .await
            .unwrap();
        assert_eq!(value, 1);

        let last = policy
            .run_until_complete("extract", |attempt| async move { Ok(attempt) }, |_| false)
            .await
            .unwrap();
        assert_eq!(last, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_does_not_retry_configuration_errors() {
        let policy = RetryPolicy::from_secs(5, 3);
        let attempts = Arc::new(AtomicUsize::new(0));

        let result: Result<()> = policy
            .run("extract", |_| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(PipelineError::Config("missing bucket".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_gives_up_at_once_on_busy_staging() {
        let policy = RetryPolicy::from_secs(3, 30);
        let attempts = Arc::new(AtomicUsize::new(0));

        let result: Result<()> = policy
            .run("load", |_| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(PipelineError::StagingBusy("data/load/stage".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(PipelineError::StagingBusy(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
