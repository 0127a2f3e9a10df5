use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use super::repository::StoreError;

const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Bounded exponential backoff for idempotent store reads.
#[derive(Debug, Clone, Copy)]
pub struct ReadRetry {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl ReadRetry {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    /// Retries only [`StoreError::Unavailable`]; every other error returns at once.
    pub async fn run<F, Fut, T>(&self, context: &str, operation: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(context, attempt, "store read succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error @ StoreError::Unavailable(_)) if attempt < self.max_attempts => {
                    warn!(
                        context,
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        %error,
                        "store read failed, retrying"
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> ReadRetry {
        ReadRetry::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn recovers_from_transient_outage() {
        let calls = AtomicU32::new(0);
        let result = policy()
            .run("vehicle", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::Unavailable("timeout".to_string()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .run("vehicle", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Unavailable("offline".to_string()))
            })
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_logical_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .run("vehicle", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::NotFound)
            })
            .await;
        assert_eq!(result, Err(StoreError::NotFound));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
