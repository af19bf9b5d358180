//! Bounded, cancellable calls into the durable stores.

use service_core::retry::{retry_with_backoff, RetryConfig};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::AuthError;
use crate::config::StoreConfig;
use crate::store::StoreError;

/// Every store call gets a per-attempt timeout, bounded retries for
/// transient failures, and is abandoned as soon as the caller cancels.
#[derive(Clone, Debug)]
pub struct StoreCallPolicy {
    timeout: Duration,
    retry: RetryConfig,
}

impl StoreCallPolicy {
    pub fn new(timeout: Duration, retry: RetryConfig) -> Self {
        Self { timeout, retry }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(
            Duration::from_millis(config.call_timeout_ms),
            RetryConfig {
                max_retries: config.max_retries,
                initial_backoff: Duration::from_millis(config.initial_backoff_ms),
                ..RetryConfig::quick()
            },
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Idempotent calls: reads and revocations.
    pub async fn run<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        f: F,
    ) -> Result<T, AuthError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.run_with(&self.retry, cancel, operation, f).await
    }

    /// Non-idempotent writes. A retry after a lost acknowledgement could turn
    /// a successful insert into a conflict or a refresh rotation into a replay.
    pub async fn run_once<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        f: F,
    ) -> Result<T, AuthError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.run_with(&RetryConfig::no_retry(), cancel, operation, f)
            .await
    }

    async fn run_with<F, Fut, T>(
        &self,
        retry: &RetryConfig,
        cancel: &CancellationToken,
        operation: &str,
        mut f: F,
    ) -> Result<T, AuthError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        let timeout = self.timeout;
        let attempts = retry_with_backoff(retry, operation, || {
            let call = f();
            async move {
                match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout(timeout)),
                }
            }
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(operation, "Store call cancelled by caller");
                Err(AuthError::Cancelled)
            }
            result = attempts => result.map_err(AuthError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> StoreCallPolicy {
        StoreCallPolicy::new(
            Duration::from_millis(20),
            RetryConfig {
                max_retries: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                backoff_multiplier: 2.0,
                add_jitter: false,
            },
        )
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_unavailable() {
        let result: Result<(), _> = policy()
            .run(&CancellationToken::new(), "slow", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(AuthError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_run_once_does_not_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = policy()
            .run_once(&CancellationToken::new(), "write", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(StoreError::Unavailable("down".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(AuthError::ServiceUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_abandons_call() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let slow = StoreCallPolicy::new(Duration::from_secs(10), RetryConfig::no_retry());
        let result: Result<(), _> = slow
            .run(&cancel, "hang", || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(AuthError::Cancelled)));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_calls() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = policy()
            .run(&cancel, "skip", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;
        assert!(matches!(result, Err(AuthError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
