//! Retry with exponential backoff for control-plane calls
//!
//! Only transient failures (throttling, server errors, broken connections)
//! are retried. Permission and validation errors are returned on the first
//! attempt because repeating the same request cannot fix them.

use std::future::Future;
use std::time::Duration;

use crate::descriptor::ResourceDescriptor;
use crate::error::ClusterError;
use crate::observability::{DeployMetrics, RunLogger};

/// Upper bound for a single backoff delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(5),
            max_delay: MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn from_descriptor(descriptor: &ResourceDescriptor) -> Self {
        Self {
            max_retries: descriptor.max_retries,
            initial_delay: Duration::from_secs(descriptor.retry_backoff_seconds),
            max_delay: MAX_BACKOFF,
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `operation`, retrying transient [`ClusterError`]s per `policy`
///
/// Returns the first success, the first non-transient error, or the last
/// transient error once the retries are used up.
pub async fn retry_transient<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    logger: &RunLogger,
    metrics: &DeployMetrics,
    mut operation: F,
) -> Result<T, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClusterError>>,
{
    let mut retry = 0u32;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() || retry >= policy.max_retries => return Err(e),
            Err(e) => {
                retry += 1;
                let delay = policy.delay_for(retry);
                logger.log_retry(operation_name, retry, delay, &e.to_string());
                metrics.inc_retries(operation_name);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_secs(5),
            max_delay: MAX_BACKOFF,
        }
    }

    fn logger() -> RunLogger {
        RunLogger::new("frontend", "frontend-app")
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = policy(10);
        assert_eq!(p.delay_for(1), Duration::from_secs(5));
        assert_eq!(p.delay_for(2), Duration::from_secs(10));
        assert_eq!(p.delay_for(3), Duration::from_secs(20));
        assert_eq!(p.delay_for(4), Duration::from_secs(40));
        assert_eq!(p.delay_for(5), MAX_BACKOFF);
        assert_eq!(p.delay_for(40), MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = tokio::time::Instant::now();

        let result = retry_transient(&policy(3), "apply_deployment", &logger(), &DeployMetrics::new(), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ClusterError::Transport("connection reset".to_string()))
                } else {
                    Ok("applied")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "applied");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 5s + 10s of backoff
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> =
            retry_transient(&policy(2), "apply_service", &logger(), &DeployMetrics::new(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ClusterError::api(503, "ServiceUnavailable", "etcd leader changed")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> =
            retry_transient(&policy(5), "apply_config_map", &logger(), &DeployMetrics::new(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ClusterError::api(403, "Forbidden", "configmaps is forbidden")) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_retry_policy() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> =
            retry_transient(&RetryPolicy::none(), "namespace", &logger(), &DeployMetrics::new(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ClusterError::Transport("timeout".to_string())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
