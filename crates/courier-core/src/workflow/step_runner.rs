//! Step runner: per-attempt timeout and retry with exponential backoff.
//!
//! Every node body (built-in or capability) runs through [`run_with_retry`].
//! Attempt `n` (0-based) that fails is followed by a sleep of
//! `base_delay_ms * 2^n` before attempt `n + 1`, up to `retries` extra
//! attempts. The last error is returned unchanged.

use std::future::Future;
use std::time::Duration;

use courier_types::config::ExecutionPolicy;
use courier_types::workflow::NodeConfig;

use super::capability::CapabilityError;

/// Upper bound on the backoff exponent.
const MAX_BACKOFF_SHIFT: u32 = 20;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors from executing a single node.
///
/// Display strings are recorded verbatim as the node's `error`.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// The node is misconfigured; nothing was executed.
    #[error("{0}")]
    Configuration(String),

    /// An attempt exceeded its timeout.
    #[error("step timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

// ---------------------------------------------------------------------------
// StepPolicy
// ---------------------------------------------------------------------------

/// Effective retry/timeout policy for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPolicy {
    pub retries: u32,
    pub base_delay_ms: u64,
    pub timeout_ms: u64,
}

impl StepPolicy {
    /// Node configuration overrides the process-wide defaults field by field.
    pub fn resolve(config: &NodeConfig, defaults: &ExecutionPolicy) -> Self {
        Self {
            retries: config.retry_count().unwrap_or(defaults.retry_count),
            base_delay_ms: config.retry_delay_ms().unwrap_or(defaults.retry_delay_ms),
            timeout_ms: config.timeout_ms().unwrap_or(defaults.timeout_ms),
        }
    }
}

impl From<ExecutionPolicy> for StepPolicy {
    fn from(policy: ExecutionPolicy) -> Self {
        Self {
            retries: policy.retry_count,
            base_delay_ms: policy.retry_delay_ms,
            timeout_ms: policy.timeout_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Race `fut` against a timer. A `timeout_ms` of zero disables the timer.
pub async fn run_with_timeout<F, T>(fut: F, timeout_ms: u64) -> Result<T, StepError>
where
    F: Future<Output = Result<T, StepError>>,
{
    if timeout_ms == 0 {
        return fut.await;
    }
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(StepError::Timeout { ms: timeout_ms }),
    }
}

/// Run `operation` with per-attempt timeout and exponential backoff.
pub async fn run_with_retry<F, Fut, T>(
    mut operation: F,
    retries: u32,
    base_delay_ms: u64,
    timeout_ms: u64,
) -> Result<T, StepError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StepError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match run_with_timeout(operation(), timeout_ms).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < retries => {
                let delay = backoff_delay(base_delay_ms, attempt);
                tracing::debug!(
                    attempt = attempt + 1,
                    retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "step attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Convenience wrapper taking a resolved [`StepPolicy`].
pub async fn run_step<F, Fut, T>(operation: F, policy: StepPolicy) -> Result<T, StepError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StepError>>,
{
    run_with_retry(operation, policy.retries, policy.base_delay_ms, policy.timeout_ms).await
}

/// Delay after the failed attempt `attempt` (0-based).
pub fn backoff_delay(base_delay_ms: u64, attempt: u32) -> Duration {
    let shift = attempt.min(MAX_BACKOFF_SHIFT);
    Duration::from_millis(base_delay_ms.saturating_mul(1u64 << shift))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_delay(100, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(100, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(100, 3), Duration::from_millis(800));
        assert_eq!(backoff_delay(0, 5), Duration::ZERO);
        assert_eq!(backoff_delay(u64::MAX, 40), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_policy_resolution_prefers_node_config() {
        let config: NodeConfig =
            serde_json::from_value(json!({ "retryCount": 3, "timeoutMs": "250" })).unwrap();
        let policy = StepPolicy::resolve(&config, &ExecutionPolicy::default());
        assert_eq!(
            policy,
            StepPolicy {
                retries: 3,
                base_delay_ms: 1_000,
                timeout_ms: 250
            }
        );

        let policy = StepPolicy::resolve(&NodeConfig::default(), &ExecutionPolicy::default());
        assert_eq!(policy, StepPolicy::from(ExecutionPolicy::default()));
    }

    #[tokio::test]
    async fn test_succeeds_after_two_failures_with_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result = run_with_retry(
            || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(StepError::from(CapabilityError::Failed(format!("attempt {n} failed"))))
                    } else {
                        Ok(n)
                    }
                }
            },
            2,
            100,
            0,
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(300), "100ms + 200ms backoff");
    }

    #[tokio::test]
    async fn test_returns_last_error_when_retries_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = run_with_retry(
            || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Err(StepError::from(CapabilityError::Failed(format!("failure {n}"))))
                }
            },
            1,
            1,
            0,
        )
        .await;

        assert_eq!(result.unwrap_err().to_string(), "failure 1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_produces_message() {
        let result: Result<(), _> = run_with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            },
            20,
        )
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, StepError::Timeout { ms: 20 }));
        assert_eq!(err.to_string(), "step timed out after 20ms");
    }

    #[tokio::test]
    async fn test_zero_timeout_disables_timer() {
        let result = run_with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, StepError>(7)
            },
            0,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_zero_retries_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = run_step(
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StepError::Configuration("nope".into()))
                }
            },
            StepPolicy {
                retries: 0,
                base_delay_ms: 1,
                timeout_ms: 0,
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
