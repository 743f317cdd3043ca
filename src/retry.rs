//! Fixed-interval retry for cheap, transiently failing cluster operations.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

/// How many times to try an operation and how long to pause in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` attempts are used up.
///
/// Returns the last error once attempts are exhausted. The pause between
/// attempts is fixed; there is no backoff and no jitter. A policy with zero
/// attempts still runs the operation once.
pub async fn try_run_command<F, Fut>(policy: RetryPolicy, mut op: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= attempts => {
                debug!("Giving up after {} attempt(s): {}", attempt, e);
                return Err(e);
            }
            Err(e) => {
                debug!(
                    "Attempt {}/{} failed, retrying in {:?}: {}",
                    attempt, attempts, policy.interval, e
                );
                tokio::time::sleep(policy.interval).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let calls = AtomicU32::new(0);
        let result = try_run_command(RetryPolicy::new(5, FAST), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result = try_run_command(RetryPolicy::new(5, FAST), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                anyhow::bail!("attempt {n} failed");
            }
            Ok(())
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let result = try_run_command(RetryPolicy::new(4, FAST), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(anyhow::anyhow!("attempt {n} failed"))
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "attempt 4 failed");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_attempts_runs_once() {
        let calls = AtomicU32::new(0);
        let result = try_run_command(RetryPolicy::new(0, FAST), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("nope"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
