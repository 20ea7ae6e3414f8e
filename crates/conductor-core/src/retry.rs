//! Exponential backoff for transient failures.

use std::{future::Future, time::Duration};

use tracing::warn;

use conductor_contracts::{error::ConductorResult, policy::RetryPolicy};

/// Delay before retry number `attempt` (zero-based):
/// `retry_delay * 2^attempt`, capped at `max_delay`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    let seconds = policy
        .retry_delay_seconds
        .saturating_mul(factor)
        .min(policy.max_delay_seconds);
    Duration::from_secs(seconds)
}

/// Run `op` until it succeeds, fails with a non-transient error, or has been
/// retried `max_retries` times. The last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, scope: &str, mut op: F) -> ConductorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ConductorResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = backoff_delay(policy, attempt);
                warn!(
                    scope = %scope,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use conductor_contracts::error::ConductorError;

    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay_seconds: 30,
            max_delay_seconds: 600,
        }
    }

    fn transient() -> ConductorError {
        ConductorError::DeliveryFailed {
            message_id: "m".to_string(),
            reason: "channel closed".to_string(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(3);
        assert_eq!(backoff_delay(&p, 0), Duration::from_secs(30));
        assert_eq!(backoff_delay(&p, 1), Duration::from_secs(60));
        assert_eq!(backoff_delay(&p, 4), Duration::from_secs(480));
        assert_eq!(backoff_delay(&p, 5), Duration::from_secs(600));
        assert_eq!(backoff_delay(&p, 200), Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: ConductorResult<()> = retry_with_backoff(&policy(3), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            }
        })
        .await;

        assert_eq!(result, Err(transient()));
        assert_eq!(calls.load(Ordering::SeqCst), 4, "one attempt plus three retries");
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&policy(3), "test", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok("delivered")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("delivered"));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: ConductorResult<()> = retry_with_backoff(&policy(3), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ConductorError::UnknownAgent {
                    agent_id: "ghost".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(ConductorError::UnknownAgent { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
