//! Jittered exponential retry for connection establishment.
//!
//! The delay doubles per attempt from a configurable base, carries a random
//! jitter component, and is capped at a maximum. Errors wrapped in
//! [`RealtimeError::NonRetryable`] abort the loop immediately.

use crate::error::{RealtimeError, Result};
use std::future::Future;
use std::time::Duration;

/// Compute the backoff delay for the given attempt (0-based).
///
/// `base * 2^attempt` plus up to 100ms of jitter, capped at `max`.
pub(crate) fn jittered_exponential_backoff(
    base: Duration,
    attempt: u32,
    max: Duration,
) -> Duration {
    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let delay = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let jitter = rand::random::<u64>() % 100;
    Duration::from_millis(delay.saturating_add(jitter)).min(max)
}

/// Run `op` until it succeeds, the attempt budget is exhausted, or it fails
/// with a non-retryable error.
///
/// A non-retryable failure is returned with its marker intact so callers
/// can distinguish it from an exhausted budget.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    mut op: F,
    base: Duration,
    max_delay: Duration,
    max_attempts: u32,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => {
                log::debug!(
                    "[appsync-realtime] Aborting retry after non-retryable error: {}",
                    err
                );
                return Err(err);
            },
            Err(err) if attempt + 1 >= max_attempts => {
                log::warn!(
                    "[appsync-realtime] Giving up after {} attempts: {}",
                    attempt + 1,
                    err
                );
                return Err(err);
            },
            Err(err) => {
                let delay = jittered_exponential_backoff(base, attempt, max_delay);
                log::debug!(
                    "[appsync-realtime] Attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    err,
                    delay
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(5);

        let d0 = jittered_exponential_backoff(base, 0, max);
        assert!(d0 >= Duration::from_millis(100) && d0 < Duration::from_millis(200));

        let d3 = jittered_exponential_backoff(base, 3, max);
        assert!(d3 >= Duration::from_millis(800) && d3 < Duration::from_millis(900));

        // Far past the cap.
        let d20 = jittered_exponential_backoff(base, 20, max);
        assert_eq!(d20, max);
    }

    #[test]
    fn test_backoff_never_overflows() {
        let d = jittered_exponential_backoff(Duration::from_millis(1000), u32::MAX, Duration::from_secs(30));
        assert_eq!(d, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = retry_with_backoff(
            move || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(RealtimeError::WebSocket("refused".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            },
            Duration::from_millis(10),
            Duration::from_secs(1),
            5,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_aborts_after_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<()> = retry_with_backoff(
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(RealtimeError::Handshake {
                        message: "unauthorized".to_string(),
                        error_type: None,
                        error_code: Some(401),
                    }
                    .non_retryable())
                }
            },
            Duration::from_millis(10),
            Duration::from_secs(1),
            5,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The marker survives so callers can tell this apart from an
        // exhausted budget.
        match result {
            Err(err @ RealtimeError::NonRetryable(_)) => {
                assert!(matches!(err.into_inner(), RealtimeError::Handshake { .. }));
            },
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_budget_is_honored() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<()> = retry_with_backoff(
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(RealtimeError::WebSocket("refused".to_string()))
                }
            },
            Duration::from_millis(10),
            Duration::from_secs(1),
            3,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
