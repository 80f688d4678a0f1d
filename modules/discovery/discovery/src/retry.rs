//! Exponential backoff for transient remote errors.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use discovery_sdk::error::OcmError;

/// Exponential backoff policy: delays double from `initial_interval` up to
/// `max_interval`; the whole retry loop is bounded by `max_elapsed_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed_time: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            max_elapsed_time: Duration::from_secs(5 * 60),
        }
    }
}

/// Run `operation`, retrying transient failures under the given policy.
///
/// Only errors classified transient by [`OcmError::is_transient`] are
/// retried; everything else aborts immediately. Cancellation during a
/// backoff delay returns the last error.
///
/// # Errors
/// Returns the final error once the policy's time budget is exhausted, a
/// permanent error occurs, or the token is cancelled.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: BackoffPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, OcmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OcmError>>,
{
    let started = Instant::now();
    let mut delay = policy.initial_interval;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => err,
        };

        if started.elapsed() + delay > policy.max_elapsed_time {
            return Err(err);
        }
        tracing::debug!(error = %err, delay_ms = delay.as_millis() as u64, "transient error, retrying");

        tokio::select! {
            () = cancel.cancelled() => return Err(err),
            () = tokio::time::sleep(delay) => {}
        }
        delay = delay.saturating_mul(2).min(policy.max_interval);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(1),
            max_elapsed_time: Duration::from_secs(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = retry_with_backoff(policy(), &cancel, || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(OcmError::Connection("connection refused".into()))
            } else {
                Ok(42u32)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_aborts_immediately() {
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry_with_backoff(policy(), &cancel, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(OcmError::NotFound {
                reference: "acme/app:1.0".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(OcmError::NotFound { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_elapsed_time() {
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let tight = BackoffPolicy {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(100),
            max_elapsed_time: Duration::from_millis(250),
        };

        let result: Result<(), _> = retry_with_backoff(tight, &cancel, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(OcmError::Timeout("deadline".into()))
        })
        .await;

        assert!(matches!(result, Err(OcmError::Timeout(_))));
        // 0ms, 100ms, 200ms attempts fit in the 250ms budget.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = retry_with_backoff(policy(), &cancel, || async {
            Err(OcmError::Connection("connection refused".into()))
        })
        .await;

        assert!(matches!(result, Err(OcmError::Connection(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn substring_classified_errors_are_retried() {
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = retry_with_backoff(policy(), &cancel, || async {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(OcmError::Other("upstream said: too many requests".into()))
            } else {
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
