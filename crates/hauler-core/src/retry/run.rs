//! Retry loop: run an async attempt until success or the policy says stop.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::error::TransferError;
use super::policy::{RetryDecision, RetryPolicy};

/// Runs `f` until it succeeds or the retry policy says to stop. `f` gets the
/// 1-based attempt number. Backoff sleeps end early on cancellation.
///
/// Returns the final result together with the number of attempts made.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut f: F,
) -> (Result<T, TransferError>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TransferError>>,
{
    let mut attempt = 1u32;
    loop {
        if cancel.is_cancelled() {
            return (Err(TransferError::Cancelled), attempt.saturating_sub(1));
        }
        let err = match f(attempt).await {
            Ok(v) => return (Ok(v), attempt),
            Err(e) => e,
        };
        match policy.decide(attempt, err.kind()) {
            RetryDecision::NoRetry => return (Err(err), attempt),
            RetryDecision::Cancelled => return (Err(TransferError::Cancelled), attempt),
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    op = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return (Err(TransferError::Cancelled), attempt),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}
