//! Cancellation scope for external calls.

use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Returned when the surrounding scope was cancelled before the call finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Run `fut` unless `cancel` fires first; the in-flight future is dropped on cancellation.
pub async fn guarded<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, Cancelled>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Cancelled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_completes_when_not_cancelled() {
        let token = CancellationToken::new();
        assert_eq!(guarded(&token, async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_cancelled_scope_aborts_pending_call() {
        let token = CancellationToken::new();
        let child = token.child_token();
        token.cancel();
        let result = guarded(&child, tokio::time::sleep(Duration::from_secs(3600))).await;
        assert_eq!(result, Err(Cancelled));
    }
}
