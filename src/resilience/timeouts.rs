//! Timeout enforcement.
//!
//! Every call that leaves the process (store backends, handler dispatch)
//! goes through [`with_deadline`]. Timeout errors are distinct from other
//! errors so callers can degrade to a weaker backend or fail the request.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// An operation did not complete within its deadline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} timed out after {}ms", .limit.as_millis())]
pub struct DeadlineExceeded {
    /// Label of the operation that timed out.
    pub operation: &'static str,
    /// The deadline that was applied.
    pub limit: Duration,
}

/// Run `fut` with an upper bound on its duration.
pub async fn with_deadline<F>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DeadlineExceeded { operation, limit })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let err = with_deadline("slow", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await
        .unwrap_err();

        assert_eq!(err.operation, "slow");
        assert_eq!(err.to_string(), "slow timed out after 50ms");
    }

    #[tokio::test]
    async fn test_completes_in_time() {
        let value = with_deadline("fast", Duration::from_secs(1), async { 7 }).await;
        assert_eq!(value, Ok(7));
    }
}
