//! Bounded waits and exponential backoff for port calls.

use std::future::Future;
use std::time::Duration;

use mealnudge_core::{Error, Result};

/// Calculate exponential backoff duration.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let backoff = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(backoff.min(max_ms))
}

/// Await `fut` for at most `limit`, folding an elapsed deadline into
/// `Error::Timeout`.
///
/// # Errors
///
/// Returns the future's own error, or `Error::Timeout` if it did not finish
/// in time.
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::timeout(operation, limit))?
}
