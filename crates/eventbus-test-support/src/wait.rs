//! Polling helper for asserting on background tasks.

use std::time::Duration;

/// Polls `check` every 10ms until it returns `true`.
///
/// # Panics
///
/// Panics with `what` if `check` is still `false` after five seconds.
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: AsyncFnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
