//! Time budget for calls into external collaborators.
//!
//! An unresponsive collaborator must not stall the loop forever, so every
//! perception, actuation and planning call runs under a fixed limit.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Await `call`, mapping expiry of `limit` into the caller's error type.
pub async fn bounded<T, E, F>(
    label: &str,
    limit: Duration,
    call: F,
    on_timeout: impl FnOnce(Duration) -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(call = label, timeout_ms = limit.as_millis() as u64, "external call timed out");
            Err(on_timeout(limit))
        }
    }
}
