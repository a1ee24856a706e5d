//! Inline waiting for conditions the platform fulfils asynchronously.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Call `predicate` every `interval` until it yields a value or `timeout`
/// elapses.
///
/// `Ok(Some(v))` when the condition was met, `Ok(None)` on timeout. An
/// error from the predicate aborts the wait and is returned as is.
///
/// Time comes from tokio's clock, so a paused test runtime drives it
/// without real delays.
pub async fn poll_until<T, E, F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut predicate: F,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(value) = predicate().await? {
            return Ok(Some(value));
        }

        if Instant::now() + interval > deadline {
            return Ok(None);
        }

        sleep(interval).await;
    }
}
