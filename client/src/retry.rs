//! Bounded retry of proxy calls

use lrc_shared::ProxyError;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// Run `call` up to `max_tries` times, waiting `delay` between attempts
///
/// Only transient proxy errors are retried; anything else is returned at once.
pub async fn retry_call<T, F, Fut>(
    what: &str,
    max_tries: u32,
    delay: Duration,
    mut call: F,
) -> Result<T, ProxyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProxyError>>,
{
    let max_tries = max_tries.max(1);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_tries => {
                warn!(
                    "[LRC] {} failed, retrying ({}/{}): {}",
                    what, attempt, max_tries, e
                );
                attempt += 1;
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
