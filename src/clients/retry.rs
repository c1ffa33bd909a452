use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::SyncError;

pub const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 250;

/// Run `op`, retrying transient failures (network, 5xx, rate limits) with
/// exponential backoff plus random jitter. Non-retryable errors and the
/// final attempt's error surface to the caller unchanged.
pub async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = delay_for(attempt, &err);
                warn!(what, attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn delay_for(attempt: u32, err: &SyncError) -> Duration {
    // A server-stated retry window overrides our own schedule.
    if let SyncError::RateLimited {
        retry_after_secs: Some(secs),
    } = err
    {
        return Duration::from_secs(*secs);
    }
    let base = BASE_DELAY_MS * 2u64.pow(attempt);
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SyncError::Network("connection reset".into()))
            } else {
                Ok(42u32)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::Network("down".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn does_not_retry_fatal_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::Auth("bad token".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
