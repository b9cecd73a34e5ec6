//! Bounded retry with exponential backoff and jitter for source calls.
//! Only `SourceUnavailable` is worth retrying; everything else returns
//! immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use citescope_common::Result;

/// Attempts per source call before the unit is skipped.
pub const MAX_ATTEMPTS: u32 = 3;

/// Base backoff; actual delay is base * 3^attempt plus random jitter.
const RETRY_BASE: Duration = Duration::from_millis(500);

pub async fn with_retry<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                let backoff = RETRY_BASE * 3u32.pow(attempt);
                let jitter = Duration::from_millis(rand::rng().random_range(0..250));
                warn!(
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Source call failed, retrying after backoff"
                );
                tokio::time::sleep(backoff + jitter).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use citescope_common::{Error, SourceTag};

    use super::*;

    #[tokio::test]
    async fn success_passes_through() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_records_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::malformed(SourceTag::Crossref, "bad payload")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unavailable_source_is_retried_to_the_bound() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::source_unavailable(SourceTag::PubMed, "timeout")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retry(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::source_unavailable(SourceTag::PubMed, "blip"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
