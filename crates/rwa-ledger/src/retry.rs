//! Retry logic with exponential backoff for ledger gateway calls.
//!
//! Reads are retried on any transport error. Submissions are retried only
//! when the connection could not be established, because a request that was
//! delivered may already have taken effect.

use std::future::Future;
use std::time::Duration;

/// Maximum number of retry attempts after the initial request.
const MAX_RETRIES: u32 = 3;

/// Base delay between retries (doubles each attempt: 200ms, 400ms, 800ms).
const BASE_DELAY_MS: u64 = 200;

/// Send a read-only request, retrying every transport failure.
pub(crate) async fn retry_read<F, Fut>(f: F) -> Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    retry_while(f, |_| true).await
}

/// Send a submission, retrying only undelivered requests.
pub(crate) async fn retry_submit<F, Fut>(f: F) -> Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    retry_while(f, reqwest::Error::is_connect).await
}

async fn retry_while<F, Fut, P>(f: F, retryable: P) -> Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    P: Fn(&reqwest::Error) -> bool,
{
    for attempt in 0..MAX_RETRIES {
        match f().await {
            Ok(resp) => return Ok(resp),
            Err(e) if retryable(&e) => {
                let delay = Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt));
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = MAX_RETRIES,
                    "ledger gateway request failed, retrying in {delay:?}: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
    // Final attempt.
    f().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn closed_port_request(
        count: Arc<AtomicU32>,
    ) -> impl Future<Output = Result<reqwest::Response, reqwest::Error>> {
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            // Guaranteed-closed port: connection refused.
            reqwest::Client::builder()
                .timeout(Duration::from_millis(50))
                .build()
                .unwrap()
                .get("http://127.0.0.1:1/")
                .send()
                .await
        }
    }

    #[tokio::test]
    async fn retry_read_exhausts_all_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let result = retry_read(|| closed_port_request(count.clone())).await;
        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[tokio::test]
    async fn retry_submit_retries_connection_refused() {
        let count = Arc::new(AtomicU32::new(0));
        let result = retry_submit(|| closed_port_request(count.clone())).await;
        let err = result.unwrap_err();
        assert!(err.is_connect());
        assert_eq!(count.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }
}
