//! Bounded retry with exponential backoff for transient transport failures.
use crate::error::TransportError;
use crate::http::{HttpClient, HttpResponse};
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never less than 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            ..Self::default()
        }
    }

    /// Delay before attempt number `attempt + 1`, doubling each time and capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(%err, attempt, ?delay, "{what} failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Wraps an [`HttpClient`] so every call is retried according to a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryingClient<H> {
    inner: H,
    policy: RetryPolicy,
}

impl<H: HttpClient> RetryingClient<H> {
    pub fn new(inner: H, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<H: HttpClient> HttpClient for RetryingClient<H> {
    async fn get(&self, url: &Url, bearer: Option<&str>) -> Result<HttpResponse, TransportError> {
        self.policy
            .run("GET", move || self.inner.get(url, bearer))
            .await
    }

    async fn post_form(
        &self,
        url: &Url,
        form: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        self.policy
            .run("POST", move || self.inner.post_form(url, form))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockHttp;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(9), Duration::from_millis(350));
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_recovers_from_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let http = MockHttp::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TransportError::Timeout("slow".into()))
            } else {
                Ok(HttpResponse::new(200, "ok"))
            }
        });
        let client = RetryingClient::new(http.clone(), fast_policy(3));
        let url = Url::parse("https://catalog.test/x").unwrap();

        let response = client.get(&url, None).await.unwrap();

        assert_eq!(response.body, "ok");
        assert_eq!(http.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let http = MockHttp::new(|_| Err(TransportError::Connect("reset".into())));
        let client = RetryingClient::new(http.clone(), fast_policy(2));
        let url = Url::parse("https://catalog.test/x").unwrap();

        let err = client.get(&url, None).await.unwrap_err();

        assert_eq!(err, TransportError::Connect("reset".into()));
        assert_eq!(http.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_failures() {
        let http = MockHttp::new(|_| Err(TransportError::Other("bad url".into())));
        let client = RetryingClient::new(http.clone(), fast_policy(5));
        let url = Url::parse("https://catalog.test/x").unwrap();

        assert!(client.post_form(&url, &[]).await.is_err());
        assert_eq!(http.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_http_status_is_not_retried() {
        let http = MockHttp::new(|_| Ok(HttpResponse::new(503, "busy")));
        let client = RetryingClient::new(http.clone(), fast_policy(5));
        let url = Url::parse("https://catalog.test/x").unwrap();

        let response = client.get(&url, None).await.unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(http.requests().len(), 1);
    }
}
