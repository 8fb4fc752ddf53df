use crate::{config::ScraperSettings, http::build_scraper_client, scrape::robots::RobotsCache};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, header::CONTENT_TYPE};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::warn;
use url::Url;

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("blocked by robots.txt: {0}")]
    Blocked(String),
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Timeouts, connect failures, 429 and 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Connect(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if err.is_connect() {
            FetchError::Connect(err.to_string())
        } else {
            FetchError::Request(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl Fetched {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Fetched, FetchError>;
}

/// GET with an optional robots.txt gate and bounded exponential backoff.
pub struct HttpFetcher {
    client: Client,
    robots: Option<Arc<RobotsCache>>,
    max_retries: u32,
    backoff_base: Duration,
}

impl HttpFetcher {
    pub fn for_scraping(settings: &ScraperSettings, robots: Arc<RobotsCache>) -> Self {
        Self {
            client: build_scraper_client(&settings.user_agent),
            robots: Some(robots),
            max_retries: settings.max_retries.max(1),
            backoff_base: settings.backoff_base,
        }
    }

    /// Single attempt, no robots gate. Used for media downloads.
    pub fn direct(client: Client) -> Self {
        Self {
            client,
            robots: None,
            max_retries: 1,
            backoff_base: Duration::ZERO,
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Fetched, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(FetchError::from_reqwest)?;
        Ok(Fetched {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Fetched, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        if let Some(robots) = &self.robots
            && !robots.allows(&parsed).await
        {
            return Err(FetchError::Blocked(url.to_string()));
        }

        let mut attempt = 1;
        loop {
            match self.fetch_once(url).await {
                Ok(fetched) => return Ok(fetched),
                Err(err) if attempt < self.max_retries && err.is_retryable() => {
                    let wait = backoff_delay(self.backoff_base, attempt);
                    warn!(
                        target = "salon_gbp.scrape",
                        url,
                        attempt,
                        max_retries = self.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "fetch_retry"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// `base * 2^(attempt-1)` plus up to half of that again as jitter.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    let wait = base.saturating_mul(factor);
    let jitter = rand::rng().random_range(0.0..=0.5) * wait.as_secs_f64();
    wait + Duration::from_secs_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn fetcher(max_retries: u32) -> HttpFetcher {
        let settings = ScraperSettings {
            max_retries,
            backoff_base: Duration::from_millis(1),
            ..Default::default()
        };
        let robots = Arc::new(RobotsCache::new(
            Client::new(),
            settings.user_agent.clone(),
            settings.robots_ttl,
        ));
        HttpFetcher::for_scraping(&settings, robots)
    }

    /// `/page` answers `status` and counts hits. No robots.txt route, so allow-all.
    fn answering(status: StatusCode, hits: Arc<AtomicUsize>) -> Router {
        Router::new().route(
            "/page",
            get(move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    status
                }
            }),
        )
    }

    #[tokio::test]
    async fn disallowed_path_is_blocked_before_any_request() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new()
            .route("/robots.txt", get(|| async { "User-agent: *\nDisallow: /private/\n" }))
            .route(
                "/private/page",
                get(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        "secret"
                    }
                }),
            );
        let base = serve(router).await;

        let err = fetcher(3)
            .fetch(&format!("{base}/private/page"))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Blocked(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(answering(StatusCode::NOT_FOUND, hits.clone())).await;

        let err = fetcher(3).fetch(&format!("{base}/page")).await.unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_errors_use_every_attempt_then_return_the_last_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(answering(StatusCode::SERVICE_UNAVAILABLE, hits.clone())).await;

        let err = fetcher(3).fetch(&format!("{base}/page")).await.unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 503, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_failure_then_success_returns_the_body() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/page",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::TOO_MANY_REQUESTS, "slow down")
                    } else {
                        (StatusCode::OK, "ok")
                    }
                }
            }),
        );
        let base = serve(router).await;

        let fetched = fetcher(3).fetch(&format!("{base}/page")).await.unwrap();

        assert_eq!(fetched.text(), "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn only_transient_failures_retry() {
        let status = |status| FetchError::Status {
            status,
            url: "https://example.com".into(),
        };
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(FetchError::Timeout("t".into()).is_retryable());
        assert!(FetchError::Connect("c".into()).is_retryable());
        assert!(!FetchError::Blocked("b".into()).is_retryable());
    }

    #[test]
    fn backoff_doubles_with_bounded_jitter() {
        let base = Duration::from_millis(100);
        for attempt in 1..=4u32 {
            let floor = base * 2u32.pow(attempt - 1);
            let delay = backoff_delay(base, attempt);
            assert!(delay >= floor);
            assert!(delay <= floor + floor / 2);
        }
        assert_eq!(backoff_delay(Duration::ZERO, 3), Duration::ZERO);
    }
}
