//! Polite HTTP fetcher.
//!
//! Bounded redirects, per-request timeout, descriptive User-Agent, body
//! size cap, per-host spacing via [`HostGate`], and a retry ladder for
//! transient failures. 4xx responses (except 408/429) are never retried.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};
use url::Url;

use crate::canonical::registrable_domain;
use crate::rate_limit::HostGate;
use crate::robots::RobotsCache;

/// Retry backoff ladder for transient failures.
const BACKOFF_MS: [u64; 3] = [250, 1_000, 4_000];
/// Total attempts for a transient failure (initial + retries).
const MAX_FETCH_ATTEMPTS: usize = 3;

pub type Result<T> = std::result::Result<T, FetchError>;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("dns resolution failed: {0}")]
    Dns(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("client error {status}")]
    HttpClient { status: u16 },

    #[error("server error {status}")]
    HttpServer { status: u16 },

    #[error("body exceeded {limit} bytes")]
    TooLarge { limit: usize },

    #[error("blocked by robots.txt")]
    BlockedByRobots,
}

impl FetchError {
    /// Transient failures are worth the backoff ladder.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_)
            | FetchError::Dns(_)
            | FetchError::Connect(_)
            | FetchError::HttpServer { .. } => true,
            FetchError::HttpClient { status } => matches!(status, 408 | 429),
            FetchError::TooLarge { .. } | FetchError::BlockedByRobots => false,
        }
    }

    /// Stable error code persisted on denied citations. Transport-level
    /// failures share one code; the message keeps the detail.
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) | FetchError::Dns(_) | FetchError::Connect(_) => "fetch_failed",
            FetchError::HttpClient { .. } => "http_4xx",
            FetchError::HttpServer { .. } => "http_5xx",
            FetchError::TooLarge { .. } => "too_large",
            FetchError::BlockedByRobots => "blocked_by_robots",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub max_body_bytes: usize,
    pub per_host_min_spacing: Duration,
    pub user_agent: String,
    pub respect_robots: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_body_bytes: 10 * 1024 * 1024,
            per_host_min_spacing: Duration::from_millis(500),
            user_agent: "patchwork-discovery/0.1 (+https://patchwork.dev; discovery pipeline)"
                .to_string(),
            respect_robots: true,
        }
    }
}

pub struct Fetcher {
    http: reqwest::Client,
    gate: HostGate,
    robots: RobotsCache,
    config: FetcherConfig,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            gate: HostGate::new(config.per_host_min_spacing),
            robots: RobotsCache::new(http.clone()),
            http,
            config,
        }
    }

    /// GET a URL, following redirects, with the full retry ladder.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let parsed = Url::parse(url).map_err(|e| FetchError::Connect(e.to_string()))?;
        self.check_robots(&parsed).await?;

        let start = std::time::Instant::now();
        let response = self.send_with_retry(reqwest::Method::GET, url, &parsed).await?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = self.read_capped(response).await?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        debug!(url, status, bytes = body.len(), elapsed_ms, "Fetched");

        Ok(FetchedPage {
            status,
            final_url,
            content_type,
            body,
            elapsed_ms,
        })
    }

    /// Cheap liveness probe for citation verification: HEAD, falling
    /// back to GET when the server rejects HEAD (405/501). The body of
    /// the GET fallback is discarded.
    pub async fn probe(&self, url: &str) -> Result<u16> {
        let parsed = Url::parse(url).map_err(|e| FetchError::Connect(e.to_string()))?;
        self.check_robots(&parsed).await?;

        match self.send_with_retry(reqwest::Method::HEAD, url, &parsed).await {
            Ok(resp) => Ok(resp.status().as_u16()),
            Err(FetchError::HttpClient { status }) if matches!(status, 405 | 501) => {
                let resp = self.send_with_retry(reqwest::Method::GET, url, &parsed).await?;
                Ok(resp.status().as_u16())
            }
            Err(e) => Err(e),
        }
    }

    async fn check_robots(&self, parsed: &Url) -> Result<()> {
        if !self.config.respect_robots {
            return Ok(());
        }
        let host = parsed.host_str().unwrap_or_default();
        if host.is_empty() {
            return Ok(());
        }
        if !self.robots.allows(parsed.scheme(), host, parsed.path()).await {
            return Err(FetchError::BlockedByRobots);
        }
        Ok(())
    }

    async fn send_with_retry(
        &self,
        method: reqwest::Method,
        url: &str,
        parsed: &Url,
    ) -> Result<reqwest::Response> {
        let domain = registrable_domain(parsed.host_str().unwrap_or_default());

        let mut last_err = FetchError::Connect("no attempt made".to_string());
        for attempt in 0..MAX_FETCH_ATTEMPTS {
            if attempt > 0 {
                let jitter = rand::rng().random_range(0..100);
                tokio::time::sleep(Duration::from_millis(BACKOFF_MS[attempt - 1] + jitter)).await;
            }
            self.gate.acquire(&domain).await;

            let result = self.http.request(method.clone(), url).send().await;
            let err = match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() || status.is_informational() || status.is_redirection()
                    {
                        return Ok(resp);
                    }
                    if status.is_server_error() {
                        FetchError::HttpServer {
                            status: status.as_u16(),
                        }
                    } else {
                        FetchError::HttpClient {
                            status: status.as_u16(),
                        }
                    }
                }
                Err(e) => classify_transport_error(&e),
            };

            if !err.is_transient() {
                return Err(err);
            }
            warn!(url, attempt = attempt + 1, error = %err, "Transient fetch failure");
            last_err = err;
        }
        Err(last_err)
    }

    /// Read the body, bailing out as soon as the cap is exceeded.
    async fn read_capped(&self, mut response: reqwest::Response) -> Result<Vec<u8>> {
        let limit = self.config.max_body_bytes;
        if let Some(len) = response.content_length() {
            if len as usize > limit {
                return Err(FetchError::TooLarge { limit });
            }
        }
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| classify_transport_error(&e))?
        {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

fn classify_transport_error(e: &reqwest::Error) -> FetchError {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(s) = source {
        message.push_str(": ");
        message.push_str(&s.to_string());
        source = s.source();
    }

    if e.is_timeout() {
        return FetchError::Timeout(message);
    }
    let lower = message.to_ascii_lowercase();
    if lower.contains("dns") || lower.contains("lookup") || lower.contains("resolve") {
        return FetchError::Dns(message);
    }
    FetchError::Connect(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use httpmock::Method::HEAD;

    fn test_fetcher() -> Fetcher {
        Fetcher::new(FetcherConfig {
            timeout: Duration::from_secs(5),
            max_body_bytes: 1024,
            per_host_min_spacing: Duration::ZERO,
            user_agent: "patchwork-test/0".to_string(),
            respect_robots: false,
        })
    }

    #[tokio::test]
    async fn fetch_returns_body_and_content_type() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/page");
                then.status(200)
                    .header("content-type", "text/html; charset=utf-8")
                    .body("<html>hello</html>");
            })
            .await;

        let page = test_fetcher().fetch(&server.url("/page")).await.unwrap();
        mock.assert_async().await;
        assert_eq!(page.status, 200);
        assert_eq!(page.body, b"<html>hello</html>");
        assert!(page.content_type.unwrap().starts_with("text/html"));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/gone");
                then.status(404);
            })
            .await;

        let err = test_fetcher().fetch(&server.url("/gone")).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpClient { status: 404 }));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn server_errors_exhaust_the_retry_ladder() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/flaky");
                then.status(503);
            })
            .await;

        let err = test_fetcher().fetch(&server.url("/flaky")).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpServer { status: 503 }));
        mock.assert_hits_async(MAX_FETCH_ATTEMPTS).await;
    }

    #[tokio::test]
    async fn rate_limited_responses_are_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/busy");
                then.status(429);
            })
            .await;

        let err = test_fetcher().fetch(&server.url("/busy")).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpClient { status: 429 }));
        mock.assert_hits_async(MAX_FETCH_ATTEMPTS).await;
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/big");
                then.status(200).body("x".repeat(4096));
            })
            .await;

        let err = test_fetcher().fetch(&server.url("/big")).await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn probe_uses_head() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(HEAD).path("/alive");
                then.status(200);
            })
            .await;

        let status = test_fetcher().probe(&server.url("/alive")).await.unwrap();
        assert_eq!(status, 200);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn probe_falls_back_to_get_when_head_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(HEAD).path("/nohead");
                then.status(405);
            })
            .await;
        let get_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/nohead");
                then.status(200).body("ok");
            })
            .await;

        let status = test_fetcher().probe(&server.url("/nohead")).await.unwrap();
        assert_eq!(status, 200);
        get_mock.assert_async().await;
    }

    #[tokio::test]
    async fn robots_disallow_blocks_the_fetch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/robots.txt");
                then.status(200).body("User-agent: *\nDisallow: /private/");
            })
            .await;
        let page_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/private/page");
                then.status(200).body("secret");
            })
            .await;

        let fetcher = Fetcher::new(FetcherConfig {
            per_host_min_spacing: Duration::ZERO,
            respect_robots: true,
            ..FetcherConfig::default()
        });

        let err = fetcher
            .fetch(&server.url("/private/page"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::BlockedByRobots));
        page_mock.assert_hits_async(0).await;
    }
}
