//! Relevance scorer adapter.
//!
//! Wraps the external LLM scoring service behind the [`RelevanceScorer`]
//! trait. The adapter owns schema strictness: whatever the service
//! returns is either the exact `{score, is_relevant, reason}` shape or
//! a malformed-response error. Thresholding is the caller's decision.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use patchwork_common::{truncate_to_boundary, Patch};

/// Input text is truncated to this many bytes before the call.
const MAX_SCORER_INPUT_BYTES: usize = 12 * 1024;
/// Backoff ladder for 429 responses, shared shape with the fetcher.
const BACKOFF_MS: [u64; 3] = [250, 1_000, 4_000];
const MAX_SCORE_ATTEMPTS: usize = 3;

pub type Result<T> = std::result::Result<T, ScorerError>;

#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("scorer returned malformed response: {0}")]
    Malformed(String),

    #[error("scorer unavailable: {0}")]
    Unavailable(String),
}

/// A scoring verdict. `score` is 0..=100; the save/deny decision is
/// made by the processor against the patch threshold.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Score {
    pub score: i32,
    pub is_relevant: bool,
    pub reason: String,
}

#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score(&self, patch: &Patch, title: &str, url: &str, text: &str) -> Result<Score>;
}

// ---------------------------------------------------------------------------
// HttpScorer (production)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ScoreRequest<'a> {
    patch_handle: &'a str,
    patch_title: &'a str,
    aliases: &'a [String],
    tags: &'a [String],
    title: &'a str,
    url: &'a str,
    text: &'a str,
}

pub struct HttpScorer {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpScorer {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| ScorerError::Unavailable(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl RelevanceScorer for HttpScorer {
    async fn score(&self, patch: &Patch, title: &str, url: &str, text: &str) -> Result<Score> {
        let request = ScoreRequest {
            patch_handle: &patch.handle,
            patch_title: &patch.title,
            aliases: &patch.aliases,
            tags: &patch.tags,
            title,
            url,
            text: truncate_to_boundary(text, MAX_SCORER_INPUT_BYTES),
        };

        debug!(url, patch = %patch.handle, "Scoring citation content");

        for attempt in 0..MAX_SCORE_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(BACKOFF_MS[attempt - 1])).await;
            }

            let response = self
                .http
                .post(&self.endpoint)
                .headers(self.headers()?)
                .json(&request)
                .send()
                .await
                .map_err(|e| ScorerError::Unavailable(e.to_string()))?;

            let status = response.status();
            if status.as_u16() == 429 {
                warn!(url, attempt = attempt + 1, "Scorer rate limited, backing off");
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ScorerError::Unavailable(format!(
                    "scorer error ({status}): {body}"
                )));
            }

            let body = response
                .text()
                .await
                .map_err(|e| ScorerError::Unavailable(e.to_string()))?;
            return parse_score(&body);
        }

        Err(ScorerError::Unavailable(
            "scorer rate limit persisted through backoff".to_string(),
        ))
    }
}

/// Parse and validate the strict JSON contract. Anything off-schema is
/// a malformed response, not a low score.
fn parse_score(body: &str) -> Result<Score> {
    let score: Score =
        serde_json::from_str(body).map_err(|e| ScorerError::Malformed(e.to_string()))?;
    if !(0..=100).contains(&score.score) {
        return Err(ScorerError::Malformed(format!(
            "score {} out of range 0..=100",
            score.score
        )));
    }
    Ok(score)
}

// ---------------------------------------------------------------------------
// MockScorer (for tests)
// ---------------------------------------------------------------------------

/// Returns a fixed verdict and records every call for assertions.
pub struct MockScorer {
    verdict: Score,
    calls: std::sync::Mutex<Vec<String>>,
}

impl MockScorer {
    pub fn returning(score: i32, is_relevant: bool) -> Self {
        Self {
            verdict: Score {
                score,
                is_relevant,
                reason: "mock verdict".to_string(),
            },
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// URLs scored so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelevanceScorer for MockScorer {
    async fn score(&self, _patch: &Patch, _title: &str, url: &str, _text: &str) -> Result<Score> {
        self.calls.lock().unwrap().push(url.to_string());
        Ok(self.verdict.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use uuid::Uuid;

    fn test_patch() -> Patch {
        Patch {
            id: Uuid::new_v4(),
            handle: "quantum-computing".to_string(),
            title: "Quantum Computing".to_string(),
            aliases: vec!["QC".to_string()],
            tags: vec!["physics".to_string()],
            relevance_threshold: None,
        }
    }

    // --- schema strictness ---

    #[test]
    fn valid_verdict_parses() {
        let s = parse_score(r#"{"score": 72, "is_relevant": true, "reason": "on topic"}"#).unwrap();
        assert_eq!(s.score, 72);
        assert!(s.is_relevant);
    }

    #[test]
    fn wrong_field_names_are_malformed() {
        // The legacy aiPriorityScore shape is off-contract.
        let err = parse_score(r#"{"aiPriorityScore": 72, "is_relevant": true, "reason": "x"}"#)
            .unwrap_err();
        assert!(matches!(err, ScorerError::Malformed(_)));
    }

    #[test]
    fn wrong_types_are_malformed() {
        let err =
            parse_score(r#"{"score": "seventy", "is_relevant": true, "reason": "x"}"#).unwrap_err();
        assert!(matches!(err, ScorerError::Malformed(_)));
    }

    #[test]
    fn out_of_range_scores_are_malformed() {
        for body in [
            r#"{"score": 101, "is_relevant": true, "reason": "x"}"#,
            r#"{"score": -1, "is_relevant": false, "reason": "x"}"#,
        ] {
            assert!(matches!(parse_score(body), Err(ScorerError::Malformed(_))));
        }
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(
            parse_score("I think this is relevant!"),
            Err(ScorerError::Malformed(_))
        ));
    }

    // --- HTTP behavior ---

    #[tokio::test]
    async fn posts_truncated_text_with_bearer_auth() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/score")
                    .header("authorization", "Bearer secret-key")
                    .json_body_partial(r#"{"patch_handle": "quantum-computing"}"#);
                then.status(200)
                    .json_body(serde_json::json!({"score": 80, "is_relevant": true, "reason": "ok"}));
            })
            .await;

        let scorer = HttpScorer::new(server.url("/score"), "secret-key");
        let long_text = "word ".repeat(10_000);
        let verdict = scorer
            .score(&test_patch(), "Title", "https://example.com/x", &long_text)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(verdict.score, 80);
    }

    #[tokio::test]
    async fn rate_limits_are_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/score");
                then.status(429);
            })
            .await;

        let scorer = HttpScorer::new(server.url("/score"), "k");
        let err = scorer
            .score(&test_patch(), "T", "https://example.com/x", "text")
            .await
            .unwrap_err();
        assert!(matches!(err, ScorerError::Unavailable(_)));
        mock.assert_hits_async(MAX_SCORE_ATTEMPTS).await;
    }

    #[tokio::test]
    async fn server_errors_are_unavailable_not_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/score");
                then.status(500).body("boom");
            })
            .await;

        let scorer = HttpScorer::new(server.url("/score"), "k");
        let err = scorer
            .score(&test_patch(), "T", "https://example.com/x", "text")
            .await
            .unwrap_err();
        assert!(matches!(err, ScorerError::Unavailable(_)));
    }
}
