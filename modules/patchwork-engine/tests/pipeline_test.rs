//! End-to-end pipeline tests over a live Postgres and a mock web.
//! Set DATABASE_TEST_URL or these tests are skipped.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use httpmock::Method::HEAD;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use patchwork_archive::{Extractor, Fetcher, FetcherConfig};
use patchwork_common::{
    CitationCandidate, CitationSection, Patch, QueueStatus, RelevanceDecision, ScanStatus,
};
use patchwork_engine::{
    FeedConfig, FeedOutcome, FeedWorker, LocalAgentService, MockAgentService, MockDispatcher,
    ProcessOutcome, Processor, ProcessorConfig,
};
use patchwork_scorer::{MockScorer, RelevanceScorer, Score, ScorerError};
use patchwork_store::Storage;

async fn test_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().await
}

async fn test_storage() -> Option<Storage> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let storage = Storage::connect(&url).await.ok()?;
    storage.migrate().await.ok()?;
    Some(storage)
}

async fn seed_patch(storage: &Storage) -> Patch {
    let patch = Patch {
        id: Uuid::new_v4(),
        handle: format!("pipeline-{}", Uuid::new_v4()),
        title: "Pipeline Test".to_string(),
        aliases: vec![],
        tags: vec![],
        relevance_threshold: None,
    };
    storage.patches().insert(&patch).await.unwrap();
    patch
}

/// Seed one pending citation pointing at `url`.
async fn seed_citation(storage: &Storage, patch: &Patch, url: &str) -> Uuid {
    let page_id = storage
        .pages()
        .insert(
            patch.id,
            &format!("Page_{}", Uuid::new_v4()),
            "https://en.wikipedia.org/wiki/Test",
        )
        .await
        .unwrap();
    storage
        .citations()
        .extract_and_store(
            page_id,
            &[CitationCandidate {
                url: url.to_string(),
                canonical_url: url.to_string(),
                title: Some("Cited article".to_string()),
                context: None,
                section: CitationSection::References,
                source_number: Some(1),
            }],
        )
        .await
        .unwrap();
    page_id
}

fn test_fetcher() -> std::sync::Arc<Fetcher> {
    std::sync::Arc::new(Fetcher::new(FetcherConfig {
        timeout: Duration::from_secs(5),
        max_body_bytes: 1024 * 1024,
        per_host_min_spacing: Duration::ZERO,
        user_agent: "patchwork-test/0".to_string(),
        respect_robots: false,
    }))
}

fn article_page() -> String {
    let paragraphs: String = (0..40)
        .map(|i| {
            format!(
                "<p>Paragraph {i}: a substantial sentence about the topic with enough \
                 words that the readability extraction keeps it in the article body.</p>"
            )
        })
        .collect();
    format!("<html><head><title>Cited Article</title></head><body><article>{paragraphs}</article></body></html>")
}

async fn mock_article(server: &MockServer, path: &str) {
    let path_owned = path.to_string();
    server
        .mock_async(move |when, then| {
            when.method(HEAD).path(path_owned);
            then.status(200);
        })
        .await;
    let path_owned = path.to_string();
    server
        .mock_async(move |when, then| {
            when.method(GET).path(path_owned);
            then.status(200)
                .header("content-type", "text/html; charset=utf-8")
                .body(article_page());
        })
        .await;
}

struct UnavailableScorer;

#[async_trait]
impl RelevanceScorer for UnavailableScorer {
    async fn score(
        &self,
        _patch: &Patch,
        _title: &str,
        _url: &str,
        _text: &str,
    ) -> Result<Score, ScorerError> {
        Err(ScorerError::Unavailable("scorer offline".to_string()))
    }
}

// =========================================================================
// S2: relevant citation is saved, queued, and dispatched
// =========================================================================

#[tokio::test]
async fn relevant_citation_is_saved_queued_and_dispatched() {
    let _guard = test_lock().await;
    let Some(storage) = test_storage().await else {
        return;
    };
    let server = MockServer::start_async().await;
    mock_article(&server, "/article").await;

    let patch = seed_patch(&storage).await;
    seed_citation(&storage, &patch, &server.url("/article")).await;

    let scorer = std::sync::Arc::new(MockScorer::returning(72, true));
    let dispatcher = std::sync::Arc::new(MockDispatcher::new());
    let processor = Processor::new(
        storage.clone(),
        test_fetcher(),
        std::sync::Arc::new(Extractor::new(500)),
        scorer.clone(),
        dispatcher.clone(),
        ProcessorConfig::default(),
    );

    let outcome = processor.process_one(&patch).await.unwrap();
    let ProcessOutcome::Saved(content_id) = outcome else {
        panic!("expected Saved, got {outcome:?}");
    };

    // Content row exists with the scorer's normalized score.
    let content = storage.content().get(content_id).await.unwrap().unwrap();
    assert_eq!(content.patch_id, patch.id);
    assert_eq!(content.title, "Cited Article");
    assert!((content.relevance_score - 0.72).abs() < 1e-9);
    assert_eq!(content.category, "wikipedia_citation");

    // Citation is terminal-saved and coupled to the content row.
    let citation = storage
        .citations()
        .get(citation_for(&storage, content_id).await)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(citation.relevance_decision, Some(RelevanceDecision::Saved));
    assert_eq!(citation.saved_content_id, Some(content_id));
    assert_eq!(citation.scan_status, ScanStatus::Scanned);
    assert_eq!(citation.ai_priority_score, Some(72));

    // One PENDING queue item, one enrichment dispatch.
    let item = storage
        .feed()
        .claim(Duration::from_secs(600))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.discovered_content_id, content_id);
    storage.feed().mark_done(item.id).await.unwrap();
    assert_eq!(dispatcher.calls(), vec![content_id]);
    assert_eq!(scorer.calls().len(), 1);
}

/// Find the citation that saved a given content id.
async fn citation_for(storage: &Storage, content_id: Uuid) -> Uuid {
    let (id,): (Uuid,) =
        sqlx::query_as("SELECT id FROM wikipedia_citation WHERE saved_content_id = $1")
            .bind(content_id)
            .fetch_one(storage.pool())
            .await
            .unwrap();
    id
}

// =========================================================================
// S3: irrelevant citation is denied with low_score
// =========================================================================

#[tokio::test]
async fn irrelevant_citation_is_denied_without_side_effects() {
    let _guard = test_lock().await;
    let Some(storage) = test_storage().await else {
        return;
    };
    let server = MockServer::start_async().await;
    mock_article(&server, "/boring").await;

    let patch = seed_patch(&storage).await;
    let page_id = seed_citation(&storage, &patch, &server.url("/boring")).await;

    let dispatcher = std::sync::Arc::new(MockDispatcher::new());
    let processor = Processor::new(
        storage.clone(),
        test_fetcher(),
        std::sync::Arc::new(Extractor::new(500)),
        std::sync::Arc::new(MockScorer::returning(41, false)),
        dispatcher.clone(),
        ProcessorConfig::default(),
    );

    let outcome = processor.process_one(&patch).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Denied);

    let (citation_id,): (Uuid,) =
        sqlx::query_as("SELECT id FROM wikipedia_citation WHERE monitoring_id = $1")
            .bind(page_id)
            .fetch_one(storage.pool())
            .await
            .unwrap();
    let citation = storage.citations().get(citation_id).await.unwrap().unwrap();
    assert_eq!(citation.relevance_decision, Some(RelevanceDecision::Denied));
    assert_eq!(citation.scan_status, ScanStatus::ScannedDenied);
    assert_eq!(citation.error_code.as_deref(), Some("low_score"));
    // Score is still recorded for audit even though the citation was denied.
    assert_eq!(citation.ai_priority_score, Some(41));

    assert_eq!(storage.content().count_for_patch(patch.id).await.unwrap(), 0);
    assert!(dispatcher.calls().is_empty());
}

// =========================================================================
// Insufficient content denies without scoring
// =========================================================================

#[tokio::test]
async fn thin_page_is_denied_as_insufficient() {
    let _guard = test_lock().await;
    let Some(storage) = test_storage().await else {
        return;
    };
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(HEAD).path("/thin");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(GET).path("/thin");
        then.status(200)
            .header("content-type", "text/html")
            .body("<html><body><p>almost nothing here</p></body></html>");
    });

    let patch = seed_patch(&storage).await;
    let page_id = seed_citation(&storage, &patch, &server.url("/thin")).await;

    let scorer = std::sync::Arc::new(MockScorer::returning(99, true));
    let processor = Processor::new(
        storage.clone(),
        test_fetcher(),
        std::sync::Arc::new(Extractor::new(500)),
        scorer.clone(),
        std::sync::Arc::new(MockDispatcher::new()),
        ProcessorConfig::default(),
    );

    assert_eq!(
        processor.process_one(&patch).await.unwrap(),
        ProcessOutcome::Denied
    );
    let (code,): (Option<String>,) =
        sqlx::query_as("SELECT error_code FROM wikipedia_citation WHERE monitoring_id = $1")
            .bind(page_id)
            .fetch_one(storage.pool())
            .await
            .unwrap();
    assert_eq!(code.as_deref(), Some("insufficient_content"));
    assert!(scorer.calls().is_empty(), "insufficient content is never scored");
}

// =========================================================================
// Unexpected failures: release until the budget, then deny
// =========================================================================

#[tokio::test]
async fn scorer_outage_releases_then_denies_at_budget() {
    let _guard = test_lock().await;
    let Some(storage) = test_storage().await else {
        return;
    };
    let server = MockServer::start_async().await;
    mock_article(&server, "/flaky-scorer").await;

    let patch = seed_patch(&storage).await;
    let page_id = seed_citation(&storage, &patch, &server.url("/flaky-scorer")).await;

    let processor = Processor::new(
        storage.clone(),
        test_fetcher(),
        std::sync::Arc::new(Extractor::new(500)),
        std::sync::Arc::new(UnavailableScorer),
        std::sync::Arc::new(MockDispatcher::new()),
        ProcessorConfig::default(),
    );

    // max_attempts = 3: two releases, then the terminal denial.
    assert_eq!(
        processor.process_one(&patch).await.unwrap(),
        ProcessOutcome::Released
    );
    assert_eq!(
        processor.process_one(&patch).await.unwrap(),
        ProcessOutcome::Released
    );
    assert_eq!(
        processor.process_one(&patch).await.unwrap(),
        ProcessOutcome::Denied
    );

    let (code, attempts): (Option<String>, i32) = sqlx::query_as(
        "SELECT error_code, attempts FROM wikipedia_citation WHERE monitoring_id = $1",
    )
    .bind(page_id)
    .fetch_one(storage.pool())
    .await
    .unwrap();
    assert_eq!(code.as_deref(), Some("processing_exception"));
    assert_eq!(attempts, 3);
}

// =========================================================================
// S6: feed worker retries a transient agent failure
// =========================================================================

#[tokio::test]
async fn feed_worker_retries_transient_agent_failure() {
    let _guard = test_lock().await;
    let Some(storage) = test_storage().await else {
        return;
    };
    let patch = seed_patch(&storage).await;

    let (content_id, hash) = storage
        .content()
        .upsert(
            patch.id,
            patchwork_common::NewContent {
                source_url: "https://feed.example.com/a".to_string(),
                canonical_url: "https://feed.example.com/a".to_string(),
                domain: "feed.example.com".to_string(),
                title: "Queued".to_string(),
                summary: None,
                text_content: "A body with a reasonably long opening sentence for packing."
                    .to_string(),
                category: "wikipedia_citation".to_string(),
                relevance_score: 0.9,
                quality_score: 0.4,
                metadata: serde_json::json!({}),
            },
        )
        .await
        .unwrap();
    storage
        .feed()
        .enqueue(patch.id, content_id, &hash, 0, 5)
        .await
        .unwrap();

    let agent = std::sync::Arc::new(MockAgentService::new());
    agent.fail_next_transient("agent timed out");
    let worker = FeedWorker::new(storage.clone(), agent.clone(), FeedConfig::default());

    assert_eq!(worker.process_one().await.unwrap(), FeedOutcome::Released);
    assert_eq!(worker.process_one().await.unwrap(), FeedOutcome::Done);
    assert_eq!(worker.process_one().await.unwrap(), FeedOutcome::Empty);

    let item = storage
        .feed()
        .get(item_for(&storage, content_id).await)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.status, QueueStatus::Done);
    assert_eq!(item.attempts, 2);
    assert_eq!(agent.accepted().len(), 1, "exactly one memory created");
}

async fn item_for(storage: &Storage, content_id: Uuid) -> Uuid {
    let (id,): (Uuid,) =
        sqlx::query_as("SELECT id FROM agent_memory_feed_queue WHERE discovered_content_id = $1")
            .bind(content_id)
            .fetch_one(storage.pool())
            .await
            .unwrap();
    id
}

// =========================================================================
// Local agent service: the memory table enforces at-most-once
// =========================================================================

#[tokio::test]
async fn local_agent_is_idempotent_across_duplicate_items() {
    let _guard = test_lock().await;
    let Some(storage) = test_storage().await else {
        return;
    };
    let patch = seed_patch(&storage).await;

    let (content_id, hash) = storage
        .content()
        .upsert(
            patch.id,
            patchwork_common::NewContent {
                source_url: "https://idem.example.com/a".to_string(),
                canonical_url: "https://idem.example.com/a".to_string(),
                domain: "idem.example.com".to_string(),
                title: "Idem".to_string(),
                summary: None,
                text_content: "Body text for the idempotency check, long enough to pack."
                    .to_string(),
                category: "wikipedia_citation".to_string(),
                relevance_score: 0.7,
                quality_score: 0.4,
                metadata: serde_json::json!({}),
            },
        )
        .await
        .unwrap();
    storage
        .feed()
        .enqueue(patch.id, content_id, &hash, 0, 5)
        .await
        .unwrap();

    let agent = std::sync::Arc::new(LocalAgentService::new(storage.memories()));
    let worker = FeedWorker::new(storage.clone(), agent, FeedConfig::default());

    assert_eq!(worker.process_one().await.unwrap(), FeedOutcome::Done);
    assert_eq!(storage.memories().count_for_patch(patch.id).await.unwrap(), 1);

    // A stale duplicate of the same item cannot create a second memory.
    storage
        .feed()
        .release(item_for(&storage, content_id).await, "simulated lost update")
        .await
        .unwrap();
    assert_eq!(worker.process_one().await.unwrap(), FeedOutcome::Skipped);
    assert_eq!(storage.memories().count_for_patch(patch.id).await.unwrap(), 1);
}
