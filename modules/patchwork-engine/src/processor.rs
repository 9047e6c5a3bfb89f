//! Citation processor.
//!
//! Drives one claimed citation through verify → fetch → extract →
//! score → decide. Every expected failure lands the citation in a
//! terminal denial with a stable error code; only unexpected failures
//! reach the catch-all, which releases the row for retry while the
//! attempt budget lasts. Errors never propagate out of the worker loop —
//! the one exception is database unavailability, which aborts the run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use patchwork_archive::{canonicalize, Extractor, Fetcher};
use patchwork_common::{Citation, ExtractionMethod, NewContent, Patch, VerificationStatus};
use patchwork_scorer::{RelevanceScorer, ScorerError};
use patchwork_store::{Storage, StoreError};

use crate::enrichment::EnrichmentDispatcher;
use crate::metrics::RunMetrics;
use crate::quality;

/// Idle wait between polls once the backlog looks drained.
const EMPTY_POLL_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Default save threshold; a patch may override it.
    pub relevance_threshold: i32,
    /// Processing attempts per citation before a terminal denial.
    pub max_attempts: i32,
    /// Queue attempts handed to feed enqueue.
    pub feed_max_attempts: i32,
    /// Age at which a `scanning` claim is considered abandoned.
    pub stuck_timeout: Duration,
    /// Consecutive empty polls before a worker exits.
    pub empty_polls_to_stop: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 60,
            max_attempts: 3,
            feed_max_attempts: 5,
            stuck_timeout: Duration::from_secs(600),
            empty_polls_to_stop: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// No eligible citation was available.
    Empty,
    Saved(Uuid),
    Denied,
    /// Unexpected failure; the citation went back to the pool.
    Released,
}

enum DriveError {
    /// Fatal: no row state was or should be mutated.
    Store(StoreError),
    /// Caught by the worker loop's attempt budget.
    Recoverable(anyhow::Error),
}

impl From<StoreError> for DriveError {
    fn from(e: StoreError) -> Self {
        DriveError::Store(e)
    }
}

pub struct Processor {
    storage: Storage,
    fetcher: Arc<Fetcher>,
    extractor: Arc<Extractor>,
    scorer: Arc<dyn RelevanceScorer>,
    dispatcher: Arc<dyn EnrichmentDispatcher>,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(
        storage: Storage,
        fetcher: Arc<Fetcher>,
        extractor: Arc<Extractor>,
        scorer: Arc<dyn RelevanceScorer>,
        dispatcher: Arc<dyn EnrichmentDispatcher>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            storage,
            fetcher,
            extractor,
            scorer,
            dispatcher,
            config,
        }
    }

    /// Claim and fully process one citation. Returns `Empty` when the
    /// backlog is drained. Only database errors propagate.
    pub async fn process_one(&self, patch: &Patch) -> Result<ProcessOutcome, StoreError> {
        let citations = self.storage.citations();
        let Some(citation) = citations
            .next_eligible(patch.id, self.config.stuck_timeout)
            .await?
        else {
            return Ok(ProcessOutcome::Empty);
        };

        match self.drive(patch, &citation).await {
            Ok(outcome) => Ok(outcome),
            Err(DriveError::Store(e)) => Err(e),
            Err(DriveError::Recoverable(e)) => {
                if citation.attempts >= self.config.max_attempts {
                    warn!(
                        citation = %citation.id,
                        attempts = citation.attempts,
                        error = %e,
                        "Attempt budget exhausted, denying citation"
                    );
                    citations
                        .mark_denied(citation.id, "processing_exception", &e.to_string())
                        .await?;
                    Ok(ProcessOutcome::Denied)
                } else {
                    warn!(
                        citation = %citation.id,
                        attempts = citation.attempts,
                        error = %e,
                        "Processing failed, releasing for retry"
                    );
                    citations.release_for_retry(citation.id).await?;
                    Ok(ProcessOutcome::Released)
                }
            }
        }
    }

    async fn drive(&self, patch: &Patch, citation: &Citation) -> Result<ProcessOutcome, DriveError> {
        let citations = self.storage.citations();

        // Verification: a cheap liveness probe before the real fetch.
        if citation.verification_status == VerificationStatus::Pending {
            match self.fetcher.probe(&citation.citation_url).await {
                Ok(_) => citations.mark_verified(citation.id).await?,
                Err(e) => {
                    info!(url = %citation.citation_url, error = %e, "Verification failed");
                    citations
                        .mark_verification_failed(citation.id, e.code(), &e.to_string())
                        .await?;
                    return Ok(ProcessOutcome::Denied);
                }
            }
        }

        // Full fetch. The fetcher already ran its retry ladder; whatever
        // comes back as an error is a terminal denial for this citation.
        let page = match self.fetcher.fetch(&citation.citation_url).await {
            Ok(p) => p,
            Err(e) => {
                info!(url = %citation.citation_url, error = %e, "Fetch failed");
                citations
                    .mark_denied(citation.id, e.code(), &e.to_string())
                    .await?;
                return Ok(ProcessOutcome::Denied);
            }
        };

        let extracted =
            self.extractor
                .extract(&page.body, page.content_type.as_deref(), &page.final_url);
        if extracted.method == ExtractionMethod::Insufficient {
            citations
                .mark_denied(
                    citation.id,
                    "insufficient_content",
                    &format!("{} bytes below minimum", extracted.length),
                )
                .await?;
            return Ok(ProcessOutcome::Denied);
        }

        citations
            .record_content(citation.id, &extracted.text_content, extracted.method)
            .await?;

        let canonical = canonicalize(&page.final_url);
        let title = extracted
            .title
            .clone()
            .or_else(|| citation.citation_title.clone())
            .unwrap_or_else(|| canonical.host.clone());

        // Score, retrying a malformed response once before giving up.
        let verdict = match self
            .scorer
            .score(patch, &title, &page.final_url, &extracted.text_content)
            .await
        {
            Ok(v) => v,
            Err(ScorerError::Malformed(first)) => {
                warn!(url = %page.final_url, error = %first, "Malformed scorer response, retrying once");
                match self
                    .scorer
                    .score(patch, &title, &page.final_url, &extracted.text_content)
                    .await
                {
                    Ok(v) => v,
                    Err(e) => {
                        citations
                            .mark_denied(citation.id, "scorer_failed", &e.to_string())
                            .await?;
                        return Ok(ProcessOutcome::Denied);
                    }
                }
            }
            // The scorer being down is not this citation's fault.
            Err(ScorerError::Unavailable(msg)) => {
                return Err(DriveError::Recoverable(anyhow!(msg)));
            }
        };

        citations.record_score(citation.id, verdict.score).await?;

        let threshold = patch
            .relevance_threshold
            .unwrap_or(self.config.relevance_threshold);
        if verdict.score < threshold || !verdict.is_relevant {
            info!(
                url = %page.final_url,
                score = verdict.score,
                threshold,
                "Citation denied on relevance"
            );
            citations
                .mark_denied(citation.id, "low_score", &verdict.reason)
                .await?;
            return Ok(ProcessOutcome::Denied);
        }

        // Approved: persist, couple the citation to the content row,
        // queue agent ingestion, and fire enrichment.
        let record = NewContent {
            source_url: page.final_url.clone(),
            canonical_url: canonical.canonical_url.clone(),
            domain: canonical.host.clone(),
            title: title.clone(),
            summary: None,
            text_content: extracted.text_content.clone(),
            category: "wikipedia_citation".to_string(),
            relevance_score: verdict.score as f64 / 100.0,
            quality_score: quality::score(
                &extracted.text_content,
                extracted.title.is_some(),
                extracted.method,
            ),
            metadata: serde_json::json!({
                "extraction_method": extracted.method.to_string(),
                "scorer_reason": verdict.reason,
                "source": "wikipedia-citation",
                "citation_id": citation.id,
            }),
        };

        let (content_id, content_hash) = self.storage.content().upsert(patch.id, record).await?;
        citations.mark_saved(citation.id, content_id).await?;
        self.storage
            .feed()
            .enqueue(
                patch.id,
                content_id,
                &content_hash,
                0,
                self.config.feed_max_attempts,
            )
            .await?;
        self.dispatcher.dispatch(content_id);

        info!(
            url = %page.final_url,
            %content_id,
            score = verdict.score,
            "Citation saved"
        );
        Ok(ProcessOutcome::Saved(content_id))
    }

    /// Worker loop: poll until the backlog stays empty, a fatal error
    /// hits, or cancellation fires. The in-flight citation is always
    /// drained before exit — cancellation is only checked between
    /// citations.
    pub async fn worker_loop(
        &self,
        patch: &Patch,
        metrics: &RunMetrics,
        mut cancel: watch::Receiver<bool>,
    ) {
        let mut empty_streak = 0u32;
        loop {
            if *cancel.borrow() {
                break;
            }
            match self.process_one(patch).await {
                Ok(ProcessOutcome::Empty) => {
                    empty_streak += 1;
                    if empty_streak >= self.config.empty_polls_to_stop {
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(EMPTY_POLL_WAIT) => {}
                        _ = cancel.changed() => {}
                    }
                }
                Ok(outcome) => {
                    empty_streak = 0;
                    metrics
                        .processed
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    let counter = match outcome {
                        ProcessOutcome::Saved(_) => &metrics.saved,
                        ProcessOutcome::Denied => &metrics.denied,
                        ProcessOutcome::Released => &metrics.failed,
                        ProcessOutcome::Empty => unreachable!(),
                    };
                    counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                Err(e) => {
                    error!(error = %e, "Database unavailable, aborting worker");
                    metrics
                        .fatal
                        .store(true, std::sync::atomic::Ordering::Relaxed);
                    break;
                }
            }
        }
    }
}
