//! Agent-feed worker.
//!
//! Consumes the feed queue: claim → load content → pack a memory
//! payload → create the agent memory. At-most-once creation is carried
//! by the memory table's uniqueness constraint; the pre-check here is
//! an optimization, not the guarantee. Transient agent failures put the
//! item back in line until the attempt budget runs out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use patchwork_common::DiscoveredContent;
use patchwork_store::{NewMemory, Storage, StoreError};

use crate::agent::{AgentError, AgentService, CreateOutcome};

/// Idle wait between polls when the queue is empty.
const EMPTY_POLL_WAIT: Duration = Duration::from_millis(500);
/// Leading facts packed into the memory payload.
const PACKED_FACTS: usize = 5;

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub max_attempts: i32,
    pub stuck_timeout: Duration,
    /// Consecutive empty polls (after the processors finish) before exit.
    pub empty_polls_to_stop: u32,
    /// Agent receiving the memories for this deployment.
    pub agent_id: Uuid,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            stuck_timeout: Duration::from_secs(600),
            empty_polls_to_stop: 3,
            agent_id: Uuid::nil(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    Empty,
    Done,
    /// The memory already existed; the item completed without a create.
    Skipped,
    Failed,
    /// Transient agent failure; the item went back to PENDING.
    Released,
}

pub struct FeedWorker {
    storage: Storage,
    agent: Arc<dyn AgentService>,
    config: FeedConfig,
}

impl FeedWorker {
    pub fn new(storage: Storage, agent: Arc<dyn AgentService>, config: FeedConfig) -> Self {
        Self {
            storage,
            agent,
            config,
        }
    }

    /// Claim and process one queue item. Only database errors propagate.
    pub async fn process_one(&self) -> Result<FeedOutcome, StoreError> {
        let feed = self.storage.feed();
        let Some(item) = feed.claim(self.config.stuck_timeout).await? else {
            return Ok(FeedOutcome::Empty);
        };

        let Some(content) = self.storage.content().get(item.discovered_content_id).await? else {
            warn!(item = %item.id, content = %item.discovered_content_id, "Content row missing");
            feed.mark_failed(item.id, "CONTENT_MISSING").await?;
            return Ok(FeedOutcome::Failed);
        };

        // Idempotency pre-check: a prior attempt may have created the
        // memory before its queue update was lost.
        if self
            .storage
            .memories()
            .exists(item.patch_id, item.discovered_content_id, &item.content_hash)
            .await?
        {
            feed.mark_done(item.id).await?;
            return Ok(FeedOutcome::Skipped);
        }

        let memory = NewMemory {
            agent_id: self.config.agent_id,
            patch_id: item.patch_id,
            discovered_content_id: Some(item.discovered_content_id),
            content_hash: item.content_hash.clone(),
            source_type: "discovery".to_string(),
            source_url: Some(content.source_url.clone()),
            source_title: Some(content.title.clone()),
            content: pack_memory(&content),
            tags: vec![content.category.clone()],
        };

        match self.agent.create_memory(memory).await {
            Ok(CreateOutcome::Created(memory_id)) => {
                feed.mark_done(item.id).await?;
                info!(item = %item.id, %memory_id, "Memory created");
                Ok(FeedOutcome::Done)
            }
            Ok(CreateOutcome::AlreadyExists) => {
                feed.mark_done(item.id).await?;
                Ok(FeedOutcome::Skipped)
            }
            Err(AgentError::Transient(msg)) => {
                if item.attempts >= self.config.max_attempts {
                    warn!(item = %item.id, attempts = item.attempts, error = %msg, "Feed attempts exhausted");
                    feed.mark_failed(item.id, &msg).await?;
                    Ok(FeedOutcome::Failed)
                } else {
                    warn!(item = %item.id, attempts = item.attempts, error = %msg, "Transient agent failure, requeueing");
                    feed.release(item.id, &msg).await?;
                    Ok(FeedOutcome::Released)
                }
            }
            Err(AgentError::Permanent(msg)) => {
                warn!(item = %item.id, error = %msg, "Agent rejected memory");
                feed.mark_failed(item.id, &msg).await?;
                Ok(FeedOutcome::Failed)
            }
        }
    }

    /// Worker loop. Runs until cancelled, or until the queue stays
    /// empty after the producers have finished.
    pub async fn worker_loop(
        &self,
        producers_done: &AtomicBool,
        mut cancel: watch::Receiver<bool>,
    ) {
        let mut empty_streak = 0u32;
        loop {
            if *cancel.borrow() {
                break;
            }
            match self.process_one().await {
                Ok(FeedOutcome::Empty) => {
                    empty_streak += 1;
                    if producers_done.load(Ordering::Relaxed)
                        && empty_streak >= self.config.empty_polls_to_stop
                    {
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(EMPTY_POLL_WAIT) => {}
                        _ = cancel.changed() => {}
                    }
                }
                Ok(_) => {
                    empty_streak = 0;
                }
                Err(e) => {
                    error!(error = %e, "Database unavailable, aborting feed worker");
                    break;
                }
            }
        }
    }
}

/// Pack a content record into the agent memory payload: title, summary,
/// leading facts, source URL, and the publish date when extraction
/// surfaced one.
pub fn pack_memory(content: &DiscoveredContent) -> String {
    let mut out = String::new();
    out.push_str(&content.title);
    out.push_str("\n\n");
    out.push_str(&content.summary);

    let facts: Vec<&str> = content
        .text_content
        .split_terminator(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| s.len() > 20)
        .take(PACKED_FACTS)
        .collect();
    if !facts.is_empty() {
        out.push_str("\n\nKey facts:\n");
        for fact in facts {
            out.push_str("- ");
            out.push_str(fact);
            out.push_str(".\n");
        }
    }

    out.push_str("\nSource: ");
    out.push_str(&content.source_url);
    if let Some(published) = content
        .metadata
        .get("published_at")
        .and_then(|v| v.as_str())
    {
        out.push_str("\nPublished: ");
        out.push_str(published);
    }
    out
}
