//! Agent-feed queue rows.
//!
//! Enqueue is an upsert against the `(patch_id, discovered_content_id,
//! content_hash)` constraint with the state table from the feed design:
//! DONE and in-flight rows are left alone; a FAILED row with attempt
//! budget remaining goes back to PENDING. Claims mirror the citation
//! store: one conditional UPDATE over a SKIP LOCKED subquery, stuck
//! PROCESSING rows reclaimable after the timeout.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use patchwork_common::{FeedQueueItem, QueueStatus};

use crate::error::{parse_status, Result, StoreError};

#[derive(Clone)]
pub struct FeedQueue {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: Uuid,
    patch_id: Uuid,
    discovered_content_id: Uuid,
    content_hash: String,
    status: String,
    priority: i32,
    enqueued_at: DateTime<Utc>,
    picked_at: Option<DateTime<Utc>>,
    attempts: i32,
    last_error: Option<String>,
}

impl TryFrom<QueueRow> for FeedQueueItem {
    type Error = StoreError;

    fn try_from(r: QueueRow) -> Result<Self> {
        Ok(FeedQueueItem {
            id: r.id,
            patch_id: r.patch_id,
            discovered_content_id: r.discovered_content_id,
            content_hash: r.content_hash,
            status: parse_status::<QueueStatus>(&r.status, "status")?,
            priority: r.priority,
            enqueued_at: r.enqueued_at,
            picked_at: r.picked_at,
            attempts: r.attempts,
            last_error: r.last_error,
        })
    }
}

/// What an enqueue call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new PENDING row was created.
    Enqueued,
    /// A FAILED row with budget left was reset to PENDING.
    Requeued,
    /// The row already exists in DONE or in flight; nothing changed.
    Unchanged,
}

impl FeedQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(
        &self,
        patch_id: Uuid,
        discovered_content_id: Uuid,
        content_hash: &str,
        priority: i32,
        max_attempts: i32,
    ) -> Result<EnqueueOutcome> {
        let row = sqlx::query_as::<_, (bool,)>(
            r#"
            INSERT INTO agent_memory_feed_queue
                (id, patch_id, discovered_content_id, content_hash, status, priority, attempts)
            VALUES ($1, $2, $3, $4, 'PENDING', $5, 0)
            ON CONFLICT (patch_id, discovered_content_id, content_hash) DO UPDATE
            SET status = 'PENDING',
                last_error = NULL,
                picked_at = NULL
            WHERE agent_memory_feed_queue.status = 'FAILED'
              AND agent_memory_feed_queue.attempts < $6
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(patch_id)
        .bind(discovered_content_id)
        .bind(content_hash)
        .bind(priority)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((true,)) => EnqueueOutcome::Enqueued,
            Some((false,)) => EnqueueOutcome::Requeued,
            None => EnqueueOutcome::Unchanged,
        })
    }

    /// Claim one PENDING row (or a PROCESSING row stuck past the
    /// timeout). Sets PROCESSING, stamps `picked_at`, and counts the
    /// attempt. Ordered by `priority DESC, enqueued_at ASC`.
    pub async fn claim(&self, stuck_timeout: Duration) -> Result<Option<FeedQueueItem>> {
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            UPDATE agent_memory_feed_queue q
            SET status = 'PROCESSING',
                picked_at = now(),
                attempts = q.attempts + 1
            WHERE q.id = (
                SELECT id
                FROM agent_memory_feed_queue
                WHERE status = 'PENDING'
                   OR (status = 'PROCESSING'
                       AND picked_at < now() - make_interval(secs => $1))
                ORDER BY priority DESC, enqueued_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, patch_id, discovered_content_id, content_hash, status,
                      priority, enqueued_at, picked_at, attempts, last_error
            "#,
        )
        .bind(stuck_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(FeedQueueItem::try_from).transpose()
    }

    pub async fn mark_done(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE agent_memory_feed_queue SET status = 'DONE', last_error = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE agent_memory_feed_queue SET status = 'FAILED', last_error = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Put a transiently-failed item back in line for another attempt.
    pub async fn release(&self, id: Uuid, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE agent_memory_feed_queue
            SET status = 'PENDING', last_error = $2, picked_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<FeedQueueItem>> {
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            SELECT id, patch_id, discovered_content_id, content_hash, status,
                   priority, enqueued_at, picked_at, attempts, last_error
            FROM agent_memory_feed_queue
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(FeedQueueItem::try_from).transpose()
    }

    pub async fn pending_count(&self) -> Result<i64> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM agent_memory_feed_queue WHERE status IN ('PENDING', 'PROCESSING')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
