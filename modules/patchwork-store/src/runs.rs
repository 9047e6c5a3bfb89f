// Discovery run records. One row per bounded pipeline execution;
// the coordinator owns all writes.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use patchwork_common::{DiscoveryRun, RunStatus};

use crate::error::{parse_status, Result, StoreError};

#[derive(Clone)]
pub struct RunStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    patch_id: Uuid,
    status: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    processed: i64,
    saved: i64,
    denied: i64,
    failed: i64,
}

impl TryFrom<RunRow> for DiscoveryRun {
    type Error = StoreError;

    fn try_from(r: RunRow) -> Result<Self> {
        Ok(DiscoveryRun {
            id: r.id,
            patch_id: r.patch_id,
            status: parse_status::<RunStatus>(&r.status, "status")?,
            started_at: r.started_at,
            finished_at: r.finished_at,
            processed: r.processed,
            saved: r.saved,
            denied: r.denied,
            failed: r.failed,
        })
    }
}

impl RunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, patch_id: Uuid) -> Result<DiscoveryRun> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            INSERT INTO discovery_run (id, patch_id, status)
            VALUES ($1, $2, 'running')
            RETURNING id, patch_id, status, started_at, finished_at,
                      processed, saved, denied, failed
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(patch_id)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<DiscoveryRun>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, patch_id, status, started_at, finished_at,
                   processed, saved, denied, failed
            FROM discovery_run
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DiscoveryRun::try_from).transpose()
    }

    pub async fn active_for_patch(&self, patch_id: Uuid) -> Result<Option<DiscoveryRun>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, patch_id, status, started_at, finished_at,
                   processed, saved, denied, failed
            FROM discovery_run
            WHERE patch_id = $1 AND status = 'running'
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(patch_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DiscoveryRun::try_from).transpose()
    }

    /// Periodic metric flush while the run is live.
    pub async fn update_counters(
        &self,
        id: Uuid,
        processed: i64,
        saved: i64,
        denied: i64,
        failed: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE discovery_run
            SET processed = $2, saved = $3, denied = $4, failed = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(processed)
        .bind(saved)
        .bind(denied)
        .bind(failed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finish(
        &self,
        id: Uuid,
        status: RunStatus,
        processed: i64,
        saved: i64,
        denied: i64,
        failed: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE discovery_run
            SET status = $2, finished_at = now(),
                processed = $3, saved = $4, denied = $5, failed = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(processed)
        .bind(saved)
        .bind(denied)
        .bind(failed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
