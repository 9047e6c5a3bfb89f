//! Agent memory rows.
//!
//! At-most-once creation rides the `(patch_id, discovered_content_id,
//! content_hash)` unique constraint: an insert that conflicts reports
//! `AlreadyExists` and is treated as success by the feed worker.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;

#[derive(Clone)]
pub struct MemoryStore {
    pool: PgPool,
}

/// Input to a memory insert. Ids and timestamps are assigned here.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub agent_id: Uuid,
    pub patch_id: Uuid,
    pub discovered_content_id: Option<Uuid>,
    pub content_hash: String,
    pub source_type: String,
    pub source_url: Option<String>,
    pub source_title: Option<String>,
    pub content: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryInsert {
    Created(Uuid),
    AlreadyExists,
}

impl MemoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn exists(
        &self,
        patch_id: Uuid,
        discovered_content_id: Uuid,
        content_hash: &str,
    ) -> Result<bool> {
        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT COUNT(*) FROM agent_memory
            WHERE patch_id = $1 AND discovered_content_id = $2 AND content_hash = $3
            "#,
        )
        .bind(patch_id)
        .bind(discovered_content_id)
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 > 0)
    }

    pub async fn insert(&self, memory: NewMemory) -> Result<MemoryInsert> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, (Uuid,)>(
            r#"
            INSERT INTO agent_memory
                (id, agent_id, patch_id, discovered_content_id, content_hash,
                 source_type, source_url, source_title, content, tags)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (patch_id, discovered_content_id, content_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(memory.agent_id)
        .bind(memory.patch_id)
        .bind(memory.discovered_content_id)
        .bind(&memory.content_hash)
        .bind(&memory.source_type)
        .bind(&memory.source_url)
        .bind(&memory.source_title)
        .bind(&memory.content)
        .bind(&memory.tags)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((id,)) => MemoryInsert::Created(id),
            None => MemoryInsert::AlreadyExists,
        })
    }

    pub async fn count_for_patch(&self, patch_id: Uuid) -> Result<i64> {
        let (count,) =
            sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM agent_memory WHERE patch_id = $1")
                .bind(patch_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
