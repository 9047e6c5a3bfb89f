// Patch reads. The patch table is owned by the CRUD collaborator;
// the pipeline resolves handles and never writes (inserts exist for
// bootstrap and tests only).

use sqlx::PgPool;
use uuid::Uuid;

use patchwork_common::Patch;

use crate::error::Result;

#[derive(Clone)]
pub struct PatchStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct PatchRow {
    id: Uuid,
    handle: String,
    title: String,
    aliases: Vec<String>,
    tags: Vec<String>,
    relevance_threshold: Option<i32>,
}

impl From<PatchRow> for Patch {
    fn from(r: PatchRow) -> Self {
        Patch {
            id: r.id,
            handle: r.handle,
            title: r.title,
            aliases: r.aliases,
            tags: r.tags,
            relevance_threshold: r.relevance_threshold,
        }
    }
}

impl PatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn by_handle(&self, handle: &str) -> Result<Option<Patch>> {
        let row = sqlx::query_as::<_, PatchRow>(
            r#"
            SELECT id, handle, title, aliases, tags, relevance_threshold
            FROM patch
            WHERE handle = $1
            "#,
        )
        .bind(handle)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Patch::from))
    }

    pub async fn by_id(&self, id: Uuid) -> Result<Option<Patch>> {
        let row = sqlx::query_as::<_, PatchRow>(
            r#"
            SELECT id, handle, title, aliases, tags, relevance_threshold
            FROM patch
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Patch::from))
    }

    /// Bootstrap/test helper. Production patches arrive via the CRUD collaborator.
    pub async fn insert(&self, patch: &Patch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO patch (id, handle, title, aliases, tags, relevance_threshold)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (handle) DO NOTHING
            "#,
        )
        .bind(patch.id)
        .bind(&patch.handle)
        .bind(&patch.title)
        .bind(&patch.aliases)
        .bind(&patch.tags)
        .bind(patch.relevance_threshold)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
