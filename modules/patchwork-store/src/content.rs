//! Dedup-aware persistence of discovered content.
//!
//! One row per `(patch_id, canonical_url)`. A conflicting upsert keeps
//! the existing id and canonical URL and refreshes the mutable fields —
//! latest write wins, nothing is versioned.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use patchwork_common::{content_hash, DiscoveredContent, NewContent};

use crate::error::Result;

/// Maximum stored summary length, in chars.
const MAX_SUMMARY_CHARS: usize = 500;

#[derive(Clone)]
pub struct ContentStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct ContentRow {
    id: Uuid,
    patch_id: Uuid,
    source_url: String,
    canonical_url: String,
    domain: String,
    title: String,
    summary: String,
    text_content: String,
    category: String,
    content_hash: String,
    relevance_score: f64,
    quality_score: f64,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ContentRow> for DiscoveredContent {
    fn from(r: ContentRow) -> Self {
        DiscoveredContent {
            id: r.id,
            patch_id: r.patch_id,
            source_url: r.source_url,
            canonical_url: r.canonical_url,
            domain: r.domain,
            title: r.title,
            summary: r.summary,
            text_content: r.text_content,
            category: r.category,
            content_hash: r.content_hash,
            relevance_score: r.relevance_score,
            quality_score: r.quality_score,
            metadata: r.metadata,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Derive a summary when the caller did not supply one: the leading
/// slice of the text, capped in chars.
pub fn derive_summary(text: &str) -> String {
    text.chars().take(MAX_SUMMARY_CHARS).collect()
}

impl ContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a content record. Atomic against concurrent
    /// upserts of the same `(patch_id, canonical_url)`: the unique
    /// constraint decides, and the loser's write becomes the update arm.
    /// Returns the surviving row's id and hash.
    pub async fn upsert(&self, patch_id: Uuid, record: NewContent) -> Result<(Uuid, String)> {
        let summary = record
            .summary
            .unwrap_or_else(|| derive_summary(&record.text_content));
        let hash = content_hash(&record.title, &summary, &record.text_content);

        let row = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            INSERT INTO discovered_content
                (id, patch_id, source_url, canonical_url, domain, title, summary,
                 text_content, category, content_hash, relevance_score, quality_score, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (patch_id, canonical_url) DO UPDATE
            SET title = EXCLUDED.title,
                summary = EXCLUDED.summary,
                text_content = EXCLUDED.text_content,
                category = EXCLUDED.category,
                content_hash = EXCLUDED.content_hash,
                relevance_score = EXCLUDED.relevance_score,
                quality_score = EXCLUDED.quality_score,
                metadata = EXCLUDED.metadata,
                updated_at = now()
            RETURNING id, content_hash
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(patch_id)
        .bind(&record.source_url)
        .bind(&record.canonical_url)
        .bind(&record.domain)
        .bind(&record.title)
        .bind(&summary)
        .bind(&record.text_content)
        .bind(&record.category)
        .bind(&hash)
        .bind(record.relevance_score)
        .bind(record.quality_score)
        .bind(&record.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<DiscoveredContent>> {
        let row = sqlx::query_as::<_, ContentRow>(
            r#"
            SELECT id, patch_id, source_url, canonical_url, domain, title, summary,
                   text_content, category, content_hash, relevance_score, quality_score,
                   metadata, created_at, updated_at
            FROM discovered_content
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DiscoveredContent::from))
    }

    pub async fn count_for_patch(&self, patch_id: Uuid) -> Result<i64> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM discovered_content WHERE patch_id = $1",
        )
        .bind(patch_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
