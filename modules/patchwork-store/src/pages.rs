// Monitored Wikipedia pages. Rows are seeded by the monitoring
// bootstrap collaborator; the pipeline reads them at run start and
// updates extraction bookkeeping through the citation store.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use patchwork_common::MonitoredPage;

use crate::error::Result;

#[derive(Clone)]
pub struct PageStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct PageRow {
    id: Uuid,
    patch_id: Uuid,
    wikipedia_title: String,
    wikipedia_url: String,
    citations_extracted: bool,
    last_extracted_at: Option<DateTime<Utc>>,
    citation_count: i32,
}

impl From<PageRow> for MonitoredPage {
    fn from(r: PageRow) -> Self {
        MonitoredPage {
            id: r.id,
            patch_id: r.patch_id,
            wikipedia_title: r.wikipedia_title,
            wikipedia_url: r.wikipedia_url,
            citations_extracted: r.citations_extracted,
            last_extracted_at: r.last_extracted_at,
            citation_count: r.citation_count,
        }
    }
}

impl PageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn for_patch(&self, patch_id: Uuid) -> Result<Vec<MonitoredPage>> {
        let rows = sqlx::query_as::<_, PageRow>(
            r#"
            SELECT id, patch_id, wikipedia_title, wikipedia_url,
                   citations_extracted, last_extracted_at, citation_count
            FROM monitored_wikipedia_page
            WHERE patch_id = $1
            ORDER BY wikipedia_title ASC
            "#,
        )
        .bind(patch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MonitoredPage::from).collect())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<MonitoredPage>> {
        let row = sqlx::query_as::<_, PageRow>(
            r#"
            SELECT id, patch_id, wikipedia_title, wikipedia_url,
                   citations_extracted, last_extracted_at, citation_count
            FROM monitored_wikipedia_page
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MonitoredPage::from))
    }

    /// Bootstrap/test helper. `(patch_id, wikipedia_title)` is unique.
    pub async fn insert(&self, patch_id: Uuid, title: &str, url: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, (Uuid,)>(
            r#"
            INSERT INTO monitored_wikipedia_page (id, patch_id, wikipedia_title, wikipedia_url)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (patch_id, wikipedia_title)
                DO UPDATE SET wikipedia_url = EXCLUDED.wikipedia_url
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(patch_id)
        .bind(title)
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}
