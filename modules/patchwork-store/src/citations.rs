//! Citation store and state machine.
//!
//! Upserts parsed citations, hands out eligible rows to processor
//! workers, and applies the verify/scan/decision transitions. The claim
//! in [`CitationStore::next_eligible`] is a single conditional UPDATE
//! over a `FOR UPDATE SKIP LOCKED` subquery: concurrent callers never
//! receive the same row, and a `scanning` row whose claim timestamp has
//! gone stale is handed out again.
//!
//! Decisions are terminal: every transition is guarded by
//! `relevance_decision IS NULL`, so nothing the processor does can move
//! a `saved` or `denied` row. The operator-level [`CitationStore::reset`]
//! is the one deliberate exception.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use patchwork_common::{
    Citation, CitationCandidate, CitationSection, ExtractionMethod, RelevanceDecision, ScanStatus,
    VerificationStatus,
};

use crate::error::{parse_opt_status, parse_status, Result, StoreError};

const CITATION_COLUMNS: &str = r#"
    id, monitoring_id, citation_url, citation_canonical_url, citation_title,
    citation_context, section, source_number, verification_status, scan_status,
    relevance_decision, ai_priority_score, content_text, extraction_method,
    last_scanned_at, attempts, error_code, error_message, saved_content_id,
    created_at, updated_at
"#;

#[derive(Clone)]
pub struct CitationStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct CitationRow {
    id: Uuid,
    monitoring_id: Uuid,
    citation_url: String,
    citation_canonical_url: String,
    citation_title: Option<String>,
    citation_context: Option<String>,
    section: String,
    source_number: Option<i32>,
    verification_status: String,
    scan_status: String,
    relevance_decision: Option<String>,
    ai_priority_score: Option<i32>,
    content_text: Option<String>,
    extraction_method: Option<String>,
    last_scanned_at: Option<DateTime<Utc>>,
    attempts: i32,
    error_code: Option<String>,
    error_message: Option<String>,
    saved_content_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CitationRow> for Citation {
    type Error = StoreError;

    fn try_from(r: CitationRow) -> Result<Self> {
        Ok(Citation {
            id: r.id,
            monitoring_id: r.monitoring_id,
            citation_url: r.citation_url,
            citation_canonical_url: r.citation_canonical_url,
            citation_title: r.citation_title,
            citation_context: r.citation_context,
            section: parse_status::<CitationSection>(&r.section, "section")?,
            source_number: r.source_number,
            verification_status: parse_status::<VerificationStatus>(
                &r.verification_status,
                "verification_status",
            )?,
            scan_status: parse_status::<ScanStatus>(&r.scan_status, "scan_status")?,
            relevance_decision: parse_opt_status::<RelevanceDecision>(
                r.relevance_decision.as_deref(),
                "relevance_decision",
            )?,
            ai_priority_score: r.ai_priority_score,
            content_text: r.content_text,
            extraction_method: parse_opt_status::<ExtractionMethod>(
                r.extraction_method.as_deref(),
                "extraction_method",
            )?,
            last_scanned_at: r.last_scanned_at,
            attempts: r.attempts,
            error_code: r.error_code,
            error_message: r.error_message,
            saved_content_id: r.saved_content_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Result of one extraction pass over a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionOutcome {
    pub citations_found: usize,
    pub citations_stored: usize,
}

impl CitationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert parsed candidates for a page, preserving prior state on
    /// conflict, then mark the page extracted and refresh its count.
    pub async fn extract_and_store(
        &self,
        monitoring_id: Uuid,
        candidates: &[CitationCandidate],
    ) -> Result<ExtractionOutcome> {
        let mut stored = 0usize;
        for candidate in candidates {
            let result = sqlx::query(
                r#"
                INSERT INTO wikipedia_citation
                    (id, monitoring_id, citation_url, citation_canonical_url,
                     citation_title, citation_context, section, source_number)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (monitoring_id, citation_canonical_url) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(monitoring_id)
            .bind(&candidate.url)
            .bind(&candidate.canonical_url)
            .bind(&candidate.title)
            .bind(&candidate.context)
            .bind(candidate.section.to_string())
            .bind(candidate.source_number)
            .execute(&self.pool)
            .await?;
            stored += result.rows_affected() as usize;
        }

        sqlx::query(
            r#"
            UPDATE monitored_wikipedia_page
            SET citations_extracted = TRUE,
                last_extracted_at = now(),
                citation_count = (
                    SELECT COUNT(*) FROM wikipedia_citation WHERE monitoring_id = $1
                )
            WHERE id = $1
            "#,
        )
        .bind(monitoring_id)
        .execute(&self.pool)
        .await?;

        debug!(%monitoring_id, found = candidates.len(), stored, "Citations stored");

        Ok(ExtractionOutcome {
            citations_found: candidates.len(),
            citations_stored: stored,
        })
    }

    /// Claim the next eligible citation for a patch, or None when the
    /// backlog is drained. The returned row is owned by the caller:
    /// its scan status is already `scanning` and `attempts` has been
    /// incremented.
    pub async fn next_eligible(
        &self,
        patch_id: Uuid,
        stuck_timeout: Duration,
    ) -> Result<Option<Citation>> {
        let row = sqlx::query_as::<_, CitationRow>(&format!(
            r#"
            UPDATE wikipedia_citation c
            SET scan_status = 'scanning',
                last_scanned_at = now(),
                attempts = c.attempts + 1,
                updated_at = now()
            WHERE c.id = (
                SELECT w.id
                FROM wikipedia_citation w
                JOIN monitored_wikipedia_page p ON p.id = w.monitoring_id
                WHERE p.patch_id = $1
                  AND w.verification_status IN ('pending', 'verified')
                  AND w.relevance_decision IS NULL
                  AND w.citation_canonical_url !~ '(wikipedia|wikimedia|wikidata)\.org'
                  AND (
                        w.scan_status = 'not_scanned'
                     OR (w.scan_status = 'scanning'
                         AND w.last_scanned_at < now() - make_interval(secs => $2))
                  )
                ORDER BY w.ai_priority_score DESC NULLS LAST, w.created_at ASC
                LIMIT 1
                FOR UPDATE OF w SKIP LOCKED
            )
            RETURNING {CITATION_COLUMNS}
            "#
        ))
        .bind(patch_id)
        .bind(stuck_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Citation::try_from).transpose()
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Citation>> {
        let row = sqlx::query_as::<_, CitationRow>(&format!(
            "SELECT {CITATION_COLUMNS} FROM wikipedia_citation WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Citation::try_from).transpose()
    }

    // --- transitions (all refuse terminal rows) ---

    pub async fn mark_verified(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE wikipedia_citation
            SET verification_status = 'verified', updated_at = now()
            WHERE id = $1 AND relevance_decision IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Verification failure is terminal: the citation is denied outright.
    pub async fn mark_verification_failed(
        &self,
        id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE wikipedia_citation
            SET verification_status = 'failed',
                scan_status = 'scanned_denied',
                relevance_decision = 'denied',
                error_code = $2,
                error_message = $3,
                updated_at = now()
            WHERE id = $1 AND relevance_decision IS NULL
            "#,
        )
        .bind(id)
        .bind(error_code)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_content(
        &self,
        id: Uuid,
        text: &str,
        method: ExtractionMethod,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE wikipedia_citation
            SET content_text = $2, extraction_method = $3, updated_at = now()
            WHERE id = $1 AND relevance_decision IS NULL
            "#,
        )
        .bind(id)
        .bind(text)
        .bind(method.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_score(&self, id: Uuid, score: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE wikipedia_citation
            SET ai_priority_score = $2, scan_status = 'scanned', updated_at = now()
            WHERE id = $1 AND relevance_decision IS NULL
            "#,
        )
        .bind(id)
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_saved(&self, id: Uuid, content_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE wikipedia_citation
            SET relevance_decision = 'saved',
                saved_content_id = $2,
                scan_status = 'scanned',
                updated_at = now()
            WHERE id = $1 AND relevance_decision IS NULL
            "#,
        )
        .bind(id)
        .bind(content_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_denied(
        &self,
        id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE wikipedia_citation
            SET relevance_decision = 'denied',
                scan_status = 'scanned_denied',
                error_code = $2,
                error_message = $3,
                updated_at = now()
            WHERE id = $1 AND relevance_decision IS NULL
            "#,
        )
        .bind(id)
        .bind(error_code)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Hand a claimed row back for another attempt after an unexpected
    /// processing failure. The caller checks the attempt budget first.
    pub async fn release_for_retry(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE wikipedia_citation
            SET scan_status = 'not_scanned', updated_at = now()
            WHERE id = $1 AND relevance_decision IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Operator-level reset for the backfill collaborator. Never called
    /// by the processor. Clears the decision, scan state, score, and
    /// extracted content; verification status survives.
    pub async fn reset(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE wikipedia_citation
            SET scan_status = 'not_scanned',
                relevance_decision = NULL,
                ai_priority_score = NULL,
                content_text = NULL,
                extraction_method = NULL,
                last_scanned_at = NULL,
                attempts = 0,
                error_code = NULL,
                error_message = NULL,
                saved_content_id = NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
