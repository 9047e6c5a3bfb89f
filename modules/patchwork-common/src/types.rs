//! Core domain types for the discovery pipeline.
//!
//! Status enums are stored as TEXT in Postgres; each carries a
//! `Display`/`FromStr` pair so the store layer round-trips them without
//! a database enum type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Patch (topic scope, owned by an external collaborator) ---

/// A named topic scope. Read-only from the pipeline's point of view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub id: Uuid,
    /// Unique, user-visible handle (e.g. "quantum-computing").
    pub handle: String,
    pub title: String,
    pub aliases: Vec<String>,
    pub tags: Vec<String>,
    /// Per-patch override of the save threshold (0..=100). None = default.
    pub relevance_threshold: Option<i32>,
}

// --- Monitored Wikipedia page ---

#[derive(Debug, Clone)]
pub struct MonitoredPage {
    pub id: Uuid,
    pub patch_id: Uuid,
    pub wikipedia_title: String,
    pub wikipedia_url: String,
    pub citations_extracted: bool,
    pub last_extracted_at: Option<DateTime<Utc>>,
    pub citation_count: i32,
}

// --- Citation state machine enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Failed,
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationStatus::Pending => write!(f, "pending"),
            VerificationStatus::Verified => write!(f, "verified"),
            VerificationStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for VerificationStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown VerificationStatus: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    NotScanned,
    Scanning,
    Scanned,
    ScannedDenied,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStatus::NotScanned => write!(f, "not_scanned"),
            ScanStatus::Scanning => write!(f, "scanning"),
            ScanStatus::Scanned => write!(f, "scanned"),
            ScanStatus::ScannedDenied => write!(f, "scanned_denied"),
        }
    }
}

impl std::str::FromStr for ScanStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "not_scanned" => Ok(Self::NotScanned),
            "scanning" => Ok(Self::Scanning),
            "scanned" => Ok(Self::Scanned),
            "scanned_denied" => Ok(Self::ScannedDenied),
            other => Err(format!("unknown ScanStatus: {other}")),
        }
    }
}

/// Terminal relevance decision. Absent while a citation is still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceDecision {
    Saved,
    Denied,
}

impl std::fmt::Display for RelevanceDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelevanceDecision::Saved => write!(f, "saved"),
            RelevanceDecision::Denied => write!(f, "denied"),
        }
    }
}

impl std::str::FromStr for RelevanceDecision {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "saved" => Ok(Self::Saved),
            "denied" => Ok(Self::Denied),
            other => Err(format!("unknown RelevanceDecision: {other}")),
        }
    }
}

/// Which part of the Wikipedia page a citation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationSection {
    References,
    FurtherReading,
    ExternalLinks,
    Unknown,
}

impl std::fmt::Display for CitationSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CitationSection::References => write!(f, "references"),
            CitationSection::FurtherReading => write!(f, "further_reading"),
            CitationSection::ExternalLinks => write!(f, "external_links"),
            CitationSection::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for CitationSection {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "references" => Ok(Self::References),
            "further_reading" => Ok(Self::FurtherReading),
            "external_links" => Ok(Self::ExternalLinks),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown CitationSection: {other}")),
        }
    }
}

/// Which extraction tier produced the stored text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Readability,
    ContentExtractor,
    Fallback,
    Insufficient,
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionMethod::Readability => write!(f, "readability"),
            ExtractionMethod::ContentExtractor => write!(f, "content_extractor"),
            ExtractionMethod::Fallback => write!(f, "fallback"),
            ExtractionMethod::Insufficient => write!(f, "insufficient"),
        }
    }
}

impl std::str::FromStr for ExtractionMethod {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "readability" => Ok(Self::Readability),
            "content_extractor" => Ok(Self::ContentExtractor),
            "fallback" => Ok(Self::Fallback),
            "insufficient" => Ok(Self::Insufficient),
            other => Err(format!("unknown ExtractionMethod: {other}")),
        }
    }
}

// --- Citation ---

/// An external reference extracted from a monitored Wikipedia page.
/// State transitions are driven solely by the citation processor.
#[derive(Debug, Clone)]
pub struct Citation {
    pub id: Uuid,
    pub monitoring_id: Uuid,
    pub citation_url: String,
    pub citation_canonical_url: String,
    pub citation_title: Option<String>,
    /// Surrounding text, capped at 240 chars at extraction time.
    pub citation_context: Option<String>,
    pub section: CitationSection,
    /// Ordinal within the page's reference list, when applicable.
    pub source_number: Option<i32>,
    pub verification_status: VerificationStatus,
    pub scan_status: ScanStatus,
    pub relevance_decision: Option<RelevanceDecision>,
    pub ai_priority_score: Option<i32>,
    pub content_text: Option<String>,
    pub extraction_method: Option<ExtractionMethod>,
    /// Doubles as the claim timestamp while `scan_status = scanning`.
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub saved_content_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A citation candidate as produced by the page parser, before storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationCandidate {
    pub url: String,
    pub canonical_url: String,
    pub title: Option<String>,
    pub context: Option<String>,
    pub section: CitationSection,
    pub source_number: Option<i32>,
}

// --- Discovered content ---

/// Canonicalized, dedup-checked content record produced from an
/// approved citation. `(patch_id, canonical_url)` is unique.
#[derive(Debug, Clone)]
pub struct DiscoveredContent {
    pub id: Uuid,
    pub patch_id: Uuid,
    pub source_url: String,
    pub canonical_url: String,
    pub domain: String,
    pub title: String,
    pub summary: String,
    pub text_content: String,
    pub category: String,
    pub content_hash: String,
    pub relevance_score: f64,
    pub quality_score: f64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to the content upsert. The store computes hash and summary.
#[derive(Debug, Clone)]
pub struct NewContent {
    pub source_url: String,
    pub canonical_url: String,
    pub domain: String,
    pub title: String,
    pub summary: Option<String>,
    pub text_content: String,
    pub category: String,
    pub relevance_score: f64,
    pub quality_score: f64,
    pub metadata: serde_json::Value,
}

// --- Feed queue ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueStatus::Pending => write!(f, "PENDING"),
            QueueStatus::Processing => write!(f, "PROCESSING"),
            QueueStatus::Done => write!(f, "DONE"),
            QueueStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "DONE" => Ok(Self::Done),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown QueueStatus: {other}")),
        }
    }
}

/// Work item for agent ingestion. Kept after success as provenance.
#[derive(Debug, Clone)]
pub struct FeedQueueItem {
    pub id: Uuid,
    pub patch_id: Uuid,
    pub discovered_content_id: Uuid,
    pub content_hash: String,
    pub status: QueueStatus,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub picked_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

// --- Agent memory ---

#[derive(Debug, Clone)]
pub struct AgentMemory {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub patch_id: Uuid,
    pub discovered_content_id: Option<Uuid>,
    pub content_hash: String,
    pub source_type: String,
    pub source_url: Option<String>,
    pub source_title: Option<String>,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// --- Discovery run ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown RunStatus: {other}")),
        }
    }
}

/// One bounded execution of the pipeline for a single patch.
#[derive(Debug, Clone)]
pub struct DiscoveryRun {
    pub id: Uuid,
    pub patch_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processed: i64,
    pub saved: i64,
    pub denied: i64,
    pub failed: i64,
}
