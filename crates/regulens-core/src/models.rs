//! Core data models for regulens.
//!
//! These types are shared across all regulens crates and represent the
//! pipeline's domain entities. Every status is a closed enum with an
//! exhaustive string mapping; the string form only exists at the database
//! and API edges.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// STATUS ENUMS
// =============================================================================

/// Lifecycle of a document text extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Pending,
    Processing,
    Ready,
    /// Retryable failure; the row returns to the queue after backoff.
    Failed,
    /// Terminal for this file version (e.g. unsupported MIME type).
    Unsupported,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Unsupported => "unsupported",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "ready" => Self::Ready,
            "failed" => Self::Failed,
            "unsupported" => Self::Unsupported,
            _ => Self::Pending, // conservative fallback
        }
    }
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the insight (summary) layer. Same states as extraction but
/// tracked independently on the shared row.
pub type InsightsStatus = ExtractionStatus;

/// Terminal status of one monitor execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorRunStatus {
    Success,
    Failed,
    /// Single-flight lock was held elsewhere; nothing was scanned.
    Skipped,
}

impl MonitorRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            _ => Self::Failed,
        }
    }
}

/// What initiated a monitor execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Schedule,
    Manual,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "manual" => Self::Manual,
            _ => Self::Schedule,
        }
    }
}

/// Regulation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegulationStatus {
    Active,
    Amended,
    Repealed,
}

impl RegulationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Amended => "amended",
            Self::Repealed => "repealed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "amended" => Self::Amended,
            "repealed" => Self::Repealed,
            _ => Self::Active,
        }
    }
}

/// Why a regulation version snapshot was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionReason {
    Initial,
    MonitorDetectedChange,
    ManualImport,
}

impl VersionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::MonitorDetectedChange => "monitor_detected_change",
            Self::ManualImport => "manual_import",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "initial" => Self::Initial,
            "monitor_detected_change" => Self::MonitorDetectedChange,
            "manual_import" => Self::ManualImport,
            _ => Self::ManualImport,
        }
    }
}

/// Machine-readable failure classification persisted on job rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Transient: remote source or AI service unreachable/erroring.
    SourceFetchFailed,
    /// Permanent: source produced empty/garbage normalized text.
    EmptyContent,
    /// Permanent: the file type cannot be extracted.
    UnsupportedFileType,
    /// Data integrity: stored blob path has no bytes behind it.
    FileMissing,
    /// Transient: extraction call failed.
    ExtractionFailed,
    /// Permanent: insights requested but extraction produced no text.
    ExtractedTextMissing,
    /// Data integrity: owning case row is gone.
    CaseMissing,
    /// Transient: summarization call failed.
    InsightGenerationFailed,
    /// Degraded: one chunk or one retrieval lost its embedding.
    EmbeddingFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceFetchFailed => "source_fetch_failed",
            Self::EmptyContent => "empty_content",
            Self::UnsupportedFileType => "unsupported_file_type",
            Self::FileMissing => "file_missing",
            Self::ExtractionFailed => "extraction_failed",
            Self::ExtractedTextMissing => "extracted_text_missing",
            Self::CaseMissing => "case_missing",
            Self::InsightGenerationFailed => "insight_generation_failed",
            Self::EmbeddingFailed => "embedding_failed",
        }
    }

    /// `None` for unknown strings so stale rows never masquerade as a
    /// known classification.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "source_fetch_failed" => Some(Self::SourceFetchFailed),
            "empty_content" => Some(Self::EmptyContent),
            "unsupported_file_type" => Some(Self::UnsupportedFileType),
            "file_missing" => Some(Self::FileMissing),
            "extraction_failed" => Some(Self::ExtractionFailed),
            "extracted_text_missing" => Some(Self::ExtractedTextMissing),
            "case_missing" => Some(Self::CaseMissing),
            "insight_generation_failed" => Some(Self::InsightGenerationFailed),
            "embedding_failed" => Some(Self::EmbeddingFailed),
            _ => None,
        }
    }

    /// Terminal codes are never retried automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::EmptyContent
                | Self::UnsupportedFileType
                | Self::FileMissing
                | Self::ExtractedTextMissing
                | Self::CaseMissing
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// REGULATION MONITORING
// =============================================================================

/// A user's subscription to change notifications for one regulation source.
///
/// Unique per (user, regulation). Many subscriptions may share a
/// (regulation, source URL) pair; the monitor groups them so N subscribers
/// cost one fetch per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulationSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub regulation_id: Uuid,
    pub source_url: String,
    pub check_interval_secs: i64,
    pub is_active: bool,
    /// Cached conditional-fetch validators from the last successful check.
    pub last_etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_content_hash: Option<String>,
    pub next_check_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Consecutive failed checks; reset to zero on success.
    pub failure_streak: i32,
}

/// Grouping key for one monitor fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceGroupKey {
    pub regulation_id: Uuid,
    pub source_url: String,
}

/// A stable regulation identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Regulation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub jurisdiction: Option<String>,
    pub status: RegulationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable, append-only, monotonically numbered content snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulationVersion {
    pub id: Uuid,
    pub regulation_id: Uuid,
    pub organization_id: Uuid,
    pub version_number: i32,
    pub content: String,
    pub content_hash: String,
    pub raw_source: Option<String>,
    pub reason: VersionReason,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit row for one monitor execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub trigger: RunTrigger,
    pub dry_run: bool,
    pub subscriptions_scanned: i32,
    pub sources_changed: i32,
    pub versions_created: i32,
    pub sources_failed: i32,
    pub status: MonitorRunStatus,
    pub error: Option<String>,
}

/// Count summary produced by one monitor cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorCounts {
    pub scanned: i32,
    pub changed: i32,
    pub versions_created: i32,
    pub failed: i32,
}

// =============================================================================
// DOCUMENT EXTRACTION & INSIGHTS
// =============================================================================

/// One row per document holding the two sub-state-machines: text extraction
/// and the insight layer built on top of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentExtraction {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub document_id: Uuid,
    pub case_id: Uuid,

    // Extraction track
    pub extraction_status: ExtractionStatus,
    pub file_hash: String,
    pub extracted_text: Option<String>,
    pub extracted_text_hash: Option<String>,
    pub extraction_method: Option<String>,
    pub extraction_error_code: Option<ErrorCode>,
    pub extraction_error: Option<String>,
    pub extraction_warnings: Vec<String>,
    pub extraction_attempts: i32,
    pub extraction_last_attempt_at: Option<DateTime<Utc>>,
    pub extraction_next_retry_at: DateTime<Utc>,

    // Insights track
    pub insights_status: InsightsStatus,
    pub summary: Option<String>,
    pub highlights: Vec<String>,
    pub citations: Vec<InsightCitation>,
    pub retrieval_meta: Option<RetrievalMeta>,
    pub case_context_hash: Option<String>,
    pub insights_source_text_hash: Option<String>,
    pub insights_error_code: Option<ErrorCode>,
    pub insights_error: Option<String>,
    pub insights_warnings: Vec<String>,
    pub insights_attempts: i32,
    pub insights_last_attempt_at: Option<DateTime<Utc>>,
    pub insights_next_retry_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Chunk reference supporting a generated summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightCitation {
    pub chunk_id: Uuid,
    pub chunk_index: i32,
    pub similarity: f64,
    pub snippet: String,
}

/// How context was assembled for insight generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMeta {
    /// "retrieval" when top-K chunks were used, "fallback_prefix" when the
    /// raw text prefix stood in for a failed retrieval.
    pub strategy: String,
    pub top_k: i32,
    pub chunks_considered: i32,
    pub context_chars: i32,
}

/// Outcome counts of one runner cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub claimed: usize,
    pub ready: usize,
    pub failed: usize,
    pub unsupported: usize,
}

// =============================================================================
// CHUNKS
// =============================================================================

/// A persisted text chunk, the unit of embedding and retrieval.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub content: String,
    pub language_tag: String,
    pub token_estimate: i32,
    /// NULL until a valid embedding exists; NULL rows are excluded from
    /// similarity retrieval but their text stays searchable.
    pub embedding: Option<Vector>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Input to a chunk reindex: everything except identity/timestamps.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i32,
    pub content: String,
    pub language_tag: String,
    pub token_estimate: i32,
    pub embedding: Option<Vector>,
    pub metadata: JsonValue,
}

/// One retrieval hit, ordered by ascending cosine distance.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub content: String,
    /// `1 - cosine_distance`, higher is closer.
    pub similarity: f64,
}

/// Ready/total embedding coverage for a document's chunk set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingCoverage {
    pub total_chunks: i64,
    pub embedded_chunks: i64,
}

/// The case fields insight generation anchors on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseContext {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub description: Option<String>,
}

impl CaseContext {
    /// Flattened text used for prompting and the context-change hash.
    pub fn as_text(&self) -> String {
        match &self.description {
            Some(d) if !d.is_empty() => format!("{}\n{}", self.title, d),
            _ => self.title.clone(),
        }
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// A persisted notification destined for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub related_entity_id: Option<Uuid>,
}
