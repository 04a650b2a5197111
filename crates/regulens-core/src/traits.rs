//! Repository and collaborator traits.
//!
//! Everything the pipeline touches sits behind one of these traits so the
//! runners can be exercised against in-memory doubles. PostgreSQL
//! implementations live in `regulens-db`.
//!
//! Every method that reads or writes tenant data takes the owning
//! `organization_id`; implementations must scope every statement to it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    CaseContext, ChunkHit, DocumentChunk, DocumentExtraction, EmbeddingCoverage, ErrorCode,
    InsightCitation,
    MonitorCounts, MonitorRun, MonitorRunStatus, NewChunk, NotificationRequest, Regulation,
    RegulationSubscription, RegulationVersion, RetrievalMeta, RunTrigger, VersionReason,
};

/// Subscription reads and post-check mutations used by the monitor.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Active subscriptions whose `next_check_at` has elapsed, ordered by
    /// `next_check_at` ascending, optionally filtered to one regulation.
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        regulation_id: Option<Uuid>,
    ) -> Result<Vec<RegulationSubscription>>;

    /// Record a successful check: refresh cached validators and hash,
    /// advance `next_check_at` by the subscription's own interval, reset
    /// the failure streak.
    async fn mark_checked_ok(
        &self,
        subscription_id: Uuid,
        etag: Option<&str>,
        last_modified: Option<&str>,
        content_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Record a failed check: bump the failure streak and reschedule after
    /// the failure retry interval. Cached validators are left untouched.
    async fn mark_checked_failed(&self, subscription_id: Uuid, now: DateTime<Utc>) -> Result<()>;

    /// All active subscribers of a regulation (for notification fan-out).
    async fn list_active_for_regulation(
        &self,
        regulation_id: Uuid,
    ) -> Result<Vec<RegulationSubscription>>;
}

/// Regulation identity and its immutable version ledger.
#[async_trait]
pub trait RegulationRepository: Send + Sync {
    async fn get(&self, org_id: Uuid, regulation_id: Uuid) -> Result<Option<Regulation>>;

    /// Latest version snapshot (highest `version_number`), if any.
    async fn latest_version(&self, regulation_id: Uuid) -> Result<Option<RegulationVersion>>;

    /// Append the next version (`max + 1`) in one transaction and mark the
    /// regulation amended. Never overwrites an existing version.
    async fn create_next_version(
        &self,
        regulation_id: Uuid,
        content: &str,
        content_hash: &str,
        raw_source: Option<&str>,
        reason: VersionReason,
    ) -> Result<RegulationVersion>;
}

/// Append-only monitor run audit.
#[async_trait]
pub trait MonitorRunRepository: Send + Sync {
    /// Insert the started row and return its id.
    async fn start(&self, trigger: RunTrigger, dry_run: bool, now: DateTime<Utc>) -> Result<Uuid>;

    /// Finalize the row exactly once with counts and terminal status.
    async fn finish(
        &self,
        run_id: Uuid,
        status: MonitorRunStatus,
        counts: MonitorCounts,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Most recent runs, newest first (health reporting).
    async fn recent(&self, limit: i64) -> Result<Vec<MonitorRun>>;
}

/// Document extraction rows: the durable job state for both tracks.
#[async_trait]
pub trait ExtractionRepository: Send + Sync {
    /// Queue (or re-queue) extraction for a document.
    ///
    /// No-op when a `ready` extraction already exists for the same file
    /// hash; returns whether a row was actually queued. Re-queueing resets
    /// attempts and invalidates the insight track.
    async fn queue(
        &self,
        org_id: Uuid,
        document_id: Uuid,
        case_id: Uuid,
        file_hash: &str,
        storage_path: &str,
    ) -> Result<bool>;

    /// Atomically claim up to `limit` due rows for extraction, flipping
    /// them to `processing` in the same statement. Due means pending,
    /// failed, or stuck-processing with `extraction_next_retry_at` elapsed;
    /// `ready` and `unsupported` rows are never claimed.
    async fn claim_due_extractions(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClaimedExtraction>>;

    async fn mark_extraction_ready(
        &self,
        row_id: Uuid,
        text: &str,
        text_hash: &str,
        method: &str,
        warnings: &[String],
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// `failed` reschedules after the backoff delay; terminal codes push
    /// the retry horizon far enough out that the due query skips them.
    async fn mark_extraction_failed(
        &self,
        row_id: Uuid,
        code: ErrorCode,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn mark_extraction_unsupported(
        &self,
        row_id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Atomically claim up to `limit` due insight rows (extraction `ready`,
    /// insights pending/failed/stuck with retry elapsed).
    async fn claim_due_insights(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DocumentExtraction>>;

    /// Claim one specific document for the synchronous generate-now path.
    async fn claim_insights_for_document(
        &self,
        org_id: Uuid,
        document_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<DocumentExtraction>>;

    #[allow(clippy::too_many_arguments)]
    async fn mark_insights_ready(
        &self,
        row_id: Uuid,
        summary: &str,
        highlights: &[String],
        citations: &[InsightCitation],
        retrieval_meta: &RetrievalMeta,
        case_context_hash: &str,
        source_text_hash: &str,
        warnings: &[String],
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Keeps whatever citations/metadata were computed (diagnostics).
    async fn mark_insights_failed(
        &self,
        row_id: Uuid,
        code: ErrorCode,
        message: &str,
        citations: &[InsightCitation],
        retrieval_meta: Option<&RetrievalMeta>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Reset the insight track to pending (extraction redone or case
    /// context changed materially).
    async fn reset_insights(&self, row_id: Uuid, now: DateTime<Utc>) -> Result<()>;

    /// Read-only view for the API layer.
    async fn get_for_document(
        &self,
        org_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<DocumentExtraction>>;
}

/// A claimed extraction row plus what the runner needs to process it.
#[derive(Debug, Clone)]
pub struct ClaimedExtraction {
    pub row_id: Uuid,
    pub organization_id: Uuid,
    pub document_id: Uuid,
    pub case_id: Uuid,
    pub file_hash: String,
    pub storage_path: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub attempts: i32,
}

/// Vector chunk persistence and similarity retrieval.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Replace the document's chunk set in one all-or-nothing transaction.
    /// Duplicate chunk indices or invalid embeddings reject the whole
    /// request before any write.
    async fn reindex(
        &self,
        org_id: Uuid,
        document_id: Uuid,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<DocumentChunk>>;

    /// Top-K nearest chunks by cosine distance, optionally scoped to one
    /// document. Chunks without embeddings are excluded.
    async fn retrieve_top_k(
        &self,
        org_id: Uuid,
        query: &Vector,
        k: usize,
        document_id: Option<Uuid>,
    ) -> Result<Vec<ChunkHit>>;

    /// Embedded/total counts so callers can see degraded retrieval.
    async fn embedding_coverage(
        &self,
        org_id: Uuid,
        document_id: Uuid,
    ) -> Result<EmbeddingCoverage>;
}

/// Read access to the case a document belongs to.
#[async_trait]
pub trait CaseRepository: Send + Sync {
    /// `None` when the case row is gone (data-integrity failure upstream).
    async fn get_context(&self, org_id: Uuid, case_id: Uuid) -> Result<Option<CaseContext>>;
}

/// File-blob read access keyed by a stored path.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Raw bytes, or `Error::NotFound` when the path has nothing behind it.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
}

/// Notification fan-out: a persisted batch insert plus a best-effort
/// real-time broadcast. Broadcast failures must never propagate.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_batch(&self, notifications: &[NotificationRequest]) -> Result<()>;

    /// Best-effort; implementations swallow and log failures.
    async fn broadcast(&self, organization_id: Uuid, event: &str, payload: serde_json::Value);
}

/// Deployment-wide mutual exclusion for single-flight operations.
///
/// The primitive behind it (database advisory lock, distributed lock
/// service) is swappable without touching monitor logic.
#[async_trait]
pub trait SingleFlight: Send + Sync {
    /// Non-blocking acquire; `false` means another holder is active.
    async fn try_acquire(&self, key: i64) -> Result<bool>;

    /// Release a previously acquired key. Idempotent.
    async fn release(&self, key: i64) -> Result<()>;
}
