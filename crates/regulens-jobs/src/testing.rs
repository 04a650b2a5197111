//! In-memory repository doubles for runner scenario tests.
//!
//! These mirror the PostgreSQL implementations' observable behavior
//! (claim transitions, idempotent queueing, due filtering) without a
//! database, so runner logic can be exercised end to end.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use regulens_core::{
    defaults, CaseContext, CaseRepository, ChunkHit, ChunkRepository, ClaimedExtraction,
    DocumentChunk, DocumentExtraction, EmbeddingCoverage, Error, ErrorCode, ExtractionRepository,
    ExtractionStatus, InsightCitation, MonitorCounts, MonitorRun, MonitorRunRepository,
    MonitorRunStatus, NewChunk, NotificationRequest, Notifier, Regulation, RegulationRepository,
    RegulationStatus, RegulationSubscription, RegulationVersion, Result, RetrievalMeta,
    RunTrigger, SingleFlight, SubscriptionRepository, Vector, VersionReason,
};

/// Install a fmt subscriber so `RUST_LOG=debug cargo test` shows runner
/// decisions. Safe to call from every test; only the first call wins.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// CHUNKS
// =============================================================================

pub struct InMemoryChunkRepository {
    dimension: usize,
    rows: Mutex<Vec<DocumentChunk>>,
}

impl InMemoryChunkRepository {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            rows: Mutex::new(Vec::new()),
        }
    }

    pub fn stored(&self, document_id: Uuid) -> Vec<DocumentChunk> {
        let mut rows: Vec<DocumentChunk> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.chunk_index);
        rows
    }

    fn similarity(a: &[f32], b: &[f32]) -> f64 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            return 0.0;
        }
        (dot / (na * nb)) as f64
    }
}

#[async_trait]
impl ChunkRepository for InMemoryChunkRepository {
    async fn reindex(
        &self,
        org_id: Uuid,
        document_id: Uuid,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<DocumentChunk>> {
        let mut seen = HashSet::new();
        for chunk in &chunks {
            if !seen.insert(chunk.chunk_index) {
                return Err(Error::InvalidInput(format!(
                    "duplicate chunk index {}",
                    chunk.chunk_index
                )));
            }
            if let Some(embedding) = &chunk.embedding {
                let slice = embedding.as_slice();
                if slice.len() != self.dimension || slice.iter().any(|v| !v.is_finite()) {
                    return Err(Error::Embedding("invalid embedding".to_string()));
                }
            }
        }

        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        rows.retain(|c| !(c.organization_id == org_id && c.document_id == document_id));

        let mut persisted = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let row = DocumentChunk {
                id: Uuid::new_v4(),
                organization_id: org_id,
                document_id,
                chunk_index: chunk.chunk_index,
                content: chunk.content,
                language_tag: chunk.language_tag,
                token_estimate: chunk.token_estimate,
                embedding: chunk.embedding,
                metadata: chunk.metadata,
                created_at: now,
            };
            rows.push(row.clone());
            persisted.push(row);
        }
        Ok(persisted)
    }

    async fn retrieve_top_k(
        &self,
        org_id: Uuid,
        query: &Vector,
        k: usize,
        document_id: Option<Uuid>,
    ) -> Result<Vec<ChunkHit>> {
        let rows = self.rows.lock().unwrap();
        let mut hits: Vec<ChunkHit> = rows
            .iter()
            .filter(|c| c.organization_id == org_id)
            .filter(|c| document_id.is_none_or(|d| c.document_id == d))
            .filter_map(|c| {
                let embedding = c.embedding.as_ref()?;
                Some(ChunkHit {
                    chunk_id: c.id,
                    document_id: c.document_id,
                    chunk_index: c.chunk_index,
                    content: c.content.clone(),
                    similarity: Self::similarity(embedding.as_slice(), query.as_slice()),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(k);
        Ok(hits)
    }

    async fn embedding_coverage(
        &self,
        org_id: Uuid,
        document_id: Uuid,
    ) -> Result<EmbeddingCoverage> {
        let rows = self.rows.lock().unwrap();
        let doc: Vec<&DocumentChunk> = rows
            .iter()
            .filter(|c| c.organization_id == org_id && c.document_id == document_id)
            .collect();
        Ok(EmbeddingCoverage {
            total_chunks: doc.len() as i64,
            embedded_chunks: doc.iter().filter(|c| c.embedding.is_some()).count() as i64,
        })
    }
}

// =============================================================================
// EXTRACTIONS
// =============================================================================

#[derive(Clone)]
pub struct StoredExtraction {
    pub row: DocumentExtraction,
    pub storage_path: String,
    pub file_name: String,
    pub content_type: Option<String>,
}

#[derive(Default)]
pub struct InMemoryExtractionRepository {
    rows: Mutex<Vec<StoredExtraction>>,
}

impl InMemoryExtractionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, row_id: Uuid) -> Option<DocumentExtraction> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.row.id == row_id)
            .map(|s| s.row.clone())
    }

    pub fn by_document(&self, document_id: Uuid) -> Option<DocumentExtraction> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.row.document_id == document_id)
            .map(|s| s.row.clone())
    }

    /// Insert a row directly, bypassing the queue path.
    pub fn insert(&self, row: DocumentExtraction) {
        self.rows.lock().unwrap().push(StoredExtraction {
            row,
            storage_path: String::new(),
            file_name: String::new(),
            content_type: None,
        });
    }

    pub fn blank_row(
        org_id: Uuid,
        document_id: Uuid,
        case_id: Uuid,
        file_hash: &str,
        now: DateTime<Utc>,
    ) -> DocumentExtraction {
        DocumentExtraction {
            id: Uuid::new_v4(),
            organization_id: org_id,
            document_id,
            case_id,
            extraction_status: ExtractionStatus::Pending,
            file_hash: file_hash.to_string(),
            extracted_text: None,
            extracted_text_hash: None,
            extraction_method: None,
            extraction_error_code: None,
            extraction_error: None,
            extraction_warnings: Vec::new(),
            extraction_attempts: 0,
            extraction_last_attempt_at: None,
            extraction_next_retry_at: now,
            insights_status: ExtractionStatus::Pending,
            summary: None,
            highlights: Vec::new(),
            citations: Vec::new(),
            retrieval_meta: None,
            case_context_hash: None,
            insights_source_text_hash: None,
            insights_error_code: None,
            insights_error: None,
            insights_warnings: Vec::new(),
            insights_attempts: 0,
            insights_last_attempt_at: None,
            insights_next_retry_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn with_row<T>(
        &self,
        row_id: Uuid,
        f: impl FnOnce(&mut DocumentExtraction) -> T,
    ) -> Result<T> {
        let mut rows = self.rows.lock().unwrap();
        let stored = rows
            .iter_mut()
            .find(|s| s.row.id == row_id)
            .ok_or_else(|| Error::NotFound(format!("extraction row {row_id}")))?;
        Ok(f(&mut stored.row))
    }
}

#[async_trait]
impl ExtractionRepository for InMemoryExtractionRepository {
    async fn queue(
        &self,
        org_id: Uuid,
        document_id: Uuid,
        case_id: Uuid,
        file_hash: &str,
        storage_path: &str,
    ) -> Result<bool> {
        let now = Utc::now();
        let file_name = storage_path
            .rsplit('/')
            .next()
            .unwrap_or(storage_path)
            .to_string();
        let mut rows = self.rows.lock().unwrap();

        if let Some(stored) = rows.iter_mut().find(|s| s.row.document_id == document_id) {
            if stored.row.extraction_status == ExtractionStatus::Ready
                && stored.row.file_hash == file_hash
            {
                return Ok(false);
            }
            let id = stored.row.id;
            let created_at = stored.row.created_at;
            stored.row = Self::blank_row(org_id, document_id, case_id, file_hash, now);
            stored.row.id = id;
            stored.row.created_at = created_at;
            stored.storage_path = storage_path.to_string();
            stored.file_name = file_name;
            return Ok(true);
        }

        rows.push(StoredExtraction {
            row: Self::blank_row(org_id, document_id, case_id, file_hash, now),
            storage_path: storage_path.to_string(),
            file_name,
            content_type: None,
        });
        Ok(true)
    }

    async fn claim_due_extractions(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClaimedExtraction>> {
        let stuck = now + Duration::seconds(defaults::STUCK_PROCESSING_SECS);
        let mut rows = self.rows.lock().unwrap();

        let mut due: Vec<&mut StoredExtraction> = rows
            .iter_mut()
            .filter(|s| {
                matches!(
                    s.row.extraction_status,
                    ExtractionStatus::Pending
                        | ExtractionStatus::Failed
                        | ExtractionStatus::Processing
                ) && s.row.extraction_next_retry_at <= now
            })
            .collect();
        due.sort_by_key(|s| s.row.extraction_next_retry_at);
        due.truncate(limit as usize);

        Ok(due
            .into_iter()
            .map(|stored| {
                stored.row.extraction_status = ExtractionStatus::Processing;
                stored.row.extraction_attempts += 1;
                stored.row.extraction_last_attempt_at = Some(now);
                stored.row.extraction_next_retry_at = stuck;
                ClaimedExtraction {
                    row_id: stored.row.id,
                    organization_id: stored.row.organization_id,
                    document_id: stored.row.document_id,
                    case_id: stored.row.case_id,
                    file_hash: stored.row.file_hash.clone(),
                    storage_path: stored.storage_path.clone(),
                    file_name: stored.file_name.clone(),
                    content_type: stored.content_type.clone(),
                    attempts: stored.row.extraction_attempts,
                }
            })
            .collect())
    }

    async fn mark_extraction_ready(
        &self,
        row_id: Uuid,
        text: &str,
        text_hash: &str,
        method: &str,
        warnings: &[String],
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_row(row_id, |row| {
            row.extraction_status = ExtractionStatus::Ready;
            row.extracted_text = Some(text.to_string());
            row.extraction_method = Some(method.to_string());
            row.extraction_error_code = None;
            row.extraction_error = None;
            row.extraction_warnings = warnings.to_vec();
            if row.insights_status != ExtractionStatus::Ready
                || row.insights_source_text_hash.as_deref() != Some(text_hash)
            {
                row.insights_status = ExtractionStatus::Pending;
                row.insights_next_retry_at = now;
            }
            row.extracted_text_hash = Some(text_hash.to_string());
            row.updated_at = now;
        })
    }

    async fn mark_extraction_failed(
        &self,
        row_id: Uuid,
        code: ErrorCode,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_row(row_id, |row| {
            row.extraction_status = ExtractionStatus::Failed;
            row.extraction_error_code = Some(code);
            row.extraction_error = Some(message.to_string());
            row.extraction_next_retry_at = if code.is_terminal() {
                now + Duration::days(36_500)
            } else {
                now + Duration::seconds(defaults::EXTRACTION_RETRY_DELAY_SECS)
            };
            row.updated_at = now;
        })
    }

    async fn mark_extraction_unsupported(
        &self,
        row_id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_row(row_id, |row| {
            row.extraction_status = ExtractionStatus::Unsupported;
            row.extraction_error_code = Some(ErrorCode::UnsupportedFileType);
            row.extraction_error = Some(message.to_string());
            row.updated_at = now;
        })
    }

    async fn claim_due_insights(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DocumentExtraction>> {
        let stuck = now + Duration::seconds(defaults::STUCK_PROCESSING_SECS);
        let mut rows = self.rows.lock().unwrap();

        let mut due: Vec<&mut StoredExtraction> = rows
            .iter_mut()
            .filter(|s| {
                s.row.extraction_status == ExtractionStatus::Ready
                    && matches!(
                        s.row.insights_status,
                        ExtractionStatus::Pending
                            | ExtractionStatus::Failed
                            | ExtractionStatus::Processing
                    )
                    && s.row.insights_next_retry_at <= now
            })
            .collect();
        due.sort_by_key(|s| s.row.insights_next_retry_at);
        due.truncate(limit as usize);

        Ok(due
            .into_iter()
            .map(|stored| {
                stored.row.insights_status = ExtractionStatus::Processing;
                stored.row.insights_attempts += 1;
                stored.row.insights_last_attempt_at = Some(now);
                stored.row.insights_next_retry_at = stuck;
                stored.row.clone()
            })
            .collect())
    }

    async fn claim_insights_for_document(
        &self,
        org_id: Uuid,
        document_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<DocumentExtraction>> {
        let stuck = now + Duration::seconds(defaults::STUCK_PROCESSING_SECS);
        let mut rows = self.rows.lock().unwrap();
        let Some(stored) = rows.iter_mut().find(|s| {
            s.row.organization_id == org_id
                && s.row.document_id == document_id
                && s.row.extraction_status == ExtractionStatus::Ready
                && (s.row.insights_status != ExtractionStatus::Processing
                    || s.row.insights_next_retry_at <= now)
        }) else {
            return Ok(None);
        };

        stored.row.insights_status = ExtractionStatus::Processing;
        stored.row.insights_attempts += 1;
        stored.row.insights_last_attempt_at = Some(now);
        stored.row.insights_next_retry_at = stuck;
        Ok(Some(stored.row.clone()))
    }

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
    ) -> Result<()> {
        self.with_row(row_id, |row| {
            row.insights_status = ExtractionStatus::Ready;
            row.summary = Some(summary.to_string());
            row.highlights = highlights.to_vec();
            row.citations = citations.to_vec();
            row.retrieval_meta = Some(retrieval_meta.clone());
            row.case_context_hash = Some(case_context_hash.to_string());
            row.insights_source_text_hash = Some(source_text_hash.to_string());
            row.insights_error_code = None;
            row.insights_error = None;
            row.insights_warnings = warnings.to_vec();
            row.updated_at = now;
        })
    }

    async fn mark_insights_failed(
        &self,
        row_id: Uuid,
        code: ErrorCode,
        message: &str,
        citations: &[InsightCitation],
        retrieval_meta: Option<&RetrievalMeta>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_row(row_id, |row| {
            row.insights_status = ExtractionStatus::Failed;
            row.insights_error_code = Some(code);
            row.insights_error = Some(message.to_string());
            row.citations = citations.to_vec();
            row.retrieval_meta = retrieval_meta.cloned();
            row.insights_next_retry_at = if code.is_terminal() {
                now + Duration::days(36_500)
            } else {
                now + Duration::seconds(defaults::INSIGHTS_RETRY_DELAY_SECS)
            };
            row.updated_at = now;
        })
    }

    async fn reset_insights(&self, row_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        self.with_row(row_id, |row| {
            row.insights_status = ExtractionStatus::Pending;
            row.summary = None;
            row.highlights = Vec::new();
            row.citations = Vec::new();
            row.retrieval_meta = None;
            row.case_context_hash = None;
            row.insights_source_text_hash = None;
            row.insights_error_code = None;
            row.insights_error = None;
            row.insights_warnings = Vec::new();
            row.insights_attempts = 0;
            row.insights_next_retry_at = now;
            row.updated_at = now;
        })
    }

    async fn get_for_document(
        &self,
        org_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<DocumentExtraction>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.row.organization_id == org_id && s.row.document_id == document_id)
            .map(|s| s.row.clone()))
    }
}

// =============================================================================
// SUBSCRIPTIONS / REGULATIONS / RUNS
// =============================================================================

#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    rows: Mutex<Vec<RegulationSubscription>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, subscription: RegulationSubscription) {
        self.rows.lock().unwrap().push(subscription);
    }

    pub fn get(&self, id: Uuid) -> Option<RegulationSubscription> {
        self.rows.lock().unwrap().iter().find(|s| s.id == id).cloned()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        regulation_id: Option<Uuid>,
    ) -> Result<Vec<RegulationSubscription>> {
        let mut due: Vec<RegulationSubscription> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_active && s.next_check_at <= now)
            .filter(|s| regulation_id.is_none_or(|r| s.regulation_id == r))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_check_at);
        Ok(due)
    }

    async fn mark_checked_ok(
        &self,
        subscription_id: Uuid,
        etag: Option<&str>,
        last_modified: Option<&str>,
        content_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let sub = rows
            .iter_mut()
            .find(|s| s.id == subscription_id)
            .ok_or_else(|| Error::NotFound(format!("subscription {subscription_id}")))?;
        if let Some(etag) = etag {
            sub.last_etag = Some(etag.to_string());
        }
        if let Some(lm) = last_modified {
            sub.last_modified = Some(lm.to_string());
        }
        if let Some(hash) = content_hash {
            sub.last_content_hash = Some(hash.to_string());
        }
        sub.last_checked_at = Some(now);
        sub.next_check_at = now + Duration::seconds(sub.check_interval_secs);
        sub.failure_streak = 0;
        Ok(())
    }

    async fn mark_checked_failed(&self, subscription_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let sub = rows
            .iter_mut()
            .find(|s| s.id == subscription_id)
            .ok_or_else(|| Error::NotFound(format!("subscription {subscription_id}")))?;
        sub.last_checked_at = Some(now);
        sub.next_check_at = now + Duration::seconds(defaults::MONITOR_FAILURE_RETRY_SECS);
        sub.failure_streak += 1;
        Ok(())
    }

    async fn list_active_for_regulation(
        &self,
        regulation_id: Uuid,
    ) -> Result<Vec<RegulationSubscription>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_active && s.regulation_id == regulation_id)
            .cloned()
            .collect())
    }
}

pub struct InMemoryRegulationRepository {
    regulations: Mutex<Vec<Regulation>>,
    versions: Mutex<Vec<RegulationVersion>>,
}

impl InMemoryRegulationRepository {
    pub fn new() -> Self {
        Self {
            regulations: Mutex::new(Vec::new()),
            versions: Mutex::new(Vec::new()),
        }
    }

    pub fn insert_regulation(&self, regulation: Regulation) {
        self.regulations.lock().unwrap().push(regulation);
    }

    pub fn insert_version(&self, version: RegulationVersion) {
        self.versions.lock().unwrap().push(version);
    }

    pub fn versions_of(&self, regulation_id: Uuid) -> Vec<RegulationVersion> {
        let mut versions: Vec<RegulationVersion> = self
            .versions
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.regulation_id == regulation_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version_number);
        versions
    }

    pub fn status_of(&self, regulation_id: Uuid) -> Option<RegulationStatus> {
        self.regulations
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == regulation_id)
            .map(|r| r.status)
    }
}

impl Default for InMemoryRegulationRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegulationRepository for InMemoryRegulationRepository {
    async fn get(&self, org_id: Uuid, regulation_id: Uuid) -> Result<Option<Regulation>> {
        Ok(self
            .regulations
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.organization_id == org_id && r.id == regulation_id)
            .cloned())
    }

    async fn latest_version(&self, regulation_id: Uuid) -> Result<Option<RegulationVersion>> {
        Ok(self
            .versions
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.regulation_id == regulation_id)
            .max_by_key(|v| v.version_number)
            .cloned())
    }

    async fn create_next_version(
        &self,
        regulation_id: Uuid,
        content: &str,
        content_hash: &str,
        raw_source: Option<&str>,
        reason: VersionReason,
    ) -> Result<RegulationVersion> {
        let mut regulations = self.regulations.lock().unwrap();
        let regulation = regulations
            .iter_mut()
            .find(|r| r.id == regulation_id)
            .ok_or(Error::RegulationNotFound(regulation_id))?;

        let mut versions = self.versions.lock().unwrap();
        let next_number = versions
            .iter()
            .filter(|v| v.regulation_id == regulation_id)
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0)
            + 1;

        let version = RegulationVersion {
            id: Uuid::new_v4(),
            regulation_id,
            organization_id: regulation.organization_id,
            version_number: next_number,
            content: content.to_string(),
            content_hash: content_hash.to_string(),
            raw_source: raw_source.map(str::to_string),
            reason,
            created_at: Utc::now(),
        };
        versions.push(version.clone());

        if next_number > 1 {
            regulation.status = RegulationStatus::Amended;
        }
        Ok(version)
    }
}

#[derive(Default)]
pub struct InMemoryMonitorRunRepository {
    rows: Mutex<Vec<MonitorRun>>,
}

impl InMemoryMonitorRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<MonitorRun> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl MonitorRunRepository for InMemoryMonitorRunRepository {
    async fn start(&self, trigger: RunTrigger, dry_run: bool, now: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.rows.lock().unwrap().push(MonitorRun {
            id,
            started_at: now,
            finished_at: None,
            trigger,
            dry_run,
            subscriptions_scanned: 0,
            sources_changed: 0,
            versions_created: 0,
            sources_failed: 0,
            status: MonitorRunStatus::Failed,
            error: None,
        });
        Ok(id)
    }

    async fn finish(
        &self,
        run_id: Uuid,
        status: MonitorRunStatus,
        counts: MonitorCounts,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let run = rows
            .iter_mut()
            .find(|r| r.id == run_id && r.finished_at.is_none())
            .ok_or_else(|| Error::NotFound(format!("open monitor run {run_id}")))?;
        run.finished_at = Some(now);
        run.status = status;
        run.subscriptions_scanned = counts.scanned;
        run.sources_changed = counts.changed;
        run.versions_created = counts.versions_created;
        run.sources_failed = counts.failed;
        run.error = error.map(str::to_string);
        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<MonitorRun>> {
        let mut rows = self.rows.lock().unwrap().clone();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

// =============================================================================
// COLLABORATORS
// =============================================================================

#[derive(Default)]
pub struct InMemoryBlobStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, bytes: &[u8]) {
        self.blobs
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
    }
}

#[async_trait]
impl regulens_core::BlobStorage for InMemoryBlobStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("blob {path}")))
    }
}

#[derive(Default)]
pub struct InMemoryCaseRepository {
    cases: Mutex<Vec<CaseContext>>,
}

impl InMemoryCaseRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by case id.
    pub fn insert(&self, case: CaseContext) {
        let mut cases = self.cases.lock().unwrap();
        if let Some(existing) = cases.iter_mut().find(|c| c.id == case.id) {
            *existing = case;
        } else {
            cases.push(case);
        }
    }
}

#[async_trait]
impl CaseRepository for InMemoryCaseRepository {
    async fn get_context(&self, org_id: Uuid, case_id: Uuid) -> Result<Option<CaseContext>> {
        Ok(self
            .cases
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.organization_id == org_id && c.id == case_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notifications: Mutex<Vec<NotificationRequest>>,
    pub broadcasts: Mutex<Vec<(Uuid, String, JsonValue)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_batch(&self, notifications: &[NotificationRequest]) -> Result<()> {
        self.notifications
            .lock()
            .unwrap()
            .extend_from_slice(notifications);
        Ok(())
    }

    async fn broadcast(&self, organization_id: Uuid, event: &str, payload: JsonValue) {
        self.broadcasts
            .lock()
            .unwrap()
            .push((organization_id, event.to_string(), payload));
    }
}

/// Single-flight double; `held_elsewhere` simulates another deployment
/// instance owning the lock.
#[derive(Default)]
pub struct InMemorySingleFlight {
    held: Mutex<HashSet<i64>>,
    held_elsewhere: Mutex<HashSet<i64>>,
}

impl InMemorySingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold_elsewhere(&self, key: i64) {
        self.held_elsewhere.lock().unwrap().insert(key);
    }

    pub fn is_held(&self, key: i64) -> bool {
        self.held.lock().unwrap().contains(&key)
    }
}

#[async_trait]
impl SingleFlight for InMemorySingleFlight {
    async fn try_acquire(&self, key: i64) -> Result<bool> {
        if self.held_elsewhere.lock().unwrap().contains(&key) {
            return Ok(false);
        }
        Ok(self.held.lock().unwrap().insert(key))
    }

    async fn release(&self, key: i64) -> Result<()> {
        self.held.lock().unwrap().remove(&key);
        Ok(())
    }
}
