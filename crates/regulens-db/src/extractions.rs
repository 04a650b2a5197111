//! Document extraction rows: durable state for the extraction and insight
//! job tracks, with atomic claim semantics.
//!
//! Claims flip rows to `processing` and push `*_next_retry_at` past the
//! stuck-processing horizon in the same statement, so a crashed worker's
//! rows become claimable again once that horizon elapses. `FOR UPDATE SKIP
//! LOCKED` keeps concurrent claimers from double-claiming under load.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use regulens_core::{
    defaults, ClaimedExtraction, DocumentExtraction, Error, ErrorCode, ExtractionRepository,
    ExtractionStatus, InsightCitation, Result, RetrievalMeta,
};

/// Retry horizon for terminal failures. Far enough out that the due query
/// never picks the row up again without an explicit re-queue.
const TERMINAL_HORIZON_DAYS: i64 = 36_500;

const EXTRACTION_COLUMNS: &str = "id, organization_id, document_id, case_id, \
     extraction_status, file_hash, extracted_text, extracted_text_hash, \
     extraction_method, extraction_error_code, extraction_error, \
     extraction_warnings, extraction_attempts, extraction_last_attempt_at, \
     extraction_next_retry_at, \
     insights_status, summary, highlights, citations, retrieval_meta, \
     case_context_hash, insights_source_text_hash, insights_error_code, \
     insights_error, insights_warnings, insights_attempts, \
     insights_last_attempt_at, insights_next_retry_at, \
     created_at, updated_at";

pub struct PgExtractionRepository {
    pool: PgPool,
    extraction_retry_secs: i64,
    insights_retry_secs: i64,
    stuck_processing_secs: i64,
}

impl PgExtractionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            extraction_retry_secs: defaults::EXTRACTION_RETRY_DELAY_SECS,
            insights_retry_secs: defaults::INSIGHTS_RETRY_DELAY_SECS,
            stuck_processing_secs: defaults::STUCK_PROCESSING_SECS,
        }
    }

    pub fn with_extraction_retry_secs(mut self, secs: i64) -> Self {
        self.extraction_retry_secs = secs;
        self
    }

    pub fn with_insights_retry_secs(mut self, secs: i64) -> Self {
        self.insights_retry_secs = secs;
        self
    }

    pub fn with_stuck_processing_secs(mut self, secs: i64) -> Self {
        self.stuck_processing_secs = secs;
        self
    }

    fn retry_at(&self, code: ErrorCode, base_delay_secs: i64, now: DateTime<Utc>) -> DateTime<Utc> {
        if code.is_terminal() {
            now + Duration::days(TERMINAL_HORIZON_DAYS)
        } else {
            now + Duration::seconds(base_delay_secs)
        }
    }

    fn string_list(value: JsonValue) -> Vec<String> {
        serde_json::from_value(value).unwrap_or_default()
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> DocumentExtraction {
        let extraction_status: String = row.get("extraction_status");
        let insights_status: String = row.get("insights_status");
        let extraction_error_code: Option<String> = row.get("extraction_error_code");
        let insights_error_code: Option<String> = row.get("insights_error_code");
        let citations: JsonValue = row.get("citations");
        let retrieval_meta: Option<JsonValue> = row.get("retrieval_meta");

        DocumentExtraction {
            id: row.get("id"),
            organization_id: row.get("organization_id"),
            document_id: row.get("document_id"),
            case_id: row.get("case_id"),
            extraction_status: ExtractionStatus::parse(&extraction_status),
            file_hash: row.get("file_hash"),
            extracted_text: row.get("extracted_text"),
            extracted_text_hash: row.get("extracted_text_hash"),
            extraction_method: row.get("extraction_method"),
            extraction_error_code: extraction_error_code.as_deref().and_then(ErrorCode::parse),
            extraction_error: row.get("extraction_error"),
            extraction_warnings: Self::string_list(row.get("extraction_warnings")),
            extraction_attempts: row.get("extraction_attempts"),
            extraction_last_attempt_at: row.get("extraction_last_attempt_at"),
            extraction_next_retry_at: row.get("extraction_next_retry_at"),
            insights_status: ExtractionStatus::parse(&insights_status),
            summary: row.get("summary"),
            highlights: Self::string_list(row.get("highlights")),
            citations: serde_json::from_value::<Vec<InsightCitation>>(citations)
                .unwrap_or_default(),
            retrieval_meta: retrieval_meta.and_then(|v| serde_json::from_value(v).ok()),
            case_context_hash: row.get("case_context_hash"),
            insights_source_text_hash: row.get("insights_source_text_hash"),
            insights_error_code: insights_error_code.as_deref().and_then(ErrorCode::parse),
            insights_error: row.get("insights_error"),
            insights_warnings: Self::string_list(row.get("insights_warnings")),
            insights_attempts: row.get("insights_attempts"),
            insights_last_attempt_at: row.get("insights_last_attempt_at"),
            insights_next_retry_at: row.get("insights_next_retry_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn file_name_from_path(path: &str) -> String {
        path.rsplit('/').next().unwrap_or(path).to_string()
    }
}

#[async_trait]
impl ExtractionRepository for PgExtractionRepository {
    async fn queue(
        &self,
        org_id: Uuid,
        document_id: Uuid,
        case_id: Uuid,
        file_hash: &str,
        storage_path: &str,
    ) -> Result<bool> {
        let now = Utc::now();
        let file_name = Self::file_name_from_path(storage_path);

        // Re-queueing resets both tracks; a row that is already ready for
        // the same bytes is left alone so the call stays idempotent.
        let result = sqlx::query(
            "INSERT INTO document_extraction
                 (id, organization_id, document_id, case_id, storage_path,
                  file_name, file_hash, extraction_next_retry_at,
                  insights_next_retry_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, $8, $8)
             ON CONFLICT (document_id) DO UPDATE SET
                 case_id = EXCLUDED.case_id,
                 storage_path = EXCLUDED.storage_path,
                 file_name = EXCLUDED.file_name,
                 file_hash = EXCLUDED.file_hash,
                 extraction_status = 'pending',
                 extracted_text = NULL,
                 extracted_text_hash = NULL,
                 extraction_method = NULL,
                 extraction_error_code = NULL,
                 extraction_error = NULL,
                 extraction_warnings = '[]',
                 extraction_attempts = 0,
                 extraction_next_retry_at = EXCLUDED.extraction_next_retry_at,
                 insights_status = 'pending',
                 summary = NULL,
                 highlights = '[]',
                 citations = '[]',
                 retrieval_meta = NULL,
                 case_context_hash = NULL,
                 insights_source_text_hash = NULL,
                 insights_error_code = NULL,
                 insights_error = NULL,
                 insights_warnings = '[]',
                 insights_attempts = 0,
                 insights_next_retry_at = EXCLUDED.insights_next_retry_at,
                 updated_at = EXCLUDED.updated_at
             WHERE NOT (document_extraction.extraction_status = 'ready'
                        AND document_extraction.file_hash = EXCLUDED.file_hash)",
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(document_id)
        .bind(case_id)
        .bind(storage_path)
        .bind(file_name)
        .bind(file_hash)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim_due_extractions(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClaimedExtraction>> {
        let stuck_horizon = now + Duration::seconds(self.stuck_processing_secs);

        let rows = sqlx::query(
            "UPDATE document_extraction
             SET extraction_status = 'processing',
                 extraction_attempts = extraction_attempts + 1,
                 extraction_last_attempt_at = $1,
                 extraction_next_retry_at = $2,
                 updated_at = $1
             WHERE id IN (
                 SELECT id FROM document_extraction
                 WHERE extraction_status IN ('pending', 'failed', 'processing')
                   AND extraction_next_retry_at <= $1
                 ORDER BY extraction_next_retry_at ASC
                 LIMIT $3
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, organization_id, document_id, case_id, file_hash,
                       storage_path, file_name, content_type, extraction_attempts",
        )
        .bind(now)
        .bind(stuck_horizon)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let claimed: Vec<ClaimedExtraction> = rows
            .into_iter()
            .map(|row| ClaimedExtraction {
                row_id: row.get("id"),
                organization_id: row.get("organization_id"),
                document_id: row.get("document_id"),
                case_id: row.get("case_id"),
                file_hash: row.get("file_hash"),
                storage_path: row.get("storage_path"),
                file_name: row.get("file_name"),
                content_type: row.get("content_type"),
                attempts: row.get("extraction_attempts"),
            })
            .collect();

        if !claimed.is_empty() {
            debug!(
                subsystem = "db",
                component = "extractions",
                op = "claim_extractions",
                claimed_count = claimed.len(),
                "Claimed extraction rows"
            );
        }
        Ok(claimed)
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
        // New text invalidates insights built from an older extraction.
        let result = sqlx::query(
            "UPDATE document_extraction
             SET extraction_status = 'ready',
                 extracted_text = $2,
                 extracted_text_hash = $3,
                 extraction_method = $4,
                 extraction_error_code = NULL,
                 extraction_error = NULL,
                 extraction_warnings = $5,
                 insights_status = CASE
                     WHEN insights_status = 'ready'
                          AND insights_source_text_hash = $3
                     THEN insights_status ELSE 'pending' END,
                 insights_next_retry_at = CASE
                     WHEN insights_status = 'ready'
                          AND insights_source_text_hash = $3
                     THEN insights_next_retry_at ELSE $6 END,
                 updated_at = $6
             WHERE id = $1",
        )
        .bind(row_id)
        .bind(text)
        .bind(text_hash)
        .bind(method)
        .bind(serde_json::to_value(warnings)?)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("extraction row {row_id}")));
        }
        Ok(())
    }

    async fn mark_extraction_failed(
        &self,
        row_id: Uuid,
        code: ErrorCode,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let retry_at = self.retry_at(code, self.extraction_retry_secs, now);
        let result = sqlx::query(
            "UPDATE document_extraction
             SET extraction_status = 'failed',
                 extraction_error_code = $2,
                 extraction_error = $3,
                 extraction_next_retry_at = $4,
                 updated_at = $5
             WHERE id = $1",
        )
        .bind(row_id)
        .bind(code.as_str())
        .bind(message)
        .bind(retry_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("extraction row {row_id}")));
        }
        Ok(())
    }

    async fn mark_extraction_unsupported(
        &self,
        row_id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE document_extraction
             SET extraction_status = 'unsupported',
                 extraction_error_code = $2,
                 extraction_error = $3,
                 updated_at = $4
             WHERE id = $1",
        )
        .bind(row_id)
        .bind(ErrorCode::UnsupportedFileType.as_str())
        .bind(message)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("extraction row {row_id}")));
        }
        Ok(())
    }

    async fn claim_due_insights(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DocumentExtraction>> {
        let stuck_horizon = now + Duration::seconds(self.stuck_processing_secs);

        let sql = format!(
            "UPDATE document_extraction
             SET insights_status = 'processing',
                 insights_attempts = insights_attempts + 1,
                 insights_last_attempt_at = $1,
                 insights_next_retry_at = $2,
                 updated_at = $1
             WHERE id IN (
                 SELECT id FROM document_extraction
                 WHERE extraction_status = 'ready'
                   AND insights_status IN ('pending', 'failed', 'processing')
                   AND insights_next_retry_at <= $1
                 ORDER BY insights_next_retry_at ASC
                 LIMIT $3
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {EXTRACTION_COLUMNS}"
        );

        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(stuck_horizon)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_row).collect())
    }

    async fn claim_insights_for_document(
        &self,
        org_id: Uuid,
        document_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<DocumentExtraction>> {
        let stuck_horizon = now + Duration::seconds(self.stuck_processing_secs);

        // The manual path ignores the retry schedule but still refuses a
        // row another worker holds.
        let sql = format!(
            "UPDATE document_extraction
             SET insights_status = 'processing',
                 insights_attempts = insights_attempts + 1,
                 insights_last_attempt_at = $1,
                 insights_next_retry_at = $2,
                 updated_at = $1
             WHERE id = (
                 SELECT id FROM document_extraction
                 WHERE organization_id = $3
                   AND document_id = $4
                   AND extraction_status = 'ready'
                   AND (insights_status <> 'processing'
                        OR insights_next_retry_at <= $1)
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {EXTRACTION_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(now)
            .bind(stuck_horizon)
            .bind(org_id)
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(Self::parse_row))
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
        let result = sqlx::query(
            "UPDATE document_extraction
             SET insights_status = 'ready',
                 summary = $2,
                 highlights = $3,
                 citations = $4,
                 retrieval_meta = $5,
                 case_context_hash = $6,
                 insights_source_text_hash = $7,
                 insights_error_code = NULL,
                 insights_error = NULL,
                 insights_warnings = $8,
                 updated_at = $9
             WHERE id = $1",
        )
        .bind(row_id)
        .bind(summary)
        .bind(serde_json::to_value(highlights)?)
        .bind(serde_json::to_value(citations)?)
        .bind(serde_json::to_value(retrieval_meta)?)
        .bind(case_context_hash)
        .bind(source_text_hash)
        .bind(serde_json::to_value(warnings)?)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("extraction row {row_id}")));
        }
        Ok(())
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
        let retry_at = self.retry_at(code, self.insights_retry_secs, now);
        let meta = retrieval_meta.map(serde_json::to_value).transpose()?;

        let result = sqlx::query(
            "UPDATE document_extraction
             SET insights_status = 'failed',
                 insights_error_code = $2,
                 insights_error = $3,
                 citations = $4,
                 retrieval_meta = $5,
                 insights_next_retry_at = $6,
                 updated_at = $7
             WHERE id = $1",
        )
        .bind(row_id)
        .bind(code.as_str())
        .bind(message)
        .bind(serde_json::to_value(citations)?)
        .bind(meta)
        .bind(retry_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("extraction row {row_id}")));
        }
        Ok(())
    }

    async fn reset_insights(&self, row_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE document_extraction
             SET insights_status = 'pending',
                 summary = NULL,
                 highlights = '[]',
                 citations = '[]',
                 retrieval_meta = NULL,
                 case_context_hash = NULL,
                 insights_source_text_hash = NULL,
                 insights_error_code = NULL,
                 insights_error = NULL,
                 insights_warnings = '[]',
                 insights_attempts = 0,
                 insights_next_retry_at = $2,
                 updated_at = $2
             WHERE id = $1",
        )
        .bind(row_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("extraction row {row_id}")));
        }
        Ok(())
    }

    async fn get_for_document(
        &self,
        org_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<DocumentExtraction>> {
        let sql = format!(
            "SELECT {EXTRACTION_COLUMNS}
             FROM document_extraction
             WHERE organization_id = $1 AND document_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(org_id)
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(Self::parse_row))
    }
}
