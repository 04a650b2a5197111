//! Document text extraction runner.
//!
//! Claims due rows in one atomic statement, processes them in fixed-size
//! concurrent batches, and records every outcome on the row. A per-item
//! failure never escapes the batch loop; the row carries the error and the
//! retry schedule decides what happens next.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use regulens_ai::{DocAi, DocumentExtract};
use regulens_core::{
    content_hash, defaults, BlobStorage, ClaimedExtraction, Error, ErrorCode,
    ExtractionRepository, Result, RunOutcome,
};

use crate::retrieval::ChunkIndexer;

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub batch_limit: i64,
    pub max_concurrent: usize,
    pub call_timeout: Duration,
    pub max_text_chars: Option<usize>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_limit: defaults::JOB_BATCH_LIMIT,
            max_concurrent: defaults::JOB_MAX_CONCURRENT,
            call_timeout: Duration::from_secs(defaults::AI_CALL_TIMEOUT_SECS),
            max_text_chars: None,
        }
    }
}

impl ExtractionConfig {
    /// Read `EXTRACTION_BATCH_LIMIT`, `EXTRACTION_MAX_CONCURRENT`, and
    /// `EXTRACTION_TIMEOUT_SECS`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_limit: std::env::var("EXTRACTION_BATCH_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.batch_limit),
            max_concurrent: std::env::var("EXTRACTION_MAX_CONCURRENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_concurrent)
                .max(1),
            call_timeout: std::env::var("EXTRACTION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
            max_text_chars: defaults.max_text_chars,
        }
    }

    pub fn with_batch_limit(mut self, limit: i64) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

enum ItemOutcome {
    Ready,
    Failed,
    Unsupported,
}

pub struct ExtractionRunner {
    extractions: Arc<dyn ExtractionRepository>,
    blobs: Arc<dyn BlobStorage>,
    ai: Arc<dyn DocAi>,
    indexer: Arc<ChunkIndexer>,
    config: ExtractionConfig,
}

impl ExtractionRunner {
    pub fn new(
        extractions: Arc<dyn ExtractionRepository>,
        blobs: Arc<dyn BlobStorage>,
        ai: Arc<dyn DocAi>,
        indexer: Arc<ChunkIndexer>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            extractions,
            blobs,
            ai,
            indexer,
            config,
        }
    }

    /// Queue (or re-queue) a document for extraction. Returns whether a
    /// row was actually queued.
    pub async fn queue_document(
        &self,
        org_id: uuid::Uuid,
        document_id: uuid::Uuid,
        case_id: uuid::Uuid,
        file_hash: &str,
        storage_path: &str,
    ) -> Result<bool> {
        let queued = self
            .extractions
            .queue(org_id, document_id, case_id, file_hash, storage_path)
            .await?;
        if queued {
            info!(
                subsystem = "jobs",
                component = "extraction",
                op = "queue",
                document_id = %document_id,
                "Queued document extraction"
            );
        } else {
            debug!(
                subsystem = "jobs",
                component = "extraction",
                op = "queue",
                document_id = %document_id,
                "Extraction already ready for identical bytes, skipping"
            );
        }
        Ok(queued)
    }

    /// Claim and process all currently due extraction rows.
    pub async fn run_due(&self) -> Result<RunOutcome> {
        let now = Utc::now();
        let claimed = self
            .extractions
            .claim_due_extractions(self.config.batch_limit, now)
            .await?;

        let mut outcome = RunOutcome {
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            return Ok(outcome);
        }

        info!(
            subsystem = "jobs",
            component = "extraction",
            op = "run_due",
            claimed_count = claimed.len(),
            "Processing extraction batch"
        );

        // Fixed-size concurrent batches: run one batch to completion before
        // claiming attention for the next.
        for batch in claimed.chunks(self.config.max_concurrent) {
            let results = join_all(batch.iter().map(|item| self.process_item(item))).await;
            for (item, result) in batch.iter().zip(results) {
                match result {
                    Ok(ItemOutcome::Ready) => outcome.ready += 1,
                    Ok(ItemOutcome::Unsupported) => outcome.unsupported += 1,
                    Ok(ItemOutcome::Failed) => outcome.failed += 1,
                    Err(e) => {
                        // The catch-all: even recording the failure failed.
                        outcome.failed += 1;
                        error!(
                            subsystem = "jobs",
                            component = "extraction",
                            document_id = %item.document_id,
                            "Extraction item errored: {e}"
                        );
                    }
                }
            }
        }

        info!(
            subsystem = "jobs",
            component = "extraction",
            op = "run_due",
            claimed_count = outcome.claimed,
            ready = outcome.ready,
            failed = outcome.failed,
            unsupported = outcome.unsupported,
            "Extraction batch finished"
        );
        Ok(outcome)
    }

    async fn process_item(&self, item: &ClaimedExtraction) -> Result<ItemOutcome> {
        let now = Utc::now();

        let bytes = match self.blobs.read(&item.storage_path).await {
            Ok(bytes) => bytes,
            Err(Error::NotFound(_)) => {
                // Missing bytes will not appear on retry; park the row.
                warn!(
                    subsystem = "jobs",
                    component = "extraction",
                    document_id = %item.document_id,
                    storage_path = %item.storage_path,
                    "Stored file missing"
                );
                self.extractions
                    .mark_extraction_failed(
                        item.row_id,
                        ErrorCode::FileMissing,
                        &format!("no bytes at {}", item.storage_path),
                        now,
                    )
                    .await?;
                return Ok(ItemOutcome::Failed);
            }
            Err(e) => {
                self.extractions
                    .mark_extraction_failed(
                        item.row_id,
                        ErrorCode::ExtractionFailed,
                        &format!("blob read: {e}"),
                        now,
                    )
                    .await?;
                return Ok(ItemOutcome::Failed);
            }
        };

        let extract = match tokio::time::timeout(
            self.config.call_timeout,
            self.ai.extract_document_content(
                bytes,
                &item.file_name,
                item.content_type.as_deref(),
                self.config.max_text_chars,
            ),
        )
        .await
        {
            Ok(Ok(extract)) => extract,
            Ok(Err(e)) => {
                self.extractions
                    .mark_extraction_failed(
                        item.row_id,
                        ErrorCode::ExtractionFailed,
                        &e.to_string(),
                        now,
                    )
                    .await?;
                return Ok(ItemOutcome::Failed);
            }
            Err(_) => {
                self.extractions
                    .mark_extraction_failed(
                        item.row_id,
                        ErrorCode::ExtractionFailed,
                        &format!("extraction timed out after {:?}", self.config.call_timeout),
                        now,
                    )
                    .await?;
                return Ok(ItemOutcome::Failed);
            }
        };

        match extract {
            DocumentExtract::Extracted {
                text,
                method,
                mut warnings,
                ..
            } => {
                let normalized = regulens_core::normalize_whitespace(&text);
                if normalized.is_empty() {
                    self.extractions
                        .mark_extraction_failed(
                            item.row_id,
                            ErrorCode::EmptyContent,
                            "extraction produced empty text",
                            now,
                        )
                        .await?;
                    return Ok(ItemOutcome::Failed);
                }
                let text_hash = content_hash(&normalized);

                // Reindex warnings degrade, they never fail the extraction.
                match self
                    .indexer
                    .reindex_document(item.organization_id, item.document_id, &normalized)
                    .await
                {
                    Ok(report) => warnings.extend(report.warnings),
                    Err(e) => {
                        warn!(
                            subsystem = "jobs",
                            component = "extraction",
                            document_id = %item.document_id,
                            "Chunk reindex failed: {e}"
                        );
                        warnings.push(format!("chunk reindex failed: {e}"));
                    }
                }

                self.extractions
                    .mark_extraction_ready(
                        item.row_id,
                        &normalized,
                        &text_hash,
                        &method,
                        &warnings,
                        Utc::now(),
                    )
                    .await?;
                Ok(ItemOutcome::Ready)
            }
            DocumentExtract::Unsupported { message } => {
                self.extractions
                    .mark_extraction_unsupported(item.row_id, &message, now)
                    .await?;
                Ok(ItemOutcome::Unsupported)
            }
            DocumentExtract::Failed {
                error_code,
                message,
            } => {
                let message = match error_code {
                    Some(code) => format!("{code}: {message}"),
                    None => message,
                };
                self.extractions
                    .mark_extraction_failed(item.row_id, ErrorCode::ExtractionFailed, &message, now)
                    .await?;
                Ok(ItemOutcome::Failed)
            }
        }
    }
}
