//! Case insight generation runner.
//!
//! Runs on top of ready extractions: assembles the case context, retrieves
//! the most relevant chunks for it, and asks the AI service for a summary
//! with highlights. Retrieval failures degrade to a raw-text prefix rather
//! than blocking the insight; only the summarization call itself can fail
//! the row.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{error, info, warn};
use uuid::Uuid;

use regulens_ai::DocAi;
use regulens_core::{
    content_hash, defaults, CaseRepository, DocumentExtraction, ErrorCode, ExtractionRepository,
    InsightsStatus, Result, RetrievalMeta, RunOutcome,
};

use crate::retrieval::{truncate_at_boundary, ChunkIndexer};

#[derive(Debug, Clone)]
pub struct InsightConfig {
    pub batch_limit: i64,
    pub max_concurrent: usize,
    pub call_timeout: Duration,
    pub top_k: usize,
    pub max_context_chars: usize,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            batch_limit: defaults::JOB_BATCH_LIMIT,
            max_concurrent: defaults::JOB_MAX_CONCURRENT,
            call_timeout: Duration::from_secs(defaults::AI_CALL_TIMEOUT_SECS),
            top_k: defaults::RETRIEVAL_TOP_K,
            max_context_chars: defaults::MAX_CONTEXT_CHARS,
        }
    }
}

impl InsightConfig {
    /// Read `INSIGHTS_BATCH_LIMIT`, `INSIGHTS_MAX_CONCURRENT`,
    /// `INSIGHTS_TIMEOUT_SECS`, and `INSIGHTS_TOP_K`, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_limit: std::env::var("INSIGHTS_BATCH_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.batch_limit),
            max_concurrent: std::env::var("INSIGHTS_MAX_CONCURRENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_concurrent)
                .max(1),
            call_timeout: std::env::var("INSIGHTS_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
            top_k: std::env::var("INSIGHTS_TOP_K")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.top_k)
                .max(1),
            max_context_chars: defaults.max_context_chars,
        }
    }

    pub fn with_batch_limit(mut self, limit: i64) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k.max(1);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

pub struct InsightRunner {
    extractions: Arc<dyn ExtractionRepository>,
    cases: Arc<dyn CaseRepository>,
    ai: Arc<dyn DocAi>,
    indexer: Arc<ChunkIndexer>,
    config: InsightConfig,
}

impl InsightRunner {
    pub fn new(
        extractions: Arc<dyn ExtractionRepository>,
        cases: Arc<dyn CaseRepository>,
        ai: Arc<dyn DocAi>,
        indexer: Arc<ChunkIndexer>,
        config: InsightConfig,
    ) -> Self {
        Self {
            extractions,
            cases,
            ai,
            indexer,
            config,
        }
    }

    /// Claim and process all currently due insight rows.
    pub async fn run_due(&self) -> Result<RunOutcome> {
        let now = Utc::now();
        let claimed = self
            .extractions
            .claim_due_insights(self.config.batch_limit, now)
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
            component = "insights",
            op = "run_due",
            claimed_count = claimed.len(),
            "Processing insight batch"
        );

        for batch in claimed.chunks(self.config.max_concurrent) {
            let results = join_all(batch.iter().map(|row| self.process_row(row))).await;
            for (row, result) in batch.iter().zip(results) {
                match result {
                    Ok(true) => outcome.ready += 1,
                    Ok(false) => outcome.failed += 1,
                    Err(e) => {
                        outcome.failed += 1;
                        error!(
                            subsystem = "jobs",
                            component = "insights",
                            document_id = %row.document_id,
                            "Insight item errored: {e}"
                        );
                    }
                }
            }
        }

        info!(
            subsystem = "jobs",
            component = "insights",
            op = "run_due",
            claimed_count = outcome.claimed,
            ready = outcome.ready,
            failed = outcome.failed,
            "Insight batch finished"
        );
        Ok(outcome)
    }

    /// Synchronous path for interactive use: claim this one document if it
    /// is eligible, process it, and return the refreshed row. A `Ready` row
    /// whose stored case-context hash still matches the owning case is
    /// returned as-is; a stale one is reset to pending and regenerated in
    /// the same call. `None` when nothing was claimable (no row, extraction
    /// not ready, or another worker holds it).
    pub async fn generate_now(
        &self,
        org_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<DocumentExtraction>> {
        let now = Utc::now();
        if let Some(existing) = self.extractions.get_for_document(org_id, document_id).await? {
            if existing.insights_status == InsightsStatus::Ready {
                if self.context_is_current(&existing).await? {
                    return Ok(Some(existing));
                }
                info!(
                    subsystem = "jobs",
                    component = "insights",
                    op = "generate_now",
                    document_id = %document_id,
                    "Case context changed, resetting insights"
                );
                self.extractions.reset_insights(existing.id, now).await?;
            }
        }

        let Some(row) = self
            .extractions
            .claim_insights_for_document(org_id, document_id, now)
            .await?
        else {
            return Ok(None);
        };

        self.process_row(&row).await?;
        self.extractions.get_for_document(org_id, document_id).await
    }

    /// Whether a `Ready` row's stored case-context hash still matches the
    /// owning case. A missing case counts as stale so the regular failure
    /// path gets to record it.
    async fn context_is_current(&self, row: &DocumentExtraction) -> Result<bool> {
        let Some(case) = self.cases.get_context(row.organization_id, row.case_id).await? else {
            return Ok(false);
        };
        let fresh = content_hash(&case.as_text());
        Ok(row.case_context_hash.as_deref() == Some(fresh.as_str()))
    }

    /// Returns whether the row reached `ready`. Recoverable failures are
    /// recorded on the row, so only repository errors bubble up.
    async fn process_row(&self, row: &DocumentExtraction) -> Result<bool> {
        let now = Utc::now();

        let Some(case) = self.cases.get_context(row.organization_id, row.case_id).await? else {
            warn!(
                subsystem = "jobs",
                component = "insights",
                document_id = %row.document_id,
                case_id = %row.case_id,
                "Owning case not found"
            );
            self.extractions
                .mark_insights_failed(
                    row.id,
                    ErrorCode::CaseMissing,
                    &format!("case {} not found", row.case_id),
                    &[],
                    None,
                    now,
                )
                .await?;
            return Ok(false);
        };
        let case_text = case.as_text();
        let case_context_hash = content_hash(&case_text);

        let text = row
            .extracted_text
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        if text.is_empty() {
            // Never reach the AI service for a textless row.
            self.extractions
                .mark_insights_failed(
                    row.id,
                    ErrorCode::ExtractedTextMissing,
                    "extraction holds no text to summarize",
                    &[],
                    None,
                    now,
                )
                .await?;
            return Ok(false);
        }
        let source_text_hash = row
            .extracted_text_hash
            .clone()
            .unwrap_or_else(|| content_hash(text));

        let retrieved = self
            .indexer
            .retrieve_context(
                row.organization_id,
                Some(row.document_id),
                &case_text,
                self.config.top_k,
            )
            .await?;

        let mut warnings = retrieved.warnings;
        let (context, citations, meta) = if retrieved.context.is_empty() {
            // Degraded retrieval: prompt on the document prefix instead.
            let mut prefix = text.to_string();
            truncate_at_boundary(&mut prefix, self.config.max_context_chars);
            warnings.push("retrieval unavailable, used document prefix".to_string());
            let meta = RetrievalMeta {
                strategy: "fallback_prefix".to_string(),
                top_k: self.config.top_k as i32,
                chunks_considered: 0,
                context_chars: prefix.len() as i32,
            };
            (prefix, Vec::new(), meta)
        } else {
            (retrieved.context, retrieved.citations, retrieved.meta)
        };

        let insights = match tokio::time::timeout(
            self.config.call_timeout,
            self.ai
                .generate_case_insights(&case_text, &context, self.config.top_k),
        )
        .await
        {
            Ok(Ok(insights)) => insights,
            Ok(Err(e)) => {
                self.extractions
                    .mark_insights_failed(
                        row.id,
                        ErrorCode::InsightGenerationFailed,
                        &e.to_string(),
                        &citations,
                        Some(&meta),
                        Utc::now(),
                    )
                    .await?;
                return Ok(false);
            }
            Err(_) => {
                self.extractions
                    .mark_insights_failed(
                        row.id,
                        ErrorCode::InsightGenerationFailed,
                        &format!("insight call timed out after {:?}", self.config.call_timeout),
                        &citations,
                        Some(&meta),
                        Utc::now(),
                    )
                    .await?;
                return Ok(false);
            }
        };

        warnings.extend(insights.warnings);
        self.extractions
            .mark_insights_ready(
                row.id,
                &insights.summary,
                &insights.highlights,
                &citations,
                &meta,
                &case_context_hash,
                &source_text_hash,
                &warnings,
                Utc::now(),
            )
            .await?;
        Ok(true)
    }
}
