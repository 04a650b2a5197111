//! Conditional-fetch change detection for regulation sources.
//!
//! Validators (ETag / Last-Modified) ride on the AI service's regulation
//! extraction call. When the remote ignores them and sends full content
//! anyway, the detector falls back to comparing normalized-content hashes
//! against the prior fingerprint. It never answers "changed" blindly, and
//! it mutates no local state; callers persist outcomes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use regulens_ai::{DocAi, SourceFetch};
use regulens_core::{content_hash, defaults, normalize_whitespace, ErrorCode};

/// What a single source check concluded.
#[derive(Debug, Clone)]
pub enum ChangeOutcome {
    /// Content matches the prior fingerprint (validator hit or hash match).
    Unchanged {
        etag: Option<String>,
        last_modified: Option<String>,
    },
    /// New content; `hash` fingerprints the normalized text.
    Changed {
        text: String,
        hash: String,
        raw: Option<String>,
        etag: Option<String>,
        last_modified: Option<String>,
        warnings: Vec<String>,
    },
    /// The check failed; only the retry timer may be advanced.
    Error { code: ErrorCode, message: String },
}

pub struct ChangeDetector {
    ai: Arc<dyn DocAi>,
    call_timeout: Duration,
}

impl ChangeDetector {
    pub fn new(ai: Arc<dyn DocAi>) -> Self {
        Self {
            ai,
            call_timeout: Duration::from_secs(defaults::AI_CALL_TIMEOUT_SECS),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub async fn check(
        &self,
        source_url: &str,
        prior_etag: Option<&str>,
        prior_last_modified: Option<&str>,
        prior_hash: Option<&str>,
    ) -> ChangeOutcome {
        let fetch = match tokio::time::timeout(
            self.call_timeout,
            self.ai
                .extract_regulation_content(source_url, prior_etag, prior_last_modified),
        )
        .await
        {
            Ok(Ok(fetch)) => fetch,
            Ok(Err(e)) => {
                return ChangeOutcome::Error {
                    code: ErrorCode::SourceFetchFailed,
                    message: e.to_string(),
                }
            }
            Err(_) => {
                return ChangeOutcome::Error {
                    code: ErrorCode::SourceFetchFailed,
                    message: format!("fetch timed out after {:?}", self.call_timeout),
                }
            }
        };

        match fetch {
            SourceFetch::NotModified => {
                debug!(
                    subsystem = "jobs",
                    component = "change_detect",
                    source_url,
                    "Validators matched"
                );
                ChangeOutcome::Unchanged {
                    etag: prior_etag.map(str::to_string),
                    last_modified: prior_last_modified.map(str::to_string),
                }
            }
            SourceFetch::Fetched {
                extracted_text,
                normalized_text_hash,
                etag,
                last_modified,
                raw_html,
                warnings,
            } => {
                let normalized = normalize_whitespace(&extracted_text);
                if normalized.is_empty() {
                    return ChangeOutcome::Error {
                        code: ErrorCode::EmptyContent,
                        message: format!("source {source_url} produced empty text"),
                    };
                }

                // Trust the service's hash only if it matches what we would
                // compute; a disagreement means the normalization differs.
                let hash = content_hash(&extracted_text);
                if let Some(remote_hash) = &normalized_text_hash {
                    if *remote_hash != hash {
                        warn!(
                            subsystem = "jobs",
                            component = "change_detect",
                            source_url,
                            "Service hash disagrees with local hash, using local"
                        );
                    }
                }

                if prior_hash == Some(hash.as_str()) {
                    debug!(
                        subsystem = "jobs",
                        component = "change_detect",
                        source_url,
                        "Full content returned but hash unchanged"
                    );
                    return ChangeOutcome::Unchanged {
                        etag,
                        last_modified,
                    };
                }

                ChangeOutcome::Changed {
                    text: normalized,
                    hash,
                    raw: raw_html,
                    etag,
                    last_modified,
                    warnings,
                }
            }
            SourceFetch::Failed {
                error_code,
                message,
            } => ChangeOutcome::Error {
                code: ErrorCode::SourceFetchFailed,
                message: match error_code {
                    Some(code) => format!("{code}: {message}"),
                    None => message,
                },
            },
        }
    }
}
