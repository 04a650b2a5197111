//! HTTP client for the document-AI service.
//!
//! The service does the heavy lifting (fetching sources, file parsing,
//! embedding, summarization); this client maps its JSON contract onto
//! closed outcome enums so callers never branch on raw status strings.

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use regulens_core::{defaults, Error, Result};

/// Default document-AI service endpoint.
pub const DEFAULT_AI_URL: &str = "http://localhost:8089";

/// Outcome of a conditional source fetch.
#[derive(Debug, Clone)]
pub enum SourceFetch {
    /// Validators matched; the remote sent no body.
    NotModified,
    /// Content was fetched and extracted.
    Fetched {
        extracted_text: String,
        normalized_text_hash: Option<String>,
        etag: Option<String>,
        last_modified: Option<String>,
        raw_html: Option<String>,
        warnings: Vec<String>,
    },
    /// The service reported a fetch or extraction failure.
    Failed {
        error_code: Option<String>,
        message: String,
    },
}

/// Outcome of extracting text from an uploaded file.
#[derive(Debug, Clone)]
pub enum DocumentExtract {
    Extracted {
        text: String,
        text_hash: Option<String>,
        method: String,
        warnings: Vec<String>,
    },
    /// The file type cannot be extracted; callers must not retry.
    Unsupported { message: String },
    Failed {
        error_code: Option<String>,
        message: String,
    },
}

/// Batch embedding result.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub dimension: usize,
}

/// Generated insight payload for one document in its case context.
#[derive(Debug, Clone)]
pub struct CaseInsights {
    pub summary: String,
    pub highlights: Vec<String>,
    pub method: Option<String>,
    pub warnings: Vec<String>,
}

/// The document-AI operations the pipeline consumes.
#[async_trait]
pub trait DocAi: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse>;

    async fn extract_regulation_content(
        &self,
        source_url: &str,
        if_none_match: Option<&str>,
        if_modified_since: Option<&str>,
    ) -> Result<SourceFetch>;

    async fn extract_document_content(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        content_type: Option<&str>,
        max_chars: Option<usize>,
    ) -> Result<DocumentExtract>;

    async fn generate_case_insights(
        &self,
        case_text: &str,
        document_text: &str,
        top_k: usize,
    ) -> Result<CaseInsights>;
}

/// Client configuration, environment-driven in deployments.
#[derive(Debug, Clone)]
pub struct DocAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DocAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_AI_URL.to_string(),
            api_key: None,
            timeout_secs: defaults::AI_CALL_TIMEOUT_SECS,
        }
    }
}

impl DocAiConfig {
    /// Read `REGULENS_AI_URL`, `REGULENS_AI_API_KEY`, and
    /// `REGULENS_AI_TIMEOUT_SECS`, falling back to defaults.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("REGULENS_AI_URL").unwrap_or_else(|_| DEFAULT_AI_URL.to_string());
        let api_key = std::env::var("REGULENS_AI_API_KEY").ok().filter(|k| !k.is_empty());
        let timeout_secs = std::env::var("REGULENS_AI_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::AI_CALL_TIMEOUT_SECS);

        Self {
            base_url,
            api_key,
            timeout_secs,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

pub struct DocAiClient {
    client: Client,
    config: DocAiConfig,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Serialize)]
struct RegulationRequest<'a> {
    source_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    if_none_match: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    if_modified_since: Option<&'a str>,
}

#[derive(Serialize)]
struct InsightsRequest<'a> {
    case_text: &'a str,
    document_text: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct RegulationResponse {
    status: String,
    extracted_text: Option<String>,
    normalized_text_hash: Option<String>,
    etag: Option<String>,
    last_modified: Option<String>,
    raw_html: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
    error_code: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct DocumentResponse {
    status: String,
    extracted_text: Option<String>,
    normalized_text_hash: Option<String>,
    extraction_method: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
    error_code: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct InsightsResponse {
    status: String,
    summary: Option<String>,
    #[serde(default)]
    highlights: Vec<String>,
    method: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
    error_code: Option<String>,
    error: Option<String>,
}

const UNSUPPORTED_CODE: &str = "unsupported_file_type";

impl DocAiClient {
    pub fn new(config: DocAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;

        info!(
            subsystem = "ai",
            base_url = %config.base_url,
            timeout_secs = config.timeout_secs,
            "Initialized document-AI client"
        );
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(DocAiConfig::from_env())
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}{}", self.config.base_url, path))
            .timeout(Duration::from_secs(self.config.timeout_secs));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Request(format!("AI service returned {status}: {body}")))
    }
}

#[async_trait]
impl DocAi for DocAiClient {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse> {
        let start = Instant::now();
        let response = self
            .request("/embed")
            .json(&EmbedRequest { texts })
            .send()
            .await?;
        let parsed: EmbedResponse = Self::check_status(response).await?.json().await?;

        if parsed.embeddings.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }

        debug!(
            subsystem = "ai",
            op = "embed",
            batch = texts.len(),
            dimension = parsed.dimension,
            duration_ms = start.elapsed().as_millis() as u64,
            "Embedded batch"
        );
        Ok(parsed)
    }

    async fn extract_regulation_content(
        &self,
        source_url: &str,
        if_none_match: Option<&str>,
        if_modified_since: Option<&str>,
    ) -> Result<SourceFetch> {
        let response = self
            .request("/extract/regulation")
            .json(&RegulationRequest {
                source_url,
                if_none_match,
                if_modified_since,
            })
            .send()
            .await?;
        let parsed: RegulationResponse = Self::check_status(response).await?.json().await?;

        match parsed.status.as_str() {
            "not_modified" => Ok(SourceFetch::NotModified),
            "ok" => Ok(SourceFetch::Fetched {
                extracted_text: parsed.extracted_text.unwrap_or_default(),
                normalized_text_hash: parsed.normalized_text_hash,
                etag: parsed.etag,
                last_modified: parsed.last_modified,
                raw_html: parsed.raw_html,
                warnings: parsed.warnings,
            }),
            other => Ok(SourceFetch::Failed {
                error_code: parsed.error_code,
                message: parsed
                    .error
                    .unwrap_or_else(|| format!("service status {other}")),
            }),
        }
    }

    async fn extract_document_content(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        content_type: Option<&str>,
        max_chars: Option<usize>,
    ) -> Result<DocumentExtract> {
        let mut part = multipart::Part::bytes(bytes).file_name(file_name.to_string());
        if let Some(ct) = content_type {
            part = part
                .mime_str(ct)
                .map_err(|e| Error::InvalidInput(format!("content type {ct:?}: {e}")))?;
        }
        let mut form = multipart::Form::new().part("file", part);
        if let Some(max) = max_chars {
            form = form.text("max_chars", max.to_string());
        }

        let response = self
            .request("/extract/document")
            .multipart(form)
            .send()
            .await?;
        let parsed: DocumentResponse = Self::check_status(response).await?.json().await?;

        match parsed.status.as_str() {
            "ok" => Ok(DocumentExtract::Extracted {
                text: parsed.extracted_text.unwrap_or_default(),
                text_hash: parsed.normalized_text_hash,
                method: parsed
                    .extraction_method
                    .unwrap_or_else(|| "unknown".to_string()),
                warnings: parsed.warnings,
            }),
            _ if parsed.error_code.as_deref() == Some(UNSUPPORTED_CODE) => {
                Ok(DocumentExtract::Unsupported {
                    message: parsed
                        .error
                        .unwrap_or_else(|| "unsupported file type".to_string()),
                })
            }
            other => Ok(DocumentExtract::Failed {
                error_code: parsed.error_code,
                message: parsed
                    .error
                    .unwrap_or_else(|| format!("service status {other}")),
            }),
        }
    }

    async fn generate_case_insights(
        &self,
        case_text: &str,
        document_text: &str,
        top_k: usize,
    ) -> Result<CaseInsights> {
        let response = self
            .request("/insights/case")
            .json(&InsightsRequest {
                case_text,
                document_text,
                top_k,
            })
            .send()
            .await?;
        let parsed: InsightsResponse = Self::check_status(response).await?.json().await?;

        if parsed.status != "ok" {
            let code = parsed.error_code.unwrap_or_default();
            return Err(Error::Extraction(format!(
                "insight generation failed ({code}): {}",
                parsed.error.unwrap_or_default()
            )));
        }

        Ok(CaseInsights {
            summary: parsed.summary.unwrap_or_default(),
            highlights: parsed.highlights,
            method: parsed.method,
            warnings: parsed.warnings,
        })
    }
}
