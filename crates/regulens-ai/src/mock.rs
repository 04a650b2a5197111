//! Scriptable document-AI double for deterministic tests.
//!
//! Produces deterministic embeddings derived from the input text and lets
//! tests script fetch/extract/insight outcomes per call. Call counters
//! expose how often each operation ran.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use regulens_core::{defaults, Error, Result};

use crate::client::{CaseInsights, DocAi, DocumentExtract, EmbedResponse, SourceFetch};

#[derive(Clone)]
pub struct MockDocAi {
    state: Arc<MockState>,
}

struct MockState {
    dimension: usize,
    fail_embed: AtomicBool,
    embed_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    extract_calls: AtomicUsize,
    insight_calls: AtomicUsize,
    fetch_script: Mutex<VecDeque<SourceFetch>>,
    extract_script: Mutex<VecDeque<DocumentExtract>>,
    insight_script: Mutex<VecDeque<std::result::Result<CaseInsights, String>>>,
}

impl Default for MockDocAi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDocAi {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                dimension: defaults::EMBED_DIMENSION,
                fail_embed: AtomicBool::new(false),
                embed_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
                extract_calls: AtomicUsize::new(0),
                insight_calls: AtomicUsize::new(0),
                fetch_script: Mutex::new(VecDeque::new()),
                extract_script: Mutex::new(VecDeque::new()),
                insight_script: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Fresh mock with a custom embedding dimension. Call before scripting.
    pub fn with_dimension(self, dimension: usize) -> Self {
        Self {
            state: Arc::new(MockState {
                dimension,
                fail_embed: AtomicBool::new(false),
                embed_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
                extract_calls: AtomicUsize::new(0),
                insight_calls: AtomicUsize::new(0),
                fetch_script: Mutex::new(VecDeque::new()),
                extract_script: Mutex::new(VecDeque::new()),
                insight_script: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Make every `embed` call fail until cleared.
    pub fn set_embed_failure(&self, fail: bool) {
        self.state.fail_embed.store(fail, Ordering::SeqCst);
    }

    /// Queue the outcome of the next `extract_regulation_content` call.
    pub fn script_fetch(&self, outcome: SourceFetch) {
        self.state.fetch_script.lock().unwrap().push_back(outcome);
    }

    /// Queue the outcome of the next `extract_document_content` call.
    pub fn script_extract(&self, outcome: DocumentExtract) {
        self.state.extract_script.lock().unwrap().push_back(outcome);
    }

    /// Queue the next insight outcome; `Err` holds the failure message.
    pub fn script_insights(&self, outcome: std::result::Result<CaseInsights, String>) {
        self.state.insight_script.lock().unwrap().push_back(outcome);
    }

    pub fn embed_calls(&self) -> usize {
        self.state.embed_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn extract_calls(&self) -> usize {
        self.state.extract_calls.load(Ordering::SeqCst)
    }

    pub fn insight_calls(&self) -> usize {
        self.state.insight_calls.load(Ordering::SeqCst)
    }

    /// Deterministic unit-length-ish vector seeded by the text bytes.
    fn embedding_for(&self, text: &str) -> Vec<f32> {
        let mut seed: u32 = 0x9e37_79b9;
        for b in text.bytes() {
            seed = seed.wrapping_mul(31).wrapping_add(b as u32);
        }
        (0..self.state.dimension)
            .map(|i| {
                seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223 + i as u32);
                ((seed >> 8) as f32 / (1 << 24) as f32) - 0.5
            })
            .collect()
    }
}

#[async_trait]
impl DocAi for MockDocAi {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse> {
        self.state.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_embed.load(Ordering::SeqCst) {
            return Err(Error::Embedding("mock embed failure".to_string()));
        }
        Ok(EmbedResponse {
            embeddings: texts.iter().map(|t| self.embedding_for(t)).collect(),
            dimension: self.state.dimension,
        })
    }

    async fn extract_regulation_content(
        &self,
        source_url: &str,
        _if_none_match: Option<&str>,
        _if_modified_since: Option<&str>,
    ) -> Result<SourceFetch> {
        self.state.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.state.fetch_script.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or(SourceFetch::Failed {
            error_code: Some("source_fetch_failed".to_string()),
            message: format!("no scripted fetch for {source_url}"),
        }))
    }

    async fn extract_document_content(
        &self,
        _bytes: Vec<u8>,
        file_name: &str,
        _content_type: Option<&str>,
        _max_chars: Option<usize>,
    ) -> Result<DocumentExtract> {
        self.state.extract_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.state.extract_script.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| DocumentExtract::Extracted {
            text: format!("extracted text of {file_name}"),
            text_hash: None,
            method: "mock".to_string(),
            warnings: Vec::new(),
        }))
    }

    async fn generate_case_insights(
        &self,
        _case_text: &str,
        _document_text: &str,
        _top_k: usize,
    ) -> Result<CaseInsights> {
        self.state.insight_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.state.insight_script.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(insights)) => Ok(insights),
            Some(Err(message)) => Err(Error::Extraction(message)),
            None => Ok(CaseInsights {
                summary: "Mock summary".to_string(),
                highlights: vec!["Mock highlight".to_string()],
                method: Some("mock".to_string()),
                warnings: Vec::new(),
            }),
        }
    }
}
