//! # regulens-ai
//!
//! HTTP client for the document-AI service consumed by the pipeline:
//! batch embeddings, conditional regulation fetches, file text extraction,
//! and case insight generation. `mock` provides a scriptable double for
//! tests in downstream crates.

pub mod client;
pub mod mock;

pub use client::{
    CaseInsights, DocAi, DocAiClient, DocAiConfig, DocumentExtract, EmbedResponse, SourceFetch,
    DEFAULT_AI_URL,
};
pub use mock::MockDocAi;
