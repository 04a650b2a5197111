//! # regulens-core
//!
//! Core types, traits, and abstractions for the regulens pipeline.
//!
//! This crate provides the foundational data structures and trait
//! definitions that the database, AI-client, and job-runner crates depend
//! on.

pub mod chunking;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod text;
pub mod traits;

// Re-export commonly used types at crate root
pub use chunking::{split_text, SplitterConfig, TextChunk};
pub use error::{Error, Result};
pub use models::*;
pub use text::{
    content_hash, content_hash_raw, detect_language_tag, estimate_tokens, file_hash,
    normalize_whitespace,
};
pub use traits::*;

/// Re-export of the pgvector vector type used across crate boundaries.
pub use pgvector::Vector;
