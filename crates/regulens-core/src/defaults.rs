//! Centralized default constants for the regulens pipeline.
//!
//! **This module is the single source of truth** for all shared default
//! values. Runners and repositories reference these constants instead of
//! defining their own magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// CHUNKING
// =============================================================================

/// Target characters per chunk for text splitting.
pub const CHUNK_TARGET_CHARS: usize = 1000;

/// Overlap characters between adjacent chunks for context continuity.
pub const CHUNK_OVERLAP_CHARS: usize = 100;

/// A chunk boundary may back off to preceding whitespace as long as the
/// chunk keeps at least this fraction of the target length.
pub const CHUNK_MIN_FRACTION: f64 = 0.6;

/// Hard ceiling on chunks per document (guards pathological inputs).
pub const CHUNK_MAX_COUNT: usize = 500;

// =============================================================================
// EMBEDDING & RETRIEVAL
// =============================================================================

/// Expected embedding vector dimension.
pub const EMBED_DIMENSION: usize = 768;

/// Default top-K chunks returned by similarity retrieval.
pub const RETRIEVAL_TOP_K: usize = 6;

/// Maximum characters of context assembled for insight generation.
pub const MAX_CONTEXT_CHARS: usize = 8_000;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Rows claimed per extraction/insight cycle.
pub const JOB_BATCH_LIMIT: i64 = 20;

/// Concurrent items processed inside one batch.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Delay before a failed extraction attempt becomes due again (seconds).
pub const EXTRACTION_RETRY_DELAY_SECS: i64 = 300;

/// Delay before a failed insight attempt becomes due again (seconds).
pub const INSIGHTS_RETRY_DELAY_SECS: i64 = 600;

/// A `processing` row older than this is considered stuck and reclaimable
/// (covers a crash between claim and finalize).
pub const STUCK_PROCESSING_SECS: i64 = 1_800;

/// Timeout for a single outbound AI call (seconds).
pub const AI_CALL_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// REGULATION MONITOR
// =============================================================================

/// Default per-subscription check interval (seconds).
pub const SUBSCRIPTION_CHECK_INTERVAL_SECS: i64 = 86_400;

/// Reschedule delay after a failed source check (seconds).
pub const MONITOR_FAILURE_RETRY_SECS: i64 = 3_600;

/// Concurrent source groups fetched inside one monitor batch.
pub const MONITOR_MAX_CONCURRENT: usize = 4;

/// Advisory-lock key for the deployment-wide monitor single-flight.
pub const MONITOR_LOCK_KEY: i64 = 0x5245_474d_4f4e; // "REGMON"

// =============================================================================
// SCHEDULER
// =============================================================================

/// Poll interval between extraction cycles (seconds).
pub const EXTRACTION_POLL_INTERVAL_SECS: u64 = 30;

/// Poll interval between insight cycles (seconds).
pub const INSIGHTS_POLL_INTERVAL_SECS: u64 = 60;

/// Poll interval between monitor cycles (seconds).
pub const MONITOR_POLL_INTERVAL_SECS: u64 = 900;
