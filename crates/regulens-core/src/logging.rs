//! Structured logging schema and field name constants for regulens.
//!
//! All crates use these constants for consistent structured logging fields
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), cycle completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (chunks, hits) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "ai", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "monitor", "extraction", "insights", "chunk_indexer", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "run_due", "reindex", "check_source", "claim_due"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Organization UUID scoping the operation.
pub const ORG_ID: &str = "org_id";

/// Document UUID being operated on.
pub const DOCUMENT_ID: &str = "document_id";

/// Regulation UUID being operated on.
pub const REGULATION_ID: &str = "regulation_id";

/// Monitor run UUID.
pub const RUN_ID: &str = "run_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks processed (splitting, embedding, reindex).
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of subscription groups scanned by a monitor cycle.
pub const GROUP_COUNT: &str = "group_count";

/// Number of items claimed by a runner cycle.
pub const CLAIMED_COUNT: &str = "claimed_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Terminal status of an item or run ("ready", "failed", "skipped"...).
pub const STATUS: &str = "status";

/// Machine-readable error code on failure paths.
pub const ERROR_CODE: &str = "error_code";
