//! Structured logging schema and field name constants for arbor.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized field names across
//! every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (batch keys, rows) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "cms"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "batch_cache", "category_repo", "signature_gate", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "create", "update", "archive", "dispatch_batch"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Article UUID being operated on.
pub const ARTICLE_ID: &str = "article_id";

/// Article version number.
pub const VERSION: &str = "version";

/// Category UUID being operated on.
pub const CATEGORY_ID: &str = "category_id";

/// Signature level UUID referenced by a filter or gate decision.
pub const SIGNATURE_LEVEL_ID: &str = "signature_level_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of keys dispatched in one batch window.
pub const BATCH_SIZE: &str = "batch_size";

/// Number of rows returned by a query.
pub const RESULT_COUNT: &str = "result_count";
