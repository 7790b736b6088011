//! Centralized default constants for quill.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// PIPELINE
// =============================================================================

/// Worker tasks per stage.
pub const PIPELINE_CONCURRENCY: usize = 10;

/// Capacity of each stage queue. A full queue blocks submitters.
pub const PIPELINE_QUEUE_CAPACITY: usize = 100_000;

/// Attempts beyond this retry count are no longer picked up by the flusher.
pub const PIPELINE_MAX_RETRIES: i32 = 3;

// =============================================================================
// RECOVERY FLUSHER
// =============================================================================

/// Interval between flusher scans, in seconds.
pub const FLUSH_INTERVAL_SECS: u64 = 60;

/// Items fetched per flusher scan.
pub const FLUSH_PAGE_SIZE: i64 = 20;

/// Deadline for the flusher's store query, in seconds.
pub const FLUSH_SCAN_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// STAGE DEADLINES
// =============================================================================

/// Deadline for the provider chunk/summarize call, in seconds.
pub const SUMMARIZE_TIMEOUT_SECS: u64 = 300;

/// Deadline for loading chunks plus the provider embedding call, in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 300;

/// Deadline for reloading an item before an attempt, in seconds.
pub const ITEM_LOAD_TIMEOUT_SECS: u64 = 10;

/// Deadline for the transactional stage transition, in seconds.
pub const TRANSITION_TIMEOUT_SECS: u64 = 60;

/// Deadline for retry bookkeeping after a failed attempt, in seconds.
pub const RETRY_BOOKKEEPING_TIMEOUT_SECS: u64 = 10;

/// Deadline for publishing a stage-changed notification, in seconds.
pub const NOTIFY_TIMEOUT_SECS: u64 = 5;

/// Deadline for writing a token usage record, in seconds.
pub const USAGE_RECORD_TIMEOUT_SECS: u64 = 5;

/// How long the ingestion facade waits on each stage in sync mode, in seconds.
pub const INGEST_STAGE_WAIT_SECS: u64 = 120;

/// Grace period for worker tasks to drain on shutdown, in seconds.
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

// =============================================================================
// KNOWLEDGE
// =============================================================================

/// Resource assigned to items created without one.
pub const DEFAULT_RESOURCE: &str = "knowledge";

/// Format of the approximate event date stored on items.
pub const MAYBE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Topic prefix for stage notifications; the space id is appended.
pub const STAGE_TOPIC_PREFIX: &str = "/knowledge/list/";

// =============================================================================
// MASKING
// =============================================================================

/// Length of the random token substituted for a hidden value.
pub const MASK_TOKEN_LEN: usize = 10;

// =============================================================================
// EVENTS
// =============================================================================

/// Broadcast buffer for the event bus.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default OpenAI-compatible API endpoint.
pub const OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default embedding model.
pub const EMBED_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension for text-embedding-3-small.
pub const EMBED_DIMENSION: usize = 1536;

/// Default generation model used for chunking.
pub const GEN_MODEL: &str = "gpt-4o-mini";

/// HTTP timeout for provider requests, in seconds.
pub const PROVIDER_HTTP_TIMEOUT_SECS: u64 = 300;
