//! Database schema definitions for SQLx.
//!
//! This module contains the database types and structures for the batch
//! pipeline: the queue table, the dead-letter table and the per-endpoint
//! rate-limit counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Lifecycle state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Waiting to be claimed by a worker.
    Pending,
    /// Leased by a worker; `claimed_by` and `claim_expires_at` are set.
    Processing,
    /// Terminal success; cleaned up after the retention window.
    Completed,
    /// Terminal failure; a dead-letter row exists for it.
    Error,
}

/// Represents one unit of deferred work in the queue table.
#[derive(Debug, Clone, FromRow)]
pub struct Batch {
    /// Unique identifier for the batch
    pub id: i64,
    /// Type tag keying the handler that executes this batch
    pub batch_type: String,
    /// Current lifecycle state
    pub status: BatchStatus,
    /// Reserved ordering hint (claim ordering currently ignores it)
    pub priority: i16,
    /// Number of retry attempts made
    pub retry_count: i32,
    /// Total items in this batch
    pub items_total: i32,
    /// Items processed successfully
    pub items_processed: i32,
    /// Items that failed
    pub items_failed: i32,
    /// Identity of the worker holding the lease, if any
    pub claimed_by: Option<String>,
    /// Lease expiry; after this the batch may be reclaimed
    pub claim_expires_at: Option<DateTime<Utc>>,
    /// First time a worker started on this batch
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal timestamp (success or exhausted failure)
    pub completed_at: Option<DateTime<Utc>>,
    /// Earliest time the claim predicate will select this row again
    pub next_visible_at: DateTime<Utc>,
    /// Most recent failure message, if any
    pub error_message: Option<String>,
    /// Opaque structured payload passed to the handler
    pub metadata: Value,
    /// Timestamp when the batch was created
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last mutation
    pub updated_at: DateTime<Utc>,
}

/// A parked failure: a batch whose retries were exhausted, or whose handler
/// reported a permanent failure.
#[derive(Debug, Clone, FromRow)]
pub struct DeadLetterItem {
    /// Unique identifier for the dead-letter row
    pub id: i64,
    /// The original `batch_type`
    pub item_type: String,
    /// Failure message captured at park time
    pub error_message: Option<String>,
    /// Id of the batch this row was created from
    pub original_batch_id: Option<i64>,
    /// Item-level identifier, when the failure was narrower than a batch
    pub original_item_id: Option<String>,
    /// How many times this row has been requeued (independent of the
    /// batch's own retry counter)
    pub retry_count: i32,
    /// The original batch payload
    pub metadata: Value,
    /// Timestamp when the row was parked
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last requeue
    pub updated_at: DateTime<Utc>,
}

/// Observed rate-limit state for one `(api_name, endpoint)` pair.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RateLimit {
    /// Upstream API name, e.g. `spotify`
    pub api_name: String,
    /// Endpoint within that API
    pub endpoint: String,
    /// Requests left in the current window, from response headers
    pub requests_remaining: i32,
    /// Window size, from response headers
    pub requests_limit: i32,
    /// When the window resets
    pub reset_at: Option<DateTime<Utc>>,
    /// Raw header snapshot from the last response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_response: Option<Value>,
    /// Timestamp of the last observation
    pub updated_at: DateTime<Utc>,
}

/// Per-type status breakdown of the queue table, as reported by the monitor.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QueueDepth {
    /// The batch type this row aggregates
    pub batch_type: String,
    /// Batches waiting to be claimed
    pub pending: i64,
    /// Batches currently leased
    pub processing: i64,
    /// Terminal successes still within the retention window
    pub completed: i64,
    /// Terminal failures
    pub error: i64,
    /// Pending batches older than one hour
    pub pending_over_hour: i64,
}
