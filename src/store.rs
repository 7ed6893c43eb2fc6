//! Transactional primitives over the queue, dead-letter and rate-limit
//! tables.
//!
//! Everything here goes through `SELECT … FOR UPDATE SKIP LOCKED` (or an
//! equivalent single-statement update) so concurrent workers never block
//! each other on claims, resets or requeues.

use crate::schema::{Batch, DeadLetterItem, QueueDepth, RateLimit};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

/// How long a claim leases a batch before it becomes reclaimable.
pub const LEASE_MINUTES: i32 = 5;

/// A dead-letter row is never requeued once its counter reaches this.
pub const DLQ_MAX_REQUEUES: i32 = 3;

/// Leases up to `limit` pending batches for `worker_id`.
///
/// Selection takes fresh work first (`retry_count ASC, created_at ASC`) so
/// previously-failing batches cannot monopolize capacity. Rows future-dated
/// by the retry backoff are invisible until `next_visible_at` passes. The
/// returned rows are already marked `processing` with a fresh lease.
pub async fn claim_batches(
    pool: &PgPool,
    worker_id: &str,
    limit: i64,
) -> sqlx::Result<Vec<Batch>> {
    sqlx::query_as::<_, Batch>(
        r"
        WITH claimable AS (
            SELECT id
            FROM batches
            WHERE status = 'pending'
              AND next_visible_at <= NOW()
              AND (claim_expires_at IS NULL OR claim_expires_at < NOW())
            ORDER BY retry_count ASC, created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $2
        )
        UPDATE batches b
        SET status = 'processing',
            claimed_by = $1,
            claim_expires_at = NOW() + make_interval(mins => $3),
            started_at = COALESCE(b.started_at, NOW()),
            updated_at = NOW()
        FROM claimable
        WHERE b.id = claimable.id
        RETURNING b.*
        ",
    )
    .bind(worker_id)
    .bind(limit)
    .bind(LEASE_MINUTES)
    .fetch_all(pool)
    .await
}

/// The number of batches currently leased.
pub async fn processing_count(pool: &PgPool) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM batches WHERE status = 'processing'")
        .fetch_one(pool)
        .await
}

/// Marks a batch as successfully completed.
pub async fn complete_batch(pool: &PgPool, batch_id: i64) -> sqlx::Result<()> {
    sqlx::query(
        r"
        UPDATE batches
        SET status = 'completed',
            completed_at = NOW(),
            items_total = 1,
            items_processed = 1,
            updated_at = NOW()
        WHERE id = $1
        ",
    )
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns a failed batch to the queue with its retry counter bumped.
///
/// The backoff is encoded by future-dating `next_visible_at`; the claim
/// predicate filters on it, so the batch stays invisible until the backoff
/// elapses.
pub async fn retry_batch(
    pool: &PgPool,
    batch_id: i64,
    retry_count: i32,
    error_message: &str,
    backoff: std::time::Duration,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        UPDATE batches
        SET status = 'pending',
            retry_count = $2,
            error_message = $3,
            claimed_by = NULL,
            claim_expires_at = NULL,
            next_visible_at = NOW() + make_interval(secs => $4),
            updated_at = NOW()
        WHERE id = $1
        ",
    )
    .bind(batch_id)
    .bind(retry_count)
    .bind(error_message)
    .bind(backoff.as_secs_f64())
    .execute(pool)
    .await?;
    Ok(())
}

/// Marks a batch as terminally failed.
///
/// The matching dead-letter row is inserted separately by
/// [`insert_dead_letter`]; if that insert fails the batch stays `error`
/// without a sibling, which the caller logs.
pub async fn fail_batch(
    pool: &PgPool,
    batch_id: i64,
    retry_count: i32,
    error_message: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        UPDATE batches
        SET status = 'error',
            retry_count = $2,
            error_message = $3,
            completed_at = NOW(),
            items_total = 1,
            items_failed = 1,
            claimed_by = NULL,
            claim_expires_at = NULL,
            updated_at = NOW()
        WHERE id = $1
        ",
    )
    .bind(batch_id)
    .bind(retry_count)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Parks a failed batch in the dead-letter table.
pub async fn insert_dead_letter(
    pool: &PgPool,
    batch: &Batch,
    error_message: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO dead_letter_items (item_type, error_message, original_batch_id, metadata)
        VALUES ($1, $2, $3, $4)
        ",
    )
    .bind(&batch.batch_type)
    .bind(error_message)
    .bind(batch.id)
    .bind(&batch.metadata)
    .execute(pool)
    .await?;
    Ok(())
}

/// Lease recovery: returns stranded `processing` batches to the queue.
///
/// Only leases expired more than `expiry_minutes` ago are reclaimed, a
/// cushion well beyond the five-minute lease itself. The retry counter is
/// preserved and the reset is annotated on `error_message`.
pub async fn reset_expired(pool: &PgPool, expiry_minutes: i32) -> sqlx::Result<u64> {
    let result = sqlx::query(
        r"
        UPDATE batches
        SET status = 'pending',
            claimed_by = NULL,
            claim_expires_at = NULL,
            next_visible_at = NOW(),
            error_message = CONCAT_WS(' ', error_message, 'Batch expired and was reset.'),
            updated_at = NOW()
        WHERE status = 'processing'
          AND claim_expires_at < NOW() - make_interval(mins => $1)
        ",
    )
    .bind(expiry_minutes)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Requeues up to `limit` dead-letter rows as fresh pending batches.
///
/// Rows are taken in `created_at` order while their counter is below
/// [`DLQ_MAX_REQUEUES`]. The new batch carries the original payload and
/// `retry_count + 1`. A row whose payload is already active is skipped and
/// left untouched for a later pass, so the one-active-row invariant holds
/// across this insert path too. Dead-letter rows are never deleted here.
pub async fn requeue_dead_letters(pool: &PgPool, limit: i64) -> sqlx::Result<u64> {
    let mut tx = pool.begin().await?;

    let candidates = sqlx::query_as::<_, DeadLetterItem>(
        r"
        SELECT id, item_type, error_message, original_batch_id, original_item_id,
               retry_count, metadata, created_at, updated_at
        FROM dead_letter_items
        WHERE retry_count < $2
        ORDER BY created_at ASC
        FOR UPDATE SKIP LOCKED
        LIMIT $1
        ",
    )
    .bind(limit)
    .bind(DLQ_MAX_REQUEUES)
    .fetch_all(&mut *tx)
    .await?;

    let mut requeued = 0;
    for item in candidates {
        let inserted = sqlx::query_scalar::<_, i64>(
            r"
            INSERT INTO batches (batch_type, metadata, retry_count)
            SELECT $1, $2, $3
            WHERE NOT EXISTS (
                SELECT 1 FROM batches
                WHERE batch_type = $1 AND metadata = $2
                  AND status IN ('pending', 'processing')
            )
            ON CONFLICT (batch_type, md5(metadata::text))
                WHERE status IN ('pending', 'processing')
                DO NOTHING
            RETURNING id
            ",
        )
        .bind(&item.item_type)
        .bind(&item.metadata)
        .bind(item.retry_count + 1)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_some() {
            sqlx::query(
                "UPDATE dead_letter_items SET retry_count = retry_count + 1, updated_at = NOW() WHERE id = $1",
            )
            .bind(item.id)
            .execute(&mut *tx)
            .await?;
            requeued += 1;
        }
    }

    tx.commit().await?;
    Ok(requeued)
}

/// Deletes completed batches older than `days`.
pub async fn cleanup_completed(pool: &PgPool, days: i32) -> sqlx::Result<u64> {
    let result = sqlx::query(
        r"
        DELETE FROM batches
        WHERE status = 'completed'
          AND completed_at < NOW() - make_interval(days => $1)
        ",
    )
    .bind(days)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Per-type status breakdown, including a pending-for-over-an-hour bucket.
pub async fn queue_depths(pool: &PgPool) -> sqlx::Result<Vec<QueueDepth>> {
    sqlx::query_as::<_, QueueDepth>(
        r"
        SELECT batch_type,
               COUNT(*) FILTER (WHERE status = 'pending') AS pending,
               COUNT(*) FILTER (WHERE status = 'processing') AS processing,
               COUNT(*) FILTER (WHERE status = 'completed') AS completed,
               COUNT(*) FILTER (WHERE status = 'error') AS error,
               COUNT(*) FILTER (WHERE status = 'pending'
                                  AND created_at < NOW() - INTERVAL '1 hour')
                   AS pending_over_hour
        FROM batches
        GROUP BY batch_type
        ORDER BY batch_type
        ",
    )
    .fetch_all(pool)
    .await
}

/// Dead-letter rows created within the trailing window.
pub async fn dead_letter_count_since(pool: &PgPool, hours: i32) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM dead_letter_items WHERE created_at > NOW() - make_interval(hours => $1)",
    )
    .bind(hours)
    .fetch_one(pool)
    .await
}

/// Batches that went terminal-error within the trailing window.
pub async fn error_batch_count_since(pool: &PgPool, hours: i32) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r"
        SELECT COUNT(*) FROM batches
        WHERE status = 'error'
          AND updated_at > NOW() - make_interval(hours => $1)
        ",
    )
    .bind(hours)
    .fetch_one(pool)
    .await
}

/// Batches stuck in `processing` longer than `minutes`.
pub async fn stalled_batch_count(pool: &PgPool, minutes: i32) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r"
        SELECT COUNT(*) FROM batches
        WHERE status = 'processing'
          AND started_at < NOW() - make_interval(mins => $1)
        ",
    )
    .bind(minutes)
    .fetch_one(pool)
    .await
}

/// Reads the tracked rate-limit state for one `(api, endpoint)` pair.
pub async fn get_rate_limit(
    pool: &PgPool,
    api_name: &str,
    endpoint: &str,
) -> sqlx::Result<Option<RateLimit>> {
    sqlx::query_as::<_, RateLimit>(
        r"
        SELECT api_name, endpoint, requests_remaining, requests_limit,
               reset_at, last_response, updated_at
        FROM rate_limits
        WHERE api_name = $1 AND endpoint = $2
        ",
    )
    .bind(api_name)
    .bind(endpoint)
    .fetch_optional(pool)
    .await
}

/// Upserts observed rate-limit header values after an outbound call.
pub async fn track_rate_limit(
    pool: &PgPool,
    api_name: &str,
    endpoint: &str,
    requests_remaining: i32,
    requests_limit: i32,
    reset_at: Option<DateTime<Utc>>,
    last_response: Option<Value>,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO rate_limits
            (api_name, endpoint, requests_remaining, requests_limit, reset_at, last_response, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        ON CONFLICT (api_name, endpoint) DO UPDATE
        SET requests_remaining = EXCLUDED.requests_remaining,
            requests_limit = EXCLUDED.requests_limit,
            reset_at = EXCLUDED.reset_at,
            last_response = EXCLUDED.last_response,
            updated_at = NOW()
        ",
    )
    .bind(api_name)
    .bind(endpoint)
    .bind(requests_remaining)
    .bind(requests_limit)
    .bind(reset_at)
    .bind(last_response)
    .execute(pool)
    .await?;
    Ok(())
}

/// All tracked rate-limit rows.
pub async fn list_rate_limits(pool: &PgPool) -> sqlx::Result<Vec<RateLimit>> {
    sqlx::query_as::<_, RateLimit>(
        r"
        SELECT api_name, endpoint, requests_remaining, requests_limit,
               reset_at, last_response, updated_at
        FROM rate_limits
        ORDER BY api_name, endpoint
        ",
    )
    .fetch_all(pool)
    .await
}
