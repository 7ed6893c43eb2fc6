use crate::errors::{EnqueueError, HandlerError};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::PgPool;
use std::future::Future;
use tracing::instrument;

/// Retry limit applied when a batch type does not override it.
pub const DEFAULT_RETRY_LIMIT: i32 = 3;

/// Trait for defining batch jobs that can be enqueued and executed by the
/// worker.
pub trait BatchJob: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique type tag of the batch.
    ///
    /// This MUST be unique for the whole application.
    const BATCH_TYPE: &'static str;

    /// How many attempts a batch of this type gets before it is parked in
    /// the dead-letter table.
    const RETRY_LIMIT: i32 = DEFAULT_RETRY_LIMIT;

    /// Default priority of the batch.
    ///
    /// Reserved: claim ordering currently uses `(retry_count, created_at)`.
    const PRIORITY: i16 = 5;

    /// The application data provided to this job at runtime.
    type Context: Clone + Send + 'static;

    /// Execute the batch. This method should define its logic.
    ///
    /// Handlers run at-least-once and MUST be idempotent: a reclaimed lease
    /// can replay a partially-executed batch.
    fn run(&self, ctx: Self::Context) -> impl Future<Output = Result<(), HandlerError>> + Send;

    /// Enqueue this batch for background execution.
    ///
    /// Returns the batch ID if enqueued, or `None` when an active (pending
    /// or processing) batch with the same payload already exists.
    #[instrument(name = "tunework.enqueue", skip(self, pool), fields(message = Self::BATCH_TYPE))]
    fn enqueue<'a>(&'a self, pool: &'a PgPool) -> BoxFuture<'a, Result<Option<i64>, EnqueueError>> {
        let metadata = match serde_json::to_value(self) {
            Ok(metadata) => metadata,
            Err(err) => return async move { Err(EnqueueError::SerializationError(err)) }.boxed(),
        };

        enqueue_deduplicated(pool, Self::BATCH_TYPE, metadata, Self::PRIORITY).boxed()
    }
}

/// Inserts a pending batch unless an active batch with the same
/// `(batch_type, metadata)` already exists.
///
/// JSONB equality is the canonical-form comparison, so key order in the
/// payload does not defeat deduplication. The partial unique index on
/// active rows backstops the exists-check against concurrent inserts;
/// either path reports the duplicate as `None` rather than an error.
pub(crate) fn enqueue_deduplicated<'a>(
    pool: &'a PgPool,
    batch_type: &'a str,
    metadata: Value,
    priority: i16,
) -> BoxFuture<'a, Result<Option<i64>, EnqueueError>> {
    async move {
        let result = sqlx::query_scalar::<_, i64>(
            r"
            INSERT INTO batches (batch_type, metadata, priority)
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
        .bind(batch_type)
        .bind(metadata)
        .bind(priority)
        .fetch_optional(pool)
        .await?;

        Ok(result)
    }
    .boxed()
}
