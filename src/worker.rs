use crate::errors::HandlerError;
use crate::registry::HandlerRegistry;
use crate::schema::Batch;
use crate::store;
use crate::util::{try_to_extract_panic_info, with_sentry_transaction};
use futures_util::FutureExt;
use futures_util::future::join_all;
use sentry_core::{Hub, SentryFutureExt};
use serde::Serialize;
use sqlx::PgPool;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Upper bound on batches processing at once across one worker tick.
pub const MAX_CONCURRENT_JOBS: i64 = 3;

/// Outcome of one worker invocation.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TickSummary {
    /// Batches leased this tick
    pub claimed: usize,
    /// Batches that ran to completion
    pub completed: usize,
    /// Batches that failed (requeued or dead-lettered)
    pub failed: usize,
}

/// The dispatcher: leases batches, runs their handlers, and applies the
/// completion, retry and dead-letter policy.
///
/// Workers are short-lived and stateless between ticks; every tick claims
/// under a fresh worker identity. Parallelism within a tick is bounded by
/// [`MAX_CONCURRENT_JOBS`] with all-settle semantics, so one failing batch
/// never cancels its siblings.
pub struct Worker<Context> {
    pool: PgPool,
    context: Context,
    registry: Arc<HandlerRegistry<Context>>,
    max_concurrent_jobs: i64,
}

impl<Context: Clone + Send + Sync + 'static> Worker<Context> {
    /// Creates a worker over `pool` dispatching through `registry`.
    pub fn new(pool: PgPool, context: Context, registry: Arc<HandlerRegistry<Context>>) -> Self {
        Self {
            pool,
            context,
            registry,
            max_concurrent_jobs: MAX_CONCURRENT_JOBS,
        }
    }

    /// Overrides the concurrency cap.
    pub fn max_concurrent_jobs(mut self, max: i64) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    /// One worker invocation.
    ///
    /// Reads the in-flight count, claims up to the remaining capacity,
    /// dispatches every claimed batch concurrently and awaits them all.
    /// The capacity read and the claim are separate statements, so the
    /// in-flight count may briefly exceed the cap under concurrent ticks;
    /// the throttle is best-effort. Only a failing claim fails the tick.
    pub async fn tick(&self) -> anyhow::Result<TickSummary> {
        let processing = store::processing_count(&self.pool).await?;
        if processing >= self.max_concurrent_jobs {
            info!(processing, "max_concurrent_jobs_reached");
            return Ok(TickSummary::default());
        }

        let want = self.max_concurrent_jobs - processing;
        let worker_id = format!("worker-{}", Uuid::new_v4());
        let batches = store::claim_batches(&self.pool, &worker_id, want).await?;

        let claimed = batches.len();
        if claimed > 0 {
            debug!(claimed, worker.id = %worker_id, "claimed batches");
        }

        let results = join_all(batches.into_iter().map(|batch| self.dispatch(batch))).await;

        let completed = results.into_iter().filter(|completed| *completed).count();
        let summary = TickSummary {
            claimed,
            completed,
            failed: claimed - completed,
        };
        info!(
            claimed = summary.claimed,
            completed = summary.completed,
            failed = summary.failed,
            "worker tick finished"
        );
        Ok(summary)
    }

    /// Runs one leased batch to a terminal or requeued state. Returns
    /// whether the batch completed.
    async fn dispatch(&self, batch: Batch) -> bool {
        let span = info_span!("batch", batch.id = %batch.id, batch.kind = %batch.batch_type);
        let start = Instant::now();

        debug!(parent: &span, "running batch…");

        let future = with_sentry_transaction(&batch.batch_type, || async {
            let run_fn = self.registry.get(&batch.batch_type).ok_or_else(|| {
                HandlerError::permanent(format!(
                    "no handler registered for {}",
                    batch.batch_type
                ))
            })?;

            AssertUnwindSafe(run_fn(self.context.clone(), batch.metadata.clone()))
                .catch_unwind()
                .await
                .map_err(|e| HandlerError::Retryable(try_to_extract_panic_info(&*e)))
                .and_then(std::convert::identity)
        });

        let result = future
            .instrument(span.clone())
            .bind_hub(Hub::current())
            .await;

        let _enter = span.enter();
        match result {
            Ok(()) => {
                if let Err(error) = store::complete_batch(&self.pool, batch.id).await {
                    warn!(%error, "failed to mark batch completed");
                    return false;
                }
                info!(
                    latency_ms = start.elapsed().as_millis() as u64,
                    "batch_completed"
                );
                true
            }
            Err(error) => {
                self.apply_retry_policy(&batch, &error).await;
                false
            }
        }
    }

    /// Requeues with backoff while retries remain; otherwise parks the
    /// batch in the dead-letter table. Store failures in here are logged
    /// and swallowed so one bad row cannot fail the whole tick.
    async fn apply_retry_policy(&self, batch: &Batch, error: &HandlerError) {
        let limit = self.registry.retry_limit(&batch.batch_type);
        let next = batch.retry_count + 1;
        let message = error.to_string();

        if error.is_retryable() && next < limit {
            let backoff = backoff_for_attempt(next);
            warn!(retry = next, backoff_ms = backoff.as_millis() as u64, %message, "handler failed, requeueing");
            if let Err(db_error) =
                store::retry_batch(&self.pool, batch.id, next, &message, backoff).await
            {
                warn!(%db_error, "failed to requeue batch");
            }
            return;
        }

        warn!(retries = next, %message, "handler failed terminally, dead-lettering");
        if let Err(db_error) = store::fail_batch(&self.pool, batch.id, next, &message).await {
            warn!(%db_error, "failed to mark batch errored");
            return;
        }
        if let Err(db_error) = store::insert_dead_letter(&self.pool, batch, &message).await {
            // The batch stays `error` without a dead-letter sibling.
            warn!(%db_error, "failed to insert dead-letter row");
        }
    }
}

/// Geometric backoff, doubling from 500 ms: 500, 1000, 2000, 4000, 8000…
pub fn backoff_for_attempt(attempt: i32) -> Duration {
    let exp = attempt.saturating_sub(1).clamp(0, 16) as u32;
    Duration::from_millis(500u64 << exp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_500ms() {
        let observed: Vec<u64> = (1..=5)
            .map(|attempt| backoff_for_attempt(attempt).as_millis() as u64)
            .collect();
        assert_eq!(observed, vec![500, 1000, 2000, 4000, 8000]);
    }

    #[test]
    fn backoff_is_capped_for_absurd_attempts() {
        assert_eq!(backoff_for_attempt(0), Duration::from_millis(500));
        assert!(backoff_for_attempt(1000) <= Duration::from_millis(500 << 16));
    }
}
