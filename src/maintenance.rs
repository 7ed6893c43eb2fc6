use crate::store;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info};

/// Leases expired at least this long ago are reclaimed. Well beyond the
/// five-minute lease itself, so a slow-but-alive worker is not preempted.
pub const EXPIRY_MINUTES: i32 = 30;

/// Dead-letter rows requeued per invocation.
pub const REQUEUE_LIMIT: i64 = 100;

/// Completed batches are kept this many days.
pub const RETENTION_DAYS: i32 = 7;

/// Outcome of one maintenance invocation.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MaintenanceSummary {
    /// Stranded leases returned to the queue
    pub leases_reset: u64,
    /// Dead-letter rows requeued as fresh batches
    pub dead_letters_requeued: u64,
    /// Completed batches deleted past retention
    pub completed_deleted: u64,
}

/// Periodic housekeeping over the queue tables.
pub struct Maintenance {
    pool: PgPool,
}

impl Maintenance {
    /// Creates the maintenance loop over `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// One maintenance invocation: lease recovery, dead-letter requeue,
    /// completed-history cleanup, in that order. The steps are
    /// independent; a failing step is logged and the rest still run, and
    /// the next scheduler tick retries whatever was missed.
    pub async fn run(&self) -> MaintenanceSummary {
        let mut summary = MaintenanceSummary::default();

        match store::reset_expired(&self.pool, EXPIRY_MINUTES).await {
            Ok(count) => summary.leases_reset = count,
            Err(err) => error!(%err, "lease reset failed"),
        }

        match store::requeue_dead_letters(&self.pool, REQUEUE_LIMIT).await {
            Ok(count) => summary.dead_letters_requeued = count,
            Err(err) => error!(%err, "dead-letter requeue failed"),
        }

        match store::cleanup_completed(&self.pool, RETENTION_DAYS).await {
            Ok(count) => summary.completed_deleted = count,
            Err(err) => error!(%err, "completed-batch cleanup failed"),
        }

        info!(
            leases_reset = summary.leases_reset,
            dead_letters_requeued = summary.dead_letters_requeued,
            completed_deleted = summary.completed_deleted,
            "maintenance finished"
        );
        summary
    }
}
