#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod batch;
pub mod catalog;
pub mod clients;
pub mod config;
mod errors;
pub mod gate;
pub mod handlers;
pub mod http;
mod maintenance;
mod monitor;
mod registry;
mod scheduler;
/// Database schema definitions.
pub mod schema;
pub mod store;
mod util;
mod worker;

/// The main trait for defining batch jobs.
pub use self::batch::{BatchJob, DEFAULT_RETRY_LIMIT};
/// Error types for enqueueing and handler execution.
pub use self::errors::{EnqueueError, HandlerError};
/// The housekeeping loop and its summary.
pub use self::maintenance::{EXPIRY_MINUTES, Maintenance, MaintenanceSummary};
/// Health monitoring and alerting.
pub use self::monitor::{
    Alert, AlertDispatch, AlertLevel, AlertSink, HealthMetrics, HealthReport, LogAlertSink,
    Monitor, RateLimitStatus, RemediationAction, evaluate_alerts,
};
/// The `batch_type` to handler mapping.
pub use self::registry::HandlerRegistry;
/// The minute-cron control plane.
pub use self::scheduler::{Invoker, ScheduleEntry, Scheduler, default_schedule, minute_matches};
/// The dispatcher that leases and runs batches.
pub use self::worker::{MAX_CONCURRENT_JOBS, TickSummary, Worker, backoff_for_attempt};

use sqlx::PgPool;

/// Creates the queue, dead-letter, rate-limit and catalog tables.
pub async fn setup_database(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
