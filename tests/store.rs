#![allow(missing_docs)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]

use claims::{assert_none, assert_some};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::PgPool;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tunework::schema::BatchStatus;
use tunework::{BatchJob, HandlerError, setup_database, store};

/// Test utilities and common setup
mod test_utils {
    use super::*;
    use testcontainers::runners::AsyncRunner;

    /// Set up a test database with `TestContainers` and return the pool and container
    pub(super) async fn setup_test_db() -> anyhow::Result<(PgPool, ContainerAsync<Postgres>)> {
        let postgres_image = Postgres::default();
        let container = postgres_image.start().await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;
        let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&connection_string).await?;
        setup_database(&pool).await?;

        Ok((pool, container))
    }
}

#[derive(Serialize, Deserialize)]
struct SeedBatch {
    value: String,
}

impl BatchJob for SeedBatch {
    const BATCH_TYPE: &'static str = "seed";
    type Context = ();

    async fn run(&self, _ctx: Self::Context) -> Result<(), HandlerError> {
        Ok(())
    }
}

async fn insert_pending(pool: &PgPool, batch_type: &str, metadata: Value) -> anyhow::Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO batches (batch_type, metadata) VALUES ($1, $2) RETURNING id",
    )
    .bind(batch_type)
    .bind(metadata)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

async fn batch_status(pool: &PgPool, id: i64) -> anyhow::Result<BatchStatus> {
    let status = sqlx::query_scalar::<_, BatchStatus>("SELECT status FROM batches WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(status)
}

#[tokio::test]
async fn setup_database_creates_the_pipeline_tables() {
    let (pool, _container) = test_utils::setup_test_db().await.unwrap();

    let table_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables
         WHERE table_name IN ('batches', 'dead_letter_items', 'rate_limits')
         AND table_schema = 'public'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(table_count, 3);
}

#[tokio::test]
async fn claim_leases_batches_and_orders_fresh_work_first() -> anyhow::Result<()> {
    let (pool, _container) = test_utils::setup_test_db().await?;

    let fresh = insert_pending(&pool, "album_page", json!({"artist_id": "A"})).await?;
    let worn = sqlx::query_scalar::<_, i64>(
        "INSERT INTO batches (batch_type, metadata, retry_count) VALUES ($1, $2, 2) RETURNING id",
    )
    .bind("album_page")
    .bind(json!({"artist_id": "B"}))
    .fetch_one(&pool)
    .await?;

    let claimed = store::claim_batches(&pool, "worker-test", 1).await?;
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, fresh);
    assert_eq!(claimed[0].status, BatchStatus::Processing);
    assert_eq!(claimed[0].claimed_by.as_deref(), Some("worker-test"));
    assert_some!(claimed[0].claim_expires_at);
    assert_some!(claimed[0].started_at);

    // The previously-failing batch is backstopped, not starved.
    let claimed = store::claim_batches(&pool, "worker-test", 5).await?;
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, worn);
    assert_eq!(claimed[0].retry_count, 2);

    Ok(())
}

#[tokio::test]
async fn claims_from_two_workers_never_overlap() -> anyhow::Result<()> {
    let (pool, _container) = test_utils::setup_test_db().await?;

    for i in 0..10 {
        insert_pending(&pool, "album_page", json!({"artist_id": i})).await?;
    }

    let (first, second) = tokio::join!(
        store::claim_batches(&pool, "worker-a", 5),
        store::claim_batches(&pool, "worker-b", 5),
    );
    let first = first?;
    let second = second?;

    assert_eq!(first.len() + second.len(), 10);
    for batch in &first {
        assert!(second.iter().all(|other| other.id != batch.id));
    }

    Ok(())
}

#[tokio::test]
async fn retried_batches_stay_invisible_until_backoff_elapses() -> anyhow::Result<()> {
    let (pool, _container) = test_utils::setup_test_db().await?;

    let id = insert_pending(&pool, "album_page", json!({"artist_id": "A"})).await?;
    let claimed = store::claim_batches(&pool, "worker-test", 1).await?;
    assert_eq!(claimed.len(), 1);

    store::retry_batch(
        &pool,
        id,
        1,
        "upstream 503",
        std::time::Duration::from_secs(60),
    )
    .await?;

    assert_eq!(batch_status(&pool, id).await?, BatchStatus::Pending);
    assert!(store::claim_batches(&pool, "worker-test", 5).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn enqueue_deduplicates_active_payloads_only() -> anyhow::Result<()> {
    let (pool, _container) = test_utils::setup_test_db().await?;

    let job = SeedBatch {
        value: "foo".to_string(),
    };

    let first = assert_some!(job.enqueue(&pool).await?);
    assert_none!(job.enqueue(&pool).await?);

    // Still deduplicated while the batch is processing.
    let claimed = store::claim_batches(&pool, "worker-test", 1).await?;
    assert_eq!(claimed[0].id, first);
    assert_none!(job.enqueue(&pool).await?);

    // A completed batch no longer blocks a new one.
    store::complete_batch(&pool, first).await?;
    assert_some!(job.enqueue(&pool).await?);

    // Different payloads never collide.
    assert_some!(
        SeedBatch {
            value: "bar".to_string()
        }
        .enqueue(&pool)
        .await?
    );

    Ok(())
}

#[tokio::test]
async fn reset_expired_reclaims_stranded_leases() -> anyhow::Result<()> {
    let (pool, _container) = test_utils::setup_test_db().await?;

    let stuck = sqlx::query_scalar::<_, i64>(
        r"
        INSERT INTO batches (batch_type, metadata, status, claimed_by, claim_expires_at, started_at, retry_count)
        VALUES ($1, $2, 'processing', 'worker-dead', NOW() - INTERVAL '31 minutes', NOW() - INTERVAL '36 minutes', 2)
        RETURNING id
        ",
    )
    .bind("album_page")
    .bind(json!({"artist_id": "A"}))
    .fetch_one(&pool)
    .await?;

    // A live lease is left alone.
    let live = sqlx::query_scalar::<_, i64>(
        r"
        INSERT INTO batches (batch_type, metadata, status, claimed_by, claim_expires_at, started_at)
        VALUES ($1, $2, 'processing', 'worker-live', NOW() + INTERVAL '4 minutes', NOW())
        RETURNING id
        ",
    )
    .bind("album_page")
    .bind(json!({"artist_id": "B"}))
    .fetch_one(&pool)
    .await?;

    let reset = store::reset_expired(&pool, 30).await?;
    assert_eq!(reset, 1);

    let (status, claimed_by, retry_count, error_message): (BatchStatus, Option<String>, i32, Option<String>) =
        sqlx::query_as(
            "SELECT status, claimed_by, retry_count, error_message FROM batches WHERE id = $1",
        )
        .bind(stuck)
        .fetch_one(&pool)
        .await?;

    assert_eq!(status, BatchStatus::Pending);
    assert_none!(claimed_by);
    assert_eq!(retry_count, 2);
    assert!(
        error_message
            .unwrap()
            .contains("Batch expired and was reset.")
    );

    assert_eq!(batch_status(&pool, live).await?, BatchStatus::Processing);

    Ok(())
}

#[tokio::test]
async fn requeue_promotes_eligible_dead_letters() -> anyhow::Result<()> {
    let (pool, _container) = test_utils::setup_test_db().await?;

    for (i, retry_count) in [0, 1, 2, 3].into_iter().enumerate() {
        sqlx::query(
            r"
            INSERT INTO dead_letter_items (item_type, error_message, retry_count, metadata, created_at)
            VALUES ($1, 'boom', $2, $3, NOW() - make_interval(mins => $4))
            ",
        )
        .bind("album_page")
        .bind(retry_count)
        .bind(json!({"artist_id": i}))
        .bind(10 - i as i32)
        .execute(&pool)
        .await?;
    }

    let requeued = store::requeue_dead_letters(&pool, 100).await?;
    assert_eq!(requeued, 3);

    let pending: Vec<(String, i32)> = sqlx::query_as(
        "SELECT batch_type, retry_count FROM batches WHERE status = 'pending' ORDER BY id",
    )
    .fetch_all(&pool)
    .await?;
    assert_eq!(pending.len(), 3);
    for (batch_type, retry_count) in &pending {
        assert_eq!(batch_type, "album_page");
        assert!(*retry_count >= 1);
    }

    // Each eligible row's counter moved up by one; the exhausted row is untouched.
    let counters: Vec<i32> =
        sqlx::query_scalar("SELECT retry_count FROM dead_letter_items ORDER BY created_at")
            .fetch_all(&pool)
            .await?;
    assert_eq!(counters, vec![1, 2, 3, 3]);

    // Dead-letter rows are never deleted by a requeue.
    let dlq_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letter_items")
        .fetch_one(&pool)
        .await?;
    assert_eq!(dlq_count, 4);

    Ok(())
}

#[tokio::test]
async fn requeue_skips_payloads_that_are_already_active() -> anyhow::Result<()> {
    let (pool, _container) = test_utils::setup_test_db().await?;

    insert_pending(&pool, "album_page", json!({"artist_id": "A"})).await?;
    sqlx::query(
        "INSERT INTO dead_letter_items (item_type, retry_count, metadata) VALUES ($1, 0, $2)",
    )
    .bind("album_page")
    .bind(json!({"artist_id": "A"}))
    .execute(&pool)
    .await?;

    let requeued = store::requeue_dead_letters(&pool, 100).await?;
    assert_eq!(requeued, 0);

    let counter: i32 = sqlx::query_scalar("SELECT retry_count FROM dead_letter_items")
        .fetch_one(&pool)
        .await?;
    assert_eq!(counter, 0);

    Ok(())
}

#[tokio::test]
async fn cleanup_deletes_only_old_completed_batches() -> anyhow::Result<()> {
    let (pool, _container) = test_utils::setup_test_db().await?;

    sqlx::query(
        r#"
        INSERT INTO batches (batch_type, metadata, status, completed_at)
        VALUES ('album_page', '{}', 'completed', NOW() - INTERVAL '8 days'),
               ('album_page', '{"x": 1}', 'completed', NOW() - INTERVAL '1 day'),
               ('album_page', '{"x": 2}', 'error', NOW() - INTERVAL '8 days')
        "#,
    )
    .execute(&pool)
    .await?;

    let deleted = store::cleanup_completed(&pool, 7).await?;
    assert_eq!(deleted, 1);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batches")
        .fetch_one(&pool)
        .await?;
    assert_eq!(remaining, 2);

    Ok(())
}

#[tokio::test]
async fn queue_depths_bucket_by_type_and_status() -> anyhow::Result<()> {
    let (pool, _container) = test_utils::setup_test_db().await?;

    sqlx::query(
        r#"
        INSERT INTO batches (batch_type, metadata, status, created_at)
        VALUES ('album_page', '{"a": 1}', 'pending', NOW() - INTERVAL '2 hours'),
               ('album_page', '{"a": 2}', 'pending', NOW()),
               ('album_page', '{"a": 3}', 'error', NOW()),
               ('track_page', '{"a": 4}', 'processing', NOW())
        "#,
    )
    .execute(&pool)
    .await?;

    let depths = store::queue_depths(&pool).await?;
    assert_eq!(depths.len(), 2);

    let albums = &depths[0];
    assert_eq!(albums.batch_type, "album_page");
    assert_eq!(albums.pending, 2);
    assert_eq!(albums.pending_over_hour, 1);
    assert_eq!(albums.error, 1);

    let tracks = &depths[1];
    assert_eq!(tracks.batch_type, "track_page");
    assert_eq!(tracks.processing, 1);

    Ok(())
}

#[tokio::test]
async fn rate_limit_tracking_upserts_observed_state() -> anyhow::Result<()> {
    let (pool, _container) = test_utils::setup_test_db().await?;

    store::track_rate_limit(&pool, "spotify", "search", 99, 100, None, None).await?;
    store::track_rate_limit(
        &pool,
        "spotify",
        "search",
        42,
        100,
        Some(chrono::Utc::now() + chrono::Duration::minutes(1)),
        Some(json!({"remaining": 42})),
    )
    .await?;

    let tracked = store::get_rate_limit(&pool, "spotify", "search")
        .await?
        .unwrap();
    assert_eq!(tracked.requests_remaining, 42);
    assert_eq!(tracked.requests_limit, 100);
    assert_some!(tracked.reset_at);

    assert_none!(store::get_rate_limit(&pool, "genius", "search").await?);

    Ok(())
}

#[tokio::test]
async fn catalog_upserts_are_idempotent() -> anyhow::Result<()> {
    let (pool, _container) = test_utils::setup_test_db().await?;

    let artist = tunework::catalog::ArtistRecord {
        spotify_id: "artist-1",
        name: "Sault",
        genres: &["funk".to_string()],
    };
    tunework::catalog::upsert_artist(&pool, &artist).await?;
    tunework::catalog::upsert_artist(&pool, &artist).await?;

    let artists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artists")
        .fetch_one(&pool)
        .await?;
    assert_eq!(artists, 1);

    let first = tunework::catalog::upsert_producer(&pool, "Rick Rubin").await?;
    let second = tunework::catalog::upsert_producer(&pool, "  RICK   RUBIN ").await?;
    assert_eq!(first, second);

    Ok(())
}
