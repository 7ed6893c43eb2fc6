//! Pipeline service entry point: config, pool, migrations, clients,
//! router.

use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tunework::clients::{DiscogsClient, GeniusClient, SpotifyClient};
use tunework::config::AppConfig;
use tunework::gate::RateLimitGate;
use tunework::handlers::{PipelineContext, build_registry};
use tunework::http::{AppState, router};
use tunework::{Invoker, Maintenance, Monitor, Scheduler, Worker, setup_database};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    setup_database(&pool).await?;

    let shutdown = CancellationToken::new();
    let gate = RateLimitGate::new(pool.clone(), shutdown.clone());

    let context = PipelineContext {
        pool: pool.clone(),
        spotify: Arc::new(SpotifyClient::new(&config.spotify, gate.clone())?),
        genius: Arc::new(GeniusClient::new(&config.genius, gate.clone())?),
        discogs: Arc::new(DiscogsClient::new(&config.discogs, gate.clone())?),
    };

    let registry = Arc::new(build_registry());
    let invoker = Invoker::new(
        config.invoker.base_url.clone(),
        config.invoker.bearer_token.clone(),
    )?;

    let state = AppState {
        context: context.clone(),
        worker: Arc::new(Worker::new(pool.clone(), context, registry)),
        maintenance: Arc::new(Maintenance::new(pool.clone())),
        monitor: Arc::new(Monitor::new(pool.clone())),
        scheduler: Arc::new(Scheduler::new(Arc::new(invoker))),
        bearer_token: config.invoker.bearer_token.clone(),
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
