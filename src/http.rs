//! HTTP invocation surface: one POST route per component, CORS preflight
//! on every route, JSON envelopes throughout. Unhandled errors become a
//! 500 with `{"error": "<message>"}`.

use crate::batch::BatchJob;
use crate::handlers::{AlbumPage, DiscoverArtists, PipelineContext, ProducerDiscovery, TrackPage};
use crate::maintenance::{Maintenance, MaintenanceSummary};
use crate::monitor::{HealthReport, Monitor};
use crate::scheduler::Scheduler;
use crate::worker::{TickSummary, Worker};
use axum::Json;
use axum::Router;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode, header::AUTHORIZATION};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;

/// Shared state injected into every route.
#[derive(Clone)]
pub struct AppState {
    /// Handler context for the direct-invocation routes
    pub context: PipelineContext,
    /// The dispatcher behind `/worker`
    pub worker: Arc<Worker<PipelineContext>>,
    /// The loop behind `/maintenance`
    pub maintenance: Arc<Maintenance>,
    /// The monitor behind `/monitor`
    pub monitor: Arc<Monitor>,
    /// The control plane behind `/scheduler`
    pub scheduler: Arc<Scheduler>,
    /// Bearer token required on every non-preflight request, when set
    pub bearer_token: Option<String>,
}

/// Unhandled-error envelope.
pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(error: E) -> Self {
        Self(error.into())
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/scheduler", post(run_scheduler).options(preflight))
        .route("/worker", post(run_worker).options(preflight))
        .route("/maintenance", post(run_maintenance).options(preflight))
        .route("/monitor", post(run_monitor).options(preflight))
        .route(
            "/discover-artists",
            post(run_discover_artists).options(preflight),
        )
        .route(
            "/process-album-page",
            post(run_album_page).options(preflight),
        )
        .route(
            "/process-track-page",
            post(run_track_page).options(preflight),
        )
        .route(
            "/identify-producers",
            post(run_producer_discovery).options(preflight),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_bearer))
        .with_state(state)
}

/// CORS preflight: empty 200.
async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn require_bearer(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = &state.bearer_token {
        if request.method() != Method::OPTIONS {
            let authorized = request
                .headers()
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value == format!("Bearer {expected}"));

            if !authorized {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": "unauthorized" })),
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

async fn run_scheduler(State(state): State<AppState>) -> Json<Value> {
    let fired = state.scheduler.tick(Utc::now());
    Json(json!({ "fired": fired }))
}

async fn run_worker(State(state): State<AppState>) -> Result<Json<TickSummary>, ApiError> {
    Ok(Json(state.worker.tick().await?))
}

async fn run_maintenance(State(state): State<AppState>) -> Json<MaintenanceSummary> {
    Json(state.maintenance.run().await)
}

async fn run_monitor(State(state): State<AppState>) -> Result<Json<HealthReport>, ApiError> {
    Ok(Json(state.monitor.run().await?))
}

async fn run_discover_artists(
    State(state): State<AppState>,
    body: Option<Json<DiscoverArtists>>,
) -> Result<Json<Value>, ApiError> {
    let job = body.map(|Json(job)| job).unwrap_or_default();
    job.run(state.context.clone()).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn run_album_page(
    State(state): State<AppState>,
    Json(job): Json<AlbumPage>,
) -> Result<Json<Value>, ApiError> {
    job.run(state.context.clone()).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn run_track_page(
    State(state): State<AppState>,
    Json(job): Json<TrackPage>,
) -> Result<Json<Value>, ApiError> {
    job.run(state.context.clone()).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn run_producer_discovery(
    State(state): State<AppState>,
    Json(job): Json<ProducerDiscovery>,
) -> Result<Json<Value>, ApiError> {
    job.run(state.context.clone()).await?;
    Ok(Json(json!({ "ok": true })))
}
