//! HTTP clients for the upstream metadata APIs.
//!
//! Each client passes the rate-limit gate before a call and feeds the
//! observed response headers back through it afterwards. Upstream failures
//! map onto the retry policy: 429 and 5xx are retryable, any other
//! non-success status is permanent.

mod discogs;
mod genius;
mod spotify;

pub use discogs::DiscogsClient;
pub use genius::GeniusClient;
pub use spotify::{AlbumObject, ArtistObject, Paging, SimpleArtist, SpotifyClient, TrackObject};

use crate::errors::HandlerError;
use crate::gate::RateLimitGate;
use anyhow::anyhow;
use reqwest::{Response, StatusCode};
use std::time::Duration;
use tracing::warn;

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("tunework/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Blocks on the gate; a refused gate (shutdown during the wait) surfaces
/// as a retryable failure so the batch comes back on a later tick.
pub(crate) async fn pass_gate(
    gate: &RateLimitGate,
    api: &str,
    endpoint: &str,
) -> Result<(), HandlerError> {
    if gate.check(api, endpoint).await? {
        Ok(())
    } else {
        Err(HandlerError::Retryable(anyhow!(
            "rate limit gate refused {api} {endpoint}"
        )))
    }
}

/// Records whatever rate-limit headers the response carried, then maps the
/// status onto the retry policy.
pub(crate) async fn observe_response(
    gate: &RateLimitGate,
    api: &str,
    endpoint: &str,
    response: Response,
) -> Result<Response, HandlerError> {
    if let Err(error) = gate.record_headers(api, endpoint, response.headers()).await {
        warn!(%error, api, endpoint, "failed to record rate-limit headers");
    }

    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(HandlerError::Retryable(anyhow!(
            "{api} {endpoint} returned {status}"
        )))
    } else {
        Err(HandlerError::permanent(format!(
            "{api} {endpoint} returned {status}"
        )))
    }
}
