//! Discogs API client (consumer key/secret auth). Used for release-level
//! producer credits.

use super::{build_http_client, observe_response, pass_gate};
use crate::config::DiscogsConfig;
use crate::errors::HandlerError;
use crate::gate::RateLimitGate;
use serde::Deserialize;

const API: &str = "discogs";
const DEFAULT_BASE_URL: &str = "https://api.discogs.com";

/// Client for the Discogs database API.
pub struct DiscogsClient {
    client: reqwest::Client,
    gate: RateLimitGate,
    consumer_key: String,
    consumer_secret: String,
    base_url: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    id: i64,
}

#[derive(Deserialize)]
struct Release {
    #[serde(default)]
    extraartists: Vec<Credit>,
}

#[derive(Deserialize)]
struct Credit {
    name: String,
    #[serde(default)]
    role: String,
}

impl DiscogsClient {
    /// Creates a client from the configured consumer credentials.
    pub fn new(config: &DiscogsConfig, gate: RateLimitGate) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            gate,
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Points the client at a different host. Meant for tests.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn get(
        &self,
        endpoint: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, HandlerError> {
        pass_gate(&self.gate, API, endpoint).await?;

        let auth = format!(
            "Discogs key={}, secret={}",
            self.consumer_key, self.consumer_secret
        );
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await?;

        observe_response(&self.gate, API, endpoint, response).await
    }

    /// Best-matching release for an artist/track pair, if any.
    pub async fn search_release(
        &self,
        artist: &str,
        track: &str,
    ) -> Result<Option<i64>, HandlerError> {
        let response = self
            .get(
                "search",
                "/database/search",
                &[
                    ("type", "release".to_string()),
                    ("artist", artist.to_string()),
                    ("track", track.to_string()),
                    ("per_page", "1".to_string()),
                ],
            )
            .await?;

        let body: SearchResponse = response.json().await?;
        Ok(body.results.first().map(|result| result.id))
    }

    /// Names credited with a producer role on a release.
    pub async fn release_producers(&self, release_id: i64) -> Result<Vec<String>, HandlerError> {
        let response = self
            .get("releases", &format!("/releases/{release_id}"), &[])
            .await?;

        let body: Release = response.json().await?;
        Ok(body
            .extraartists
            .into_iter()
            .filter(|credit| credit.role.to_lowercase().contains("producer"))
            .map(|credit| credit.name)
            .collect())
    }
}
