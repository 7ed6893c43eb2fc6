//! Genius API client (Bearer token auth). Used for producer credits.

use super::{build_http_client, observe_response, pass_gate};
use crate::config::GeniusConfig;
use crate::errors::HandlerError;
use crate::gate::RateLimitGate;
use serde::Deserialize;

const API: &str = "genius";
const DEFAULT_BASE_URL: &str = "https://api.genius.com";

/// Client for the Genius API.
pub struct GeniusClient {
    client: reqwest::Client,
    gate: RateLimitGate,
    access_token: String,
    base_url: String,
}

#[derive(Deserialize)]
struct SearchEnvelope {
    response: SearchBody,
}

#[derive(Deserialize)]
struct SearchBody {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    result: HitResult,
}

#[derive(Deserialize)]
struct HitResult {
    id: i64,
}

#[derive(Deserialize)]
struct SongEnvelope {
    response: SongBody,
}

#[derive(Deserialize)]
struct SongBody {
    song: Song,
}

#[derive(Deserialize)]
struct Song {
    #[serde(default)]
    producer_artists: Vec<NamedArtist>,
}

#[derive(Deserialize)]
struct NamedArtist {
    name: String,
}

impl GeniusClient {
    /// Creates a client from the configured access token.
    pub fn new(config: &GeniusConfig, gate: RateLimitGate) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            gate,
            access_token: config.access_token.clone(),
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

        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        observe_response(&self.gate, API, endpoint, response).await
    }

    /// Best search hit for a song query, if any.
    pub async fn search_song(&self, query: &str) -> Result<Option<i64>, HandlerError> {
        let response = self
            .get("search", "/search", &[("q", query.to_string())])
            .await?;

        let body: SearchEnvelope = response.json().await?;
        Ok(body.response.hits.first().map(|hit| hit.result.id))
    }

    /// Producer credits on a song.
    pub async fn song_producers(&self, song_id: i64) -> Result<Vec<String>, HandlerError> {
        let response = self
            .get("songs", &format!("/songs/{song_id}"), &[])
            .await?;

        let body: SongEnvelope = response.json().await?;
        Ok(body
            .response
            .song
            .producer_artists
            .into_iter()
            .map(|artist| artist.name)
            .collect())
    }
}
