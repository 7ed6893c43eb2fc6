//! Spotify Web API client using the OAuth2 client-credentials flow.

use super::{build_http_client, observe_response, pass_gate};
use crate::config::SpotifyConfig;
use crate::errors::HandlerError;
use crate::gate::RateLimitGate;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

const API: &str = "spotify";
const DEFAULT_BASE_URL: &str = "https://api.spotify.com/v1";
const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Tokens are refreshed this early, so an in-flight call never straddles
/// the expiry.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 30;

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Client for the Spotify Web API.
pub struct SpotifyClient {
    client: reqwest::Client,
    gate: RateLimitGate,
    client_id: String,
    client_secret: String,
    base_url: String,
    token_url: String,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// An artist object as returned by search.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtistObject {
    /// Spotify artist id
    pub id: String,
    /// Display name
    pub name: String,
    /// Genre tags
    #[serde(default)]
    pub genres: Vec<String>,
}

/// A simplified album object from an artist's discography.
#[derive(Debug, Clone, Deserialize)]
pub struct AlbumObject {
    /// Spotify album id
    pub id: String,
    /// Display name
    pub name: String,
    /// Release date as reported (precision varies)
    #[serde(default)]
    pub release_date: Option<String>,
    /// Track count as reported
    #[serde(default)]
    pub total_tracks: Option<i32>,
}

/// A simplified track object from an album page.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackObject {
    /// Spotify track id
    pub id: String,
    /// Display name
    pub name: String,
    /// Disc number
    #[serde(default)]
    pub disc_number: Option<i32>,
    /// Position on the disc
    #[serde(default)]
    pub track_number: Option<i32>,
    /// Duration in milliseconds
    #[serde(default)]
    pub duration_ms: Option<i32>,
    /// Contributing artists
    #[serde(default)]
    pub artists: Vec<SimpleArtist>,
}

/// Name-only artist reference embedded in track objects.
#[derive(Debug, Clone, Deserialize)]
pub struct SimpleArtist {
    /// Display name
    pub name: String,
}

/// One page of a paged collection.
#[derive(Debug, Clone, Deserialize)]
pub struct Paging<T> {
    /// The items on this page
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    /// Total size of the collection
    #[serde(default)]
    pub total: i32,
    /// Link to the next page, absent on the last one
    #[serde(default)]
    pub next: Option<String>,
}

impl<T> Paging<T> {
    /// Whether another page follows this one.
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

#[derive(Deserialize)]
struct ArtistSearchResponse {
    artists: Paging<ArtistObject>,
}

#[derive(Deserialize)]
struct GenreSeedsResponse {
    genres: Vec<String>,
}

impl SpotifyClient {
    /// Creates a client from the configured credentials.
    pub fn new(config: &SpotifyConfig, gate: RateLimitGate) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            gate,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            token: Mutex::new(None),
        })
    }

    /// Points the client at a different API host. Meant for tests against
    /// a local stub.
    pub fn with_base_urls(mut self, base_url: String, token_url: String) -> Self {
        self.base_url = base_url;
        self.token_url = token_url;
        self
    }

    async fn access_token(&self) -> Result<String, HandlerError> {
        let mut guard = self.token.lock().await;

        if let Some(token) = guard.as_ref() {
            let margin = chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
            if token.expires_at > Utc::now() + margin {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let response = observe_response(&self.gate, API, "token", response).await?;
        let token: TokenResponse = response.json().await?;

        let access_token = token.access_token.clone();
        *guard = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
        });

        Ok(access_token)
    }

    async fn get(
        &self,
        endpoint: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, HandlerError> {
        pass_gate(&self.gate, API, endpoint).await?;
        let token = self.access_token().await?;

        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .bearer_auth(token)
            .send()
            .await?;

        observe_response(&self.gate, API, endpoint, response).await
    }

    /// `/search?type=artist&q=<query>`.
    pub async fn search_artists(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<ArtistObject>, HandlerError> {
        let response = self
            .get(
                "search",
                "/search",
                &[
                    ("type", "artist".to_string()),
                    ("q", query.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let body: ArtistSearchResponse = response.json().await?;
        Ok(body.artists.items)
    }

    /// The genre seed list driving unqueried discovery.
    pub async fn genre_seeds(&self) -> Result<Vec<String>, HandlerError> {
        let response = self
            .get(
                "genre-seeds",
                "/recommendations/available-genre-seeds",
                &[],
            )
            .await?;

        let body: GenreSeedsResponse = response.json().await?;
        Ok(body.genres)
    }

    /// One page of an artist's albums.
    pub async fn artist_albums(
        &self,
        artist_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Paging<AlbumObject>, HandlerError> {
        let response = self
            .get(
                "artist-albums",
                &format!("/artists/{artist_id}/albums"),
                &[
                    ("offset", offset.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        Ok(response.json().await?)
    }

    /// One page of an album's tracks.
    pub async fn album_tracks(
        &self,
        album_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Paging<TrackObject>, HandlerError> {
        let response = self
            .get(
                "album-tracks",
                &format!("/albums/{album_id}/tracks"),
                &[
                    ("offset", offset.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        Ok(response.json().await?)
    }
}
