use super::{AlbumPage, PipelineContext};
use crate::batch::BatchJob;
use crate::catalog;
use crate::errors::HandlerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Genre seeds sampled when no query is given.
const GENRE_SEED_COUNT: usize = 5;
/// Pause between seeded searches.
const SEED_SEARCH_DELAY: Duration = Duration::from_millis(250);
const DEFAULT_SEARCH_LIMIT: u32 = 20;
const SEEDED_SEARCH_LIMIT: u32 = 5;
/// Album page size requested for every discovered artist.
const ALBUM_PAGE_LIMIT: u32 = 50;

/// Seed job: finds artists and fans out one album-page batch per artist.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DiscoverArtists {
    /// Free-text artist query; when absent, genre seeds drive discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Search page size override (string on the wire)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
}

impl BatchJob for DiscoverArtists {
    const BATCH_TYPE: &'static str = "discover-artists";
    const RETRY_LIMIT: i32 = 3;
    type Context = PipelineContext;

    async fn run(&self, ctx: Self::Context) -> Result<(), HandlerError> {
        let artists = match &self.query {
            Some(query) => {
                let limit = self
                    .limit
                    .as_deref()
                    .and_then(|raw| raw.parse().ok())
                    .unwrap_or(DEFAULT_SEARCH_LIMIT);
                ctx.spotify.search_artists(query, limit).await?
            }
            None => {
                let seeds = ctx.spotify.genre_seeds().await?;
                let mut found = Vec::new();
                for (i, genre) in seeds.iter().take(GENRE_SEED_COUNT).enumerate() {
                    if i > 0 {
                        tokio::time::sleep(SEED_SEARCH_DELAY).await;
                    }
                    let query = format!("genre:\"{genre}\"");
                    found.extend(ctx.spotify.search_artists(&query, SEEDED_SEARCH_LIMIT).await?);
                }
                found
            }
        };

        info!(count = artists.len(), "discovered artists");

        for artist in &artists {
            catalog::upsert_artist(
                &ctx.pool,
                &catalog::ArtistRecord {
                    spotify_id: &artist.id,
                    name: &artist.name,
                    genres: &artist.genres,
                },
            )
            .await?;

            AlbumPage {
                artist_id: artist.id.clone(),
                offset: 0,
                limit: ALBUM_PAGE_LIMIT,
            }
            .enqueue(&ctx.pool)
            .await?;
        }

        Ok(())
    }
}
