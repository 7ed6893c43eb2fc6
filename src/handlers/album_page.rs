use super::{PipelineContext, TrackPage};
use crate::batch::BatchJob;
use crate::catalog;
use crate::errors::HandlerError;
use serde::{Deserialize, Serialize};
use tracing::debug;

const TRACK_PAGE_LIMIT: u32 = 50;

/// One page of an artist's discography. Emits a track-page batch per album
/// and chains itself while more pages remain.
#[derive(Debug, Serialize, Deserialize)]
pub struct AlbumPage {
    /// Spotify artist id being paged
    pub artist_id: String,
    /// Page offset
    pub offset: u32,
    /// Page size
    pub limit: u32,
}

impl BatchJob for AlbumPage {
    const BATCH_TYPE: &'static str = "album_page";
    const RETRY_LIMIT: i32 = 5;
    type Context = PipelineContext;

    async fn run(&self, ctx: Self::Context) -> Result<(), HandlerError> {
        let page = ctx
            .spotify
            .artist_albums(&self.artist_id, self.offset, self.limit)
            .await?;

        for album in &page.items {
            catalog::upsert_album(
                &ctx.pool,
                &catalog::AlbumRecord {
                    spotify_id: &album.id,
                    artist_spotify_id: &self.artist_id,
                    name: &album.name,
                    release_date: album.release_date.as_deref(),
                    total_tracks: album.total_tracks,
                },
            )
            .await?;
        }

        for album in &page.items {
            TrackPage {
                album_id: album.id.clone(),
                offset: 0,
                limit: TRACK_PAGE_LIMIT,
            }
            .enqueue(&ctx.pool)
            .await?;
        }

        if page.has_next() {
            Self {
                artist_id: self.artist_id.clone(),
                offset: self.offset + self.limit,
                limit: self.limit,
            }
            .enqueue(&ctx.pool)
            .await?;
        }

        debug!(
            artist = %self.artist_id,
            offset = self.offset,
            albums = page.items.len(),
            "album page processed"
        );
        Ok(())
    }
}
