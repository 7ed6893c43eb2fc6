use super::{PipelineContext, ProducerDiscovery};
use crate::batch::BatchJob;
use crate::catalog;
use crate::errors::HandlerError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One page of an album's track listing. Emits a producer-discovery batch
/// per track and chains itself while more pages remain.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrackPage {
    /// Spotify album id being paged
    pub album_id: String,
    /// Page offset
    pub offset: u32,
    /// Page size
    pub limit: u32,
}

impl BatchJob for TrackPage {
    const BATCH_TYPE: &'static str = "track_page";
    const RETRY_LIMIT: i32 = 5;
    type Context = PipelineContext;

    async fn run(&self, ctx: Self::Context) -> Result<(), HandlerError> {
        let page = ctx
            .spotify
            .album_tracks(&self.album_id, self.offset, self.limit)
            .await?;

        for track in &page.items {
            catalog::upsert_track(
                &ctx.pool,
                &catalog::TrackRecord {
                    spotify_id: &track.id,
                    album_spotify_id: &self.album_id,
                    name: &track.name,
                    disc_number: track.disc_number,
                    track_number: track.track_number,
                    duration_ms: track.duration_ms,
                },
            )
            .await?;
        }

        for track in &page.items {
            let artist = track
                .artists
                .first()
                .map(|artist| artist.name.clone())
                .unwrap_or_default();

            ProducerDiscovery {
                track_id: track.id.clone(),
                title: track.name.clone(),
                artist,
            }
            .enqueue(&ctx.pool)
            .await?;
        }

        if page.has_next() {
            Self {
                album_id: self.album_id.clone(),
                offset: self.offset + self.limit,
                limit: self.limit,
            }
            .enqueue(&ctx.pool)
            .await?;
        }

        debug!(
            album = %self.album_id,
            offset = self.offset,
            tracks = page.items.len(),
            "track page processed"
        );
        Ok(())
    }
}
