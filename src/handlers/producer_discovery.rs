use super::PipelineContext;
use crate::batch::BatchJob;
use crate::catalog;
use crate::errors::HandlerError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Producer enrichment for one track, cross-referencing Genius song
/// credits and Discogs release credits.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProducerDiscovery {
    /// Spotify track id the credits attach to
    pub track_id: String,
    /// Track title used for upstream lookups
    pub title: String,
    /// Primary artist name used for upstream lookups
    pub artist: String,
}

impl BatchJob for ProducerDiscovery {
    const BATCH_TYPE: &'static str = "producer_discovery";
    const RETRY_LIMIT: i32 = 3;
    type Context = PipelineContext;

    async fn run(&self, ctx: Self::Context) -> Result<(), HandlerError> {
        let mut credits: Vec<(String, &'static str)> = Vec::new();

        // A track missing upstream is not an error; it simply yields no
        // credits from that source.
        let query = format!("{} {}", self.artist, self.title);
        if let Some(song_id) = ctx.genius.search_song(&query).await? {
            for name in ctx.genius.song_producers(song_id).await? {
                credits.push((name, "genius"));
            }
        }

        if let Some(release_id) = ctx
            .discogs
            .search_release(&self.artist, &self.title)
            .await?
        {
            for name in ctx.discogs.release_producers(release_id).await? {
                credits.push((name, "discogs"));
            }
        }

        let mut linked = 0;
        for (name, source) in credits {
            if let Some(producer_id) = catalog::upsert_producer(&ctx.pool, &name).await? {
                catalog::link_track_producer(&ctx.pool, &self.track_id, producer_id, source)
                    .await?;
                linked += 1;
            }
        }

        debug!(track = %self.track_id, linked, "producer identification finished");
        Ok(())
    }
}
