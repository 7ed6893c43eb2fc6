//! The enrichment pipeline: the discovery seed job and the chained page
//! handlers it fans out into.
//!
//! The DAG is sequenced by the handlers themselves: a child batch is only
//! enqueued after the parent's catalog rows are committed, so dependent
//! work always finds its prerequisites in place.

mod album_page;
mod discover_artists;
mod producer_discovery;
mod track_page;

pub use album_page::AlbumPage;
pub use discover_artists::DiscoverArtists;
pub use producer_discovery::ProducerDiscovery;
pub use track_page::TrackPage;

use crate::clients::{DiscogsClient, GeniusClient, SpotifyClient};
use crate::registry::HandlerRegistry;
use sqlx::PgPool;
use std::sync::Arc;

/// Application data injected into every pipeline handler.
#[derive(Clone)]
pub struct PipelineContext {
    /// Shared connection pool; handlers enqueue children through it
    pub pool: PgPool,
    /// Spotify Web API client
    pub spotify: Arc<SpotifyClient>,
    /// Genius API client
    pub genius: Arc<GeniusClient>,
    /// Discogs API client
    pub discogs: Arc<DiscogsClient>,
}

/// Builds the production registry: every pipeline handler plus the
/// discovery aliases.
pub fn build_registry() -> HandlerRegistry<PipelineContext> {
    let mut registry = HandlerRegistry::default();
    registry.register::<DiscoverArtists>();
    registry.register::<AlbumPage>();
    registry.register::<TrackPage>();
    registry.register::<ProducerDiscovery>();
    registry.alias("album_discovery", "album_page");
    registry.alias("track_discovery", "track_page");
    registry
}
