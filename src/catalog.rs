//! Catalog writes performed by the pipeline handlers.
//!
//! Every write is an upsert on a natural key (`spotify_id`, normalized
//! producer name, the track/producer pair), so replaying a batch after a
//! reclaimed lease is a no-op.

use sqlx::PgPool;

/// An artist as discovered upstream.
#[derive(Debug, Clone)]
pub struct ArtistRecord<'a> {
    /// Spotify artist id
    pub spotify_id: &'a str,
    /// Display name
    pub name: &'a str,
    /// Genre tags
    pub genres: &'a [String],
}

/// An album within an artist's discography page.
#[derive(Debug, Clone)]
pub struct AlbumRecord<'a> {
    /// Spotify album id
    pub spotify_id: &'a str,
    /// Owning artist's Spotify id
    pub artist_spotify_id: &'a str,
    /// Display name
    pub name: &'a str,
    /// Release date as reported (precision varies)
    pub release_date: Option<&'a str>,
    /// Track count as reported
    pub total_tracks: Option<i32>,
}

/// A track within an album page.
#[derive(Debug, Clone)]
pub struct TrackRecord<'a> {
    /// Spotify track id
    pub spotify_id: &'a str,
    /// Owning album's Spotify id
    pub album_spotify_id: &'a str,
    /// Display name
    pub name: &'a str,
    /// Disc number
    pub disc_number: Option<i32>,
    /// Position on the disc
    pub track_number: Option<i32>,
    /// Duration in milliseconds
    pub duration_ms: Option<i32>,
}

/// Upserts an artist on its Spotify id.
pub async fn upsert_artist(pool: &PgPool, artist: &ArtistRecord<'_>) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO artists (spotify_id, name, genres)
        VALUES ($1, $2, $3)
        ON CONFLICT (spotify_id) DO UPDATE
        SET name = EXCLUDED.name,
            genres = EXCLUDED.genres,
            updated_at = NOW()
        ",
    )
    .bind(artist.spotify_id)
    .bind(artist.name)
    .bind(artist.genres)
    .execute(pool)
    .await?;
    Ok(())
}

/// Upserts an album on its Spotify id.
pub async fn upsert_album(pool: &PgPool, album: &AlbumRecord<'_>) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO albums (spotify_id, artist_spotify_id, name, release_date, total_tracks)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (spotify_id) DO UPDATE
        SET artist_spotify_id = EXCLUDED.artist_spotify_id,
            name = EXCLUDED.name,
            release_date = EXCLUDED.release_date,
            total_tracks = EXCLUDED.total_tracks,
            updated_at = NOW()
        ",
    )
    .bind(album.spotify_id)
    .bind(album.artist_spotify_id)
    .bind(album.name)
    .bind(album.release_date)
    .bind(album.total_tracks)
    .execute(pool)
    .await?;
    Ok(())
}

/// Upserts a track on its Spotify id.
pub async fn upsert_track(pool: &PgPool, track: &TrackRecord<'_>) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO tracks (spotify_id, album_spotify_id, name, disc_number, track_number, duration_ms)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (spotify_id) DO UPDATE
        SET album_spotify_id = EXCLUDED.album_spotify_id,
            name = EXCLUDED.name,
            disc_number = EXCLUDED.disc_number,
            track_number = EXCLUDED.track_number,
            duration_ms = EXCLUDED.duration_ms,
            updated_at = NOW()
        ",
    )
    .bind(track.spotify_id)
    .bind(track.album_spotify_id)
    .bind(track.name)
    .bind(track.disc_number)
    .bind(track.track_number)
    .bind(track.duration_ms)
    .execute(pool)
    .await?;
    Ok(())
}

/// Upserts a producer on its normalized name and returns the row id.
/// Names that normalize to nothing are dropped.
pub async fn upsert_producer(pool: &PgPool, name: &str) -> sqlx::Result<Option<i64>> {
    let normalized = normalize_producer_name(name);
    if normalized.is_empty() {
        return Ok(None);
    }

    let id = sqlx::query_scalar::<_, i64>(
        r"
        INSERT INTO producers (name, normalized_name)
        VALUES ($1, $2)
        ON CONFLICT (normalized_name) DO UPDATE
        SET updated_at = NOW()
        RETURNING id
        ",
    )
    .bind(name.trim())
    .bind(&normalized)
    .fetch_one(pool)
    .await?;

    Ok(Some(id))
}

/// Links a producer to a track, recording which source claimed the credit.
pub async fn link_track_producer(
    pool: &PgPool,
    track_spotify_id: &str,
    producer_id: i64,
    source: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO track_producers (track_spotify_id, producer_id, source)
        VALUES ($1, $2, $3)
        ON CONFLICT (track_spotify_id, producer_id) DO NOTHING
        ",
    )
    .bind(track_spotify_id)
    .bind(producer_id)
    .bind(source)
    .execute(pool)
    .await?;
    Ok(())
}

/// Canonical form for producer-name deduplication across sources:
/// bracketed qualifiers and surrounding quotes stripped, whitespace
/// collapsed, lowercased.
pub fn normalize_producer_name(name: &str) -> String {
    let mut visible = String::with_capacity(name.len());
    let mut depth = 0usize;
    for c in name.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => visible.push(c),
            _ => {}
        }
    }

    visible
        .trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::normalize_producer_name;

    #[test]
    fn lowercases_and_collapses_whitespace() {
        assert_eq!(normalize_producer_name("  Rick   Rubin "), "rick rubin");
    }

    #[test]
    fn strips_bracketed_qualifiers() {
        assert_eq!(
            normalize_producer_name("Quincy Jones (Executive Producer)"),
            "quincy jones"
        );
        assert_eq!(normalize_producer_name("RZA [as Bobby Digital]"), "rza");
    }

    #[test]
    fn strips_surrounding_quotes() {
        assert_eq!(normalize_producer_name("\"Mutt\" Lange"), "mutt\" lange");
        assert_eq!(normalize_producer_name("'Prince'"), "prince");
    }

    #[test]
    fn degenerate_names_normalize_to_empty() {
        assert_eq!(normalize_producer_name("(uncredited)"), "");
        assert_eq!(normalize_producer_name("   "), "");
    }
}
