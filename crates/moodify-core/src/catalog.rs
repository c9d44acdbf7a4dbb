//! Track catalog seam and the genre-based track recommender.

use crate::mood::map_emotion_to_genre;
use crate::types::{Genre, TrackRecord};
use thiserror::Error;

/// Maximum number of tracks requested from, and returned by, the recommender.
pub const TRACK_LIMIT: usize = 5;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("authorization failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited{}", .retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("API error {0}: {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// A searchable track catalog.
pub trait TrackCatalog: Send {
    /// Search for tracks matching `query`, in the catalog's own relevance order.
    fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<TrackRecord>, CatalogError>;
}

impl<T: TrackCatalog + ?Sized> TrackCatalog for Box<T> {
    fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<TrackRecord>, CatalogError> {
        (**self).search_tracks(query, limit)
    }
}

/// Turns a genre into at most [`TRACK_LIMIT`] tracks from a catalog.
pub struct TrackRecommender<C> {
    catalog: C,
}

impl<C: TrackCatalog> TrackRecommender<C> {
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }

    /// One catalog query for `genre:<genre>`; order is the catalog's, never re-ranked.
    pub fn recommend(&self, genre: Genre) -> Result<Vec<TrackRecord>, CatalogError> {
        let query = genre.search_query();
        tracing::debug!(%genre, query = %query, limit = TRACK_LIMIT, "searching catalog");

        let mut tracks = self.catalog.search_tracks(&query, TRACK_LIMIT)?;
        tracks.truncate(TRACK_LIMIT);

        tracing::info!(%genre, count = tracks.len(), "recommendations ready");
        Ok(tracks)
    }

    /// Map an emotion label to its genre, then recommend for that genre.
    pub fn recommend_for_emotion(
        &self,
        label: &str,
    ) -> (Genre, Result<Vec<TrackRecord>, CatalogError>) {
        let genre = map_emotion_to_genre(label);
        (genre, self.recommend(genre))
    }
}
