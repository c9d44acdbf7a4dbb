//! moodify-spotify: Spotify Web API as a [`TrackCatalog`](moodify_core::TrackCatalog).
//!
//! Authenticates with the client-credentials flow and searches tracks.

pub mod client;

pub use client::{Credentials, SpotifyClient};
