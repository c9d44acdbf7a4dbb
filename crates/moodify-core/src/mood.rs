//! Mood mapper: dominant emotion label → music genre.

use crate::types::{Emotion, Genre};

/// Genre used for any label outside the emotion table.
pub const FALLBACK_GENRE: Genre = Genre::Pop;

impl Emotion {
    pub fn genre(self) -> Genre {
        match self {
            Emotion::Happy => Genre::Pop,
            Emotion::Sad => Genre::Acoustic,
            Emotion::Angry => Genre::Metal,
            Emotion::Surprise => Genre::Edm,
            Emotion::Fear => Genre::Ambient,
            Emotion::Disgust => Genre::Punk,
            Emotion::Neutral => Genre::Lofi,
        }
    }
}

/// Map an emotion label to a genre, case-insensitively.
///
/// Total: unknown or empty labels map to [`FALLBACK_GENRE`].
pub fn map_emotion_to_genre(label: &str) -> Genre {
    label
        .parse::<Emotion>()
        .map(Emotion::genre)
        .unwrap_or(FALLBACK_GENRE)
}
