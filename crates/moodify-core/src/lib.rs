//! moodify-core: Mood-to-recommendation pipeline.
//!
//! Classifies the dominant facial emotion in an image (local ONNX models or a
//! DeepFace-compatible service), maps it to a music genre, and asks a track
//! catalog for recommendations in that genre.

pub mod catalog;
pub mod classifier;
pub mod deepface;
pub mod expression;
pub mod face;
pub mod mood;
pub mod types;

pub use catalog::{CatalogError, TrackCatalog, TrackRecommender, TRACK_LIMIT};
pub use classifier::{ClassifierError, EmotionClassifier};
pub use deepface::DeepFaceClassifier;
pub use expression::ExpressionClassifier;
pub use face::FaceLocator;
pub use mood::map_emotion_to_genre;
pub use types::{Emotion, EmotionResult, FaceRegion, Genre, TrackRecord};

/// Default directory for ONNX model files.
///
/// `$XDG_DATA_HOME/moodify/models`, falling back to `~/.local/share/moodify/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    let data_home = std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        });
    data_home.join("moodify").join("models")
}
