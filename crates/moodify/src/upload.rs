//! Single-image flow: decode an uploaded file, classify it, recommend tracks.

use crate::pipeline::MoodPipeline;
use crate::sink::{PresentationSink, Update};
use std::path::Path;

/// How an upload run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Tracks were shown (possibly zero).
    Recommended(usize),
    /// The classifier failed; no catalog request was made.
    DetectionFailed,
    /// The emotion was shown but the catalog request failed.
    CatalogFailed,
    /// The file was rejected or could not be decoded.
    Unreadable,
}

/// Run the upload flow for one file. Every failure is reported to `sink`.
pub fn run_upload(
    pipeline: &mut MoodPipeline,
    path: &Path,
    sink: &mut dyn PresentationSink,
) -> UploadOutcome {
    let frame = match moodify_hw::decode_upload(path) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "upload rejected");
            sink.show(Update::Error(e.to_string()));
            return UploadOutcome::Unreadable;
        }
    };

    sink.show(Update::Status(format!("Analyzing {}...", path.display())));
    sink.show(Update::image(&frame));

    let emotion = match pipeline.classify(&frame) {
        Ok(emotion) => emotion,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "emotion detection failed");
            sink.show(Update::Error(format!("Emotion detection failed: {e}")));
            return UploadOutcome::DetectionFailed;
        }
    };

    sink.show(Update::Emotion(emotion.clone()));
    match pipeline.recommend(&emotion, sink) {
        Some(count) => UploadOutcome::Recommended(count),
        None => UploadOutcome::CatalogFailed,
    }
}
