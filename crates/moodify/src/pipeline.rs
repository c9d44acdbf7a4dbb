//! The classify → map → recommend steps shared by the upload and live flows.

use crate::sink::{PresentationSink, Update};
use moodify_core::{
    ClassifierError, EmotionClassifier, EmotionResult, TrackCatalog, TrackRecommender,
};
use moodify_hw::Frame;

pub struct MoodPipeline {
    classifier: Box<dyn EmotionClassifier>,
    recommender: TrackRecommender<Box<dyn TrackCatalog>>,
}

impl MoodPipeline {
    pub fn new(classifier: Box<dyn EmotionClassifier>, catalog: Box<dyn TrackCatalog>) -> Self {
        Self {
            classifier,
            recommender: TrackRecommender::new(catalog),
        }
    }

    /// Classify a frame; the classifier always receives RGB pixels.
    pub fn classify(&mut self, frame: &Frame) -> Result<EmotionResult, ClassifierError> {
        let rgb = frame.to_rgb();
        let result = self.classifier.classify(&rgb, frame.width, frame.height)?;
        tracing::info!(
            emotion = %result.label,
            confidence = ?result.confidence(),
            "emotion classified"
        );
        Ok(result)
    }

    /// Map the emotion to a genre, query the catalog once and show the outcome.
    ///
    /// Returns the number of tracks shown, or `None` if the catalog failed.
    pub fn recommend(
        &self,
        emotion: &EmotionResult,
        sink: &mut dyn PresentationSink,
    ) -> Option<usize> {
        let (genre, result) = self.recommender.recommend_for_emotion(&emotion.label);
        match result {
            Ok(tracks) => {
                let count = tracks.len();
                sink.show(Update::Tracks { genre, tracks });
                Some(count)
            }
            Err(e) => {
                tracing::warn!(%genre, error = %e, "catalog search failed");
                sink.show(Update::Error(format!("Spotify error: {e}")));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{emotion, FakeCatalog, RecordingSink, ScriptedClassifier};
    use moodify_core::Genre;
    use moodify_hw::ChannelOrder;

    #[test]
    fn test_classifier_receives_rgb() {
        let classifier = ScriptedClassifier::new(vec![Ok(emotion("happy"))]);
        let seen = classifier.inputs();
        let mut pipeline = MoodPipeline::new(Box::new(classifier), Box::new(FakeCatalog::new(5)));

        let frame = Frame::new(vec![1, 2, 3], 1, 1, ChannelOrder::Bgr).unwrap();
        let result = pipeline.classify(&frame).unwrap();

        assert_eq!(result.label, "happy");
        assert_eq!(seen.lock().unwrap().as_slice(), &[vec![3, 2, 1]]);
    }

    #[test]
    fn test_recommend_shows_tracks() {
        let catalog = FakeCatalog::new(8);
        let queries = catalog.queries();
        let pipeline = MoodPipeline::new(Box::new(ScriptedClassifier::new(vec![])), Box::new(catalog));
        let mut sink = RecordingSink::default();

        let shown = pipeline.recommend(&emotion("neutral"), &mut sink);

        assert_eq!(shown, Some(5));
        assert_eq!(queries.lock().unwrap().as_slice(), &["genre:lofi".to_string()]);
        match sink.updates.as_slice() {
            [Update::Tracks { genre, tracks }] => {
                assert_eq!(*genre, Genre::Lofi);
                assert_eq!(tracks.len(), 5);
            }
            other => panic!("unexpected updates: {other:?}"),
        }
    }

    #[test]
    fn test_catalog_failure_shows_error() {
        let pipeline = MoodPipeline::new(
            Box::new(ScriptedClassifier::new(vec![])),
            Box::new(FakeCatalog::failing()),
        );
        let mut sink = RecordingSink::default();

        assert_eq!(pipeline.recommend(&emotion("angry"), &mut sink), None);
        assert!(sink.tracks().is_empty());
        assert_eq!(sink.errors().len(), 1);
        assert!(sink.errors()[0].starts_with("Spotify error: "));
    }
}
