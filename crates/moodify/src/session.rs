//! One streaming session of the webcam flow: capture, throttled analysis,
//! and on-demand recommendations from the last detected emotion.

use crate::pipeline::MoodPipeline;
use crate::sink::{
    PresentationSink, Update, MSG_CAPTURE_FAILED, MSG_NO_EMOTION_YET, MSG_UNABLE_TO_DETECT,
};
use moodify_core::EmotionResult;
use moodify_hw::{CameraError, FrameSource};
use std::time::{Duration, Instant};

/// Per-session state, reset every time streaming starts.
#[derive(Debug, Default)]
pub struct SessionState {
    last_analysis: Option<Instant>,
    last_emotion: Option<EmotionResult>,
}

impl SessionState {
    /// True when no analysis has succeeded yet or more than `interval` has passed since.
    pub fn analysis_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_analysis {
            None => true,
            Some(last) => now.saturating_duration_since(last) > interval,
        }
    }

    /// Store a successful analysis.
    pub fn record(&mut self, now: Instant, emotion: EmotionResult) {
        self.last_analysis = Some(now);
        self.last_emotion = Some(emotion);
    }

    pub fn last_emotion(&self) -> Option<&EmotionResult> {
        self.last_emotion.as_ref()
    }
}

pub struct LiveSession {
    state: SessionState,
    interval: Duration,
}

impl LiveSession {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: SessionState::default(),
            interval,
        }
    }

    pub fn last_emotion(&self) -> Option<&EmotionResult> {
        self.state.last_emotion()
    }

    /// Run one iteration of the streaming loop.
    ///
    /// Returns `Err` only when no frame could be captured; the caller must then
    /// leave streaming and release the source. A recommendation request is
    /// still answered from the cached emotion in that case.
    pub fn step(
        &mut self,
        pipeline: &mut MoodPipeline,
        source: &mut dyn FrameSource,
        now: Instant,
        recommend_requested: bool,
        sink: &mut dyn PresentationSink,
    ) -> Result<(), CameraError> {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "frame capture failed");
                sink.show(Update::Error(MSG_CAPTURE_FAILED.to_string()));
                if recommend_requested {
                    request_recommendations(pipeline, self.state.last_emotion(), sink);
                }
                return Err(e);
            }
        };
        sink.show(Update::image(&frame));

        if self.state.analysis_due(now, self.interval) {
            match pipeline.classify(&frame) {
                Ok(emotion) => {
                    sink.show(Update::Emotion(emotion.clone()));
                    self.state.record(now, emotion);
                }
                // Timestamp untouched: the next frame is analyzed right away.
                Err(e) => {
                    tracing::debug!(error = %e, sequence = frame.sequence, "no emotion in frame");
                    sink.show(Update::Warning(MSG_UNABLE_TO_DETECT.to_string()));
                }
            }
        }

        if recommend_requested {
            request_recommendations(pipeline, self.state.last_emotion(), sink);
        }
        Ok(())
    }
}

/// Recommend from the cached emotion, or warn that none has been detected.
pub fn request_recommendations(
    pipeline: &MoodPipeline,
    emotion: Option<&EmotionResult>,
    sink: &mut dyn PresentationSink,
) {
    match emotion {
        Some(emotion) => {
            pipeline.recommend(emotion, sink);
        }
        None => sink.show(Update::Warning(MSG_NO_EMOTION_YET.to_string())),
    }
}
