//! Presentation boundary: display updates pushed out of the pipeline.

use moodify_core::{EmotionResult, Genre, TrackRecord};
use moodify_hw::Frame;

pub const MSG_CAPTURE_FAILED: &str = "Failed to access webcam.";
pub const MSG_UNABLE_TO_DETECT: &str = "Unable to detect emotion.";
pub const MSG_NO_EMOTION_YET: &str = "Emotion not detected yet. Please look at the camera.";

/// One update for the display surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Status(String),
    /// Captured or uploaded image, RGB order.
    Image { width: u32, height: u32, rgb: Vec<u8> },
    Emotion(EmotionResult),
    Tracks { genre: Genre, tracks: Vec<TrackRecord> },
    Warning(String),
    Error(String),
}

impl Update {
    /// Image update for a frame, converted to the RGB order displays expect.
    pub fn image(frame: &Frame) -> Self {
        Update::Image {
            width: frame.width,
            height: frame.height,
            rgb: frame.to_rgb(),
        }
    }
}

/// Receives display updates. Implementations must not block for long.
pub trait PresentationSink {
    fn show(&mut self, update: Update);
}

/// Renders updates as text on stdout/stderr.
#[derive(Default)]
pub struct TerminalSink {
    frames: u64,
}

impl PresentationSink for TerminalSink {
    fn show(&mut self, update: Update) {
        match update {
            Update::Status(text) => println!("{text}"),
            Update::Image { width, height, .. } => {
                self.frames += 1;
                tracing::trace!(width, height, frames = self.frames, "frame displayed");
            }
            Update::Emotion(result) => {
                println!("### Detected Emotion: **{}**", result.display_label());
            }
            Update::Tracks { genre, tracks } => {
                println!("Recommended Tracks ({genre}):");
                if tracks.is_empty() {
                    println!("  no tracks found");
                }
                for line in track_lines(&tracks) {
                    println!("{line}");
                }
            }
            Update::Warning(text) => eprintln!("warning: {text}"),
            Update::Error(text) => eprintln!("error: {text}"),
        }
    }
}

/// Numbered markdown-style links: `1. [Title by Artist](link)`.
pub fn track_lines(tracks: &[TrackRecord]) -> Vec<String> {
    tracks
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{}. [{} by {}]({})", i + 1, t.title, t.artist, t.link))
        .collect()
}
