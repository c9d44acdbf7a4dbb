//! Test doubles for the classifier, catalog, camera and display seams.

use crate::engine::ControlEvent;
use crate::sink::{PresentationSink, Update};
use moodify_core::{
    CatalogError, ClassifierError, EmotionClassifier, EmotionResult, TrackCatalog, TrackRecord,
};
use moodify_hw::{CameraError, ChannelOrder, Frame, FrameSource};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub fn emotion(label: &str) -> EmotionResult {
    EmotionResult {
        label: label.to_string(),
        scores: BTreeMap::from([(label.to_string(), 0.9)]),
    }
}

/// A small camera-like frame in BGR order.
pub fn bgr_frame() -> Frame {
    Frame::new(vec![10, 20, 30].repeat(4), 2, 2, ChannelOrder::Bgr).unwrap()
}

/// Returns scripted results in order, then `NoResult` once the script runs out.
pub struct ScriptedClassifier {
    script: VecDeque<Result<EmotionResult, ClassifierError>>,
    inputs: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<Result<EmotionResult, ClassifierError>>) -> Self {
        Self {
            script: script.into(),
            inputs: Arc::default(),
        }
    }

    /// Every RGB buffer passed to `classify`, in call order.
    pub fn inputs(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.inputs)
    }
}

impl EmotionClassifier for ScriptedClassifier {
    fn classify(
        &mut self,
        rgb: &[u8],
        _width: u32,
        _height: u32,
    ) -> Result<EmotionResult, ClassifierError> {
        self.inputs.lock().unwrap().push(rgb.to_vec());
        self.script.pop_front().unwrap_or(Err(ClassifierError::NoResult))
    }
}

/// Catalog with `available` canned tracks that records every query.
pub struct FakeCatalog {
    available: usize,
    fail: bool,
    queries: Arc<Mutex<Vec<String>>>,
}

impl FakeCatalog {
    pub fn new(available: usize) -> Self {
        Self {
            available,
            fail: false,
            queries: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0)
        }
    }

    pub fn queries(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.queries)
    }
}

impl TrackCatalog for FakeCatalog {
    fn search_tracks(&self, query: &str, _limit: usize) -> Result<Vec<TrackRecord>, CatalogError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(CatalogError::Network("connection refused".into()));
        }
        Ok((0..self.available)
            .map(|i| TrackRecord {
                title: format!("Track {i}"),
                artist: format!("Artist {i}"),
                link: format!("https://open.spotify.com/track/{i}"),
            })
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub updates: Vec<Update>,
}

impl RecordingSink {
    pub fn warnings(&self) -> Vec<&str> {
        self.updates
            .iter()
            .filter_map(|u| match u {
                Update::Warning(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<&str> {
        self.updates
            .iter()
            .filter_map(|u| match u {
                Update::Error(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn emotions(&self) -> Vec<&str> {
        self.updates
            .iter()
            .filter_map(|u| match u {
                Update::Emotion(result) => Some(result.label.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tracks(&self) -> Vec<&[TrackRecord]> {
        self.updates
            .iter()
            .filter_map(|u| match u {
                Update::Tracks { tracks, .. } => Some(tracks.as_slice()),
                _ => None,
            })
            .collect()
    }

    pub fn images(&self) -> usize {
        self.updates
            .iter()
            .filter(|u| matches!(u, Update::Image { .. }))
            .count()
    }
}

impl PresentationSink for RecordingSink {
    fn show(&mut self, update: Update) {
        self.updates.push(update);
    }
}

/// Shared handle so tests can inspect a sink after handing it to the engine.
#[derive(Clone, Default)]
pub struct SharedSink(pub Arc<Mutex<RecordingSink>>);

impl PresentationSink for SharedSink {
    fn show(&mut self, update: Update) {
        self.0.lock().unwrap().show(update);
    }
}

/// Serves `frames` BGR frames, then fails. Can inject control events after a
/// given frame number (1-based) to drive the engine from inside the loop.
pub struct FakeCamera {
    frames_left: usize,
    served: usize,
    events: Vec<(usize, ControlEvent)>,
    tx: Option<mpsc::Sender<ControlEvent>>,
    released: Arc<AtomicBool>,
}

impl FakeCamera {
    pub fn new(frames: usize) -> Self {
        Self {
            frames_left: frames,
            served: 0,
            events: Vec::new(),
            tx: None,
            released: Arc::default(),
        }
    }

    pub fn with_events(
        mut self,
        tx: mpsc::Sender<ControlEvent>,
        events: Vec<(usize, ControlEvent)>,
    ) -> Self {
        self.tx = Some(tx);
        self.events = events;
        self
    }

    pub fn released(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }
}

impl FrameSource for FakeCamera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        if self.frames_left == 0 {
            return Err(CameraError::CaptureFailed("no frame".into()));
        }
        self.frames_left -= 1;
        self.served += 1;

        if let Some(tx) = &self.tx {
            let served = self.served;
            for (_, event) in self.events.iter().filter(|(at, _)| *at == served) {
                tx.try_send(event.clone()).unwrap();
            }
        }
        Ok(bgr_frame())
    }
}

impl Drop for FakeCamera {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
