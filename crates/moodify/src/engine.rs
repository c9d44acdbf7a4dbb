use crate::pipeline::MoodPipeline;
use crate::session::{request_recommendations, LiveSession};
use crate::sink::{PresentationSink, Update, MSG_CAPTURE_FAILED};
use moodify_hw::{CameraError, FrameSource};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine startup failed: {0}")]
    Startup(String),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// User commands delivered to the engine thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Toggle streaming on or off.
    SetStreaming(bool),
    RequestRecommendations,
    Shutdown,
}

/// Parse a line typed by the user. Unknown input yields `None`.
pub fn parse_command(line: &str) -> Option<ControlEvent> {
    match line.trim().to_ascii_lowercase().as_str() {
        "start" => Some(ControlEvent::SetStreaming(true)),
        "stop" => Some(ControlEvent::SetStreaming(false)),
        "r" | "recommend" => Some(ControlEvent::RequestRecommendations),
        "q" | "quit" | "exit" => Some(ControlEvent::Shutdown),
        _ => None,
    }
}

/// Opens a fresh frame source each time streaming starts.
pub type SourceFactory = Box<dyn FnMut() -> Result<Box<dyn FrameSource>, CameraError> + Send>;

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub analysis_interval: Duration,
    /// Sleep between streaming iterations.
    pub poll_interval: Duration,
}

/// Drive the Idle/Streaming state machine until `Shutdown` or the channel closes.
///
/// While idle the loop blocks on the channel. While streaming it drains pending
/// events, runs one session step, then sleeps for the poll interval. The frame
/// source is dropped when streaming stops, capture fails or the loop exits.
pub fn run_control_loop(
    rx: &mut mpsc::Receiver<ControlEvent>,
    pipeline: &mut MoodPipeline,
    open_source: &mut SourceFactory,
    sink: &mut dyn PresentationSink,
    settings: LoopSettings,
) {
    let mut source: Option<Box<dyn FrameSource>> = None;
    let mut session = LiveSession::new(settings.analysis_interval);

    loop {
        if source.is_none() {
            match rx.blocking_recv() {
                None | Some(ControlEvent::Shutdown) => break,
                Some(ControlEvent::SetStreaming(true)) => match open_source() {
                    Ok(opened) => {
                        tracing::info!("streaming started");
                        session = LiveSession::new(settings.analysis_interval);
                        source = Some(opened);
                        sink.show(Update::Status("Streaming started.".into()));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to open camera");
                        sink.show(Update::Error(MSG_CAPTURE_FAILED.to_string()));
                    }
                },
                Some(ControlEvent::SetStreaming(false)) => {}
                Some(ControlEvent::RequestRecommendations) => {
                    request_recommendations(pipeline, None, sink);
                }
            }
            continue;
        }

        let mut recommend = false;
        let mut stop = false;
        let mut shutdown = false;
        loop {
            match rx.try_recv() {
                Ok(ControlEvent::SetStreaming(on)) => stop = !on,
                Ok(ControlEvent::RequestRecommendations) => recommend = true,
                Ok(ControlEvent::Shutdown) | Err(TryRecvError::Disconnected) => {
                    shutdown = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        if shutdown {
            break;
        }
        if stop {
            if recommend {
                request_recommendations(pipeline, session.last_emotion(), sink);
            }
            source = None;
            tracing::info!("streaming stopped");
            sink.show(Update::Status("Streaming stopped.".into()));
            continue;
        }

        let Some(active) = source.as_mut() else {
            continue;
        };
        if session
            .step(pipeline, active.as_mut(), Instant::now(), recommend, sink)
            .is_err()
        {
            source = None;
            tracing::info!("streaming stopped after capture failure");
            continue;
        }

        if !settings.poll_interval.is_zero() {
            std::thread::sleep(settings.poll_interval);
        }
    }

    drop(source);
    tracing::info!("control loop exited");
}

/// Handle to the engine thread.
pub struct EngineHandle {
    tx: mpsc::Sender<ControlEvent>,
    thread: std::thread::JoinHandle<()>,
}

impl EngineHandle {
    pub async fn send(&self, event: ControlEvent) -> Result<(), EngineError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    /// Wait for the engine thread to finish. Blocks the calling thread.
    pub fn join(self) {
        drop(self.tx);
        if self.thread.join().is_err() {
            tracing::error!("engine thread panicked");
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// `build` runs on that thread so blocking HTTP clients and ONNX sessions are
/// created and dropped outside the async runtime. Startup failures are reported
/// back before this returns.
pub async fn spawn_engine<B>(
    build: B,
    mut open_source: SourceFactory,
    mut sink: Box<dyn PresentationSink + Send>,
    settings: LoopSettings,
) -> Result<EngineHandle, EngineError>
where
    B: FnOnce() -> anyhow::Result<MoodPipeline> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<ControlEvent>(16);
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();

    let thread = std::thread::Builder::new()
        .name("moodify-engine".into())
        .spawn(move || {
            let mut pipeline = match build() {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("{e:#}")));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            tracing::info!("engine thread started");
            run_control_loop(&mut rx, &mut pipeline, &mut open_source, sink.as_mut(), settings);
            tracing::info!("engine thread exiting");
        })?;

    match ready_rx.await {
        Ok(Ok(())) => Ok(EngineHandle { tx, thread }),
        Ok(Err(message)) => Err(EngineError::Startup(message)),
        Err(_) => Err(EngineError::ChannelClosed),
    }
}
