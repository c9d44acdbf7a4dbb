mod config;
mod engine;
mod pipeline;
mod session;
mod sink;
mod upload;

#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::{ClassifierBackend, Config};
use engine::{ControlEvent, LoopSettings, SourceFactory};
use moodify_core::{
    ClassifierError, DeepFaceClassifier, EmotionClassifier, ExpressionClassifier, FaceLocator,
};
use moodify_hw::{Camera, FrameSource};
use moodify_spotify::SpotifyClient;
use pipeline::MoodPipeline;
use sink::TerminalSink;
use std::io::BufRead;
use std::path::PathBuf;
use tokio::sync::mpsc;
use upload::UploadOutcome;

#[derive(Parser)]
#[command(name = "moodify", about = "Music recommendations from your facial expression")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream from the webcam; control with start, stop, r and quit on stdin
    Live,
    /// Analyze image files (jpg, jpeg, png), each independently
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show the genre an emotion maps to
    Genre {
        /// Emotion label, e.g. "happy"
        emotion: String,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Live => run_live(Config::from_env()?).await?,
        Commands::Upload { files } => {
            let config = Config::from_env()?;
            tokio::task::spawn_blocking(move || run_uploads(&config, &files)).await??;
        }
        Commands::Genre { emotion } => {
            let genre = moodify_core::map_emotion_to_genre(&emotion);
            println!("{emotion}: {genre} (query \"{}\")", genre.search_query());
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for device in devices {
                println!("{}  {} [{}] {}", device.path, device.name, device.driver, device.bus);
            }
        }
    }

    Ok(())
}

/// Build the classifier and catalog chosen by the configuration.
///
/// Blocking: creates ONNX sessions and a blocking HTTP client, so call it off
/// the async runtime.
fn build_pipeline(config: &Config) -> Result<MoodPipeline> {
    let classifier: Box<dyn EmotionClassifier> = match config.classifier {
        ClassifierBackend::Onnx => {
            let locator = match FaceLocator::load(&config.face_model_path()) {
                Ok(locator) => Some(locator),
                Err(ClassifierError::ModelNotFound(path)) => {
                    tracing::warn!(path = %path, "face model not found; classifying whole frames");
                    None
                }
                Err(e) => return Err(e.into()),
            };
            let model_path = config.expression_model_path();
            let classifier = ExpressionClassifier::load(&model_path, locator)?;
            tracing::info!(path = %model_path, "expression model loaded");
            Box::new(classifier)
        }
        ClassifierBackend::DeepFace => Box::new(DeepFaceClassifier::new(&config.deepface_url)?),
    };

    let catalog = SpotifyClient::new(config.spotify_credentials()?, config.market.clone())?;
    Ok(MoodPipeline::new(classifier, Box::new(catalog)))
}

fn run_uploads(config: &Config, files: &[PathBuf]) -> Result<()> {
    let mut pipeline = build_pipeline(config)?;
    let mut sink = TerminalSink::default();

    let mut failed = 0;
    for path in files {
        let outcome = upload::run_upload(&mut pipeline, path, &mut sink);
        tracing::debug!(path = %path.display(), ?outcome, "upload finished");
        if !matches!(outcome, UploadOutcome::Recommended(_)) {
            failed += 1;
        }
        println!();
    }

    if failed == files.len() {
        anyhow::bail!("no recommendations produced for {failed} file(s)");
    }
    Ok(())
}

async fn run_live(config: Config) -> Result<()> {
    let device = config.camera_device.clone();
    let open_source: SourceFactory = Box::new(move || {
        let camera = Camera::open(&device)?;
        tracing::info!(
            device = %camera.device_path,
            width = camera.width,
            height = camera.height,
            fourcc = ?camera.fourcc,
            "camera opened"
        );
        Ok(Box::new(camera) as Box<dyn FrameSource>)
    });
    let settings = LoopSettings {
        analysis_interval: config.analysis_interval,
        poll_interval: config.poll_interval,
    };

    let handle = engine::spawn_engine(
        move || build_pipeline(&config),
        open_source,
        Box::new(TerminalSink::default()),
        settings,
    )
    .await?;

    println!("Commands: start, stop, r (recommendations), quit");

    let mut lines = spawn_stdin_reader();
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    handle.send(ControlEvent::Shutdown).await.ok();
                    break;
                };
                match engine::parse_command(&line) {
                    Some(ControlEvent::Shutdown) => {
                        handle.send(ControlEvent::Shutdown).await.ok();
                        break;
                    }
                    Some(event) => handle.send(event).await?,
                    None if line.trim().is_empty() => {}
                    None => eprintln!("unknown command: {}", line.trim()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                handle.send(ControlEvent::Shutdown).await.ok();
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || handle.join()).await?;
    Ok(())
}

/// Forward stdin lines from a detached thread so a pending read never holds up exit.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}
