use moodify_spotify::Credentials;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Spotify credentials missing: set SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET or add a [spotify] section to {0}")]
    MissingCredentials(String),
    #[error("failed to read secrets file {path}: {source}")]
    SecretsRead {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid secrets file {path}: {source}")]
    SecretsParse {
        path: String,
        source: toml::de::Error,
    },
    #[error("unknown classifier backend {0:?} (expected \"onnx\" or \"deepface\")")]
    UnknownClassifier(String),
}

/// Which emotion classifier to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierBackend {
    /// Local ONNX expression model, optionally with SCRFD face cropping.
    Onnx,
    /// DeepFace-compatible HTTP service.
    DeepFace,
}

impl FromStr for ClassifierBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "deepface" => Ok(Self::DeepFace),
            _ => Err(ConfigError::UnknownClassifier(s.to_string())),
        }
    }
}

/// `secrets.toml` layout: `[spotify] client_id = "..." client_secret = "..."`.
#[derive(Debug, Default, Deserialize)]
struct SecretsFile {
    spotify: Option<SpotifySecrets>,
}

#[derive(Debug, Default, Deserialize)]
struct SpotifySecrets {
    client_id: Option<String>,
    client_secret: Option<String>,
}

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Minimum time between emotion analyses while streaming.
    pub analysis_interval: Duration,
    /// Delay between control-loop iterations while streaming.
    pub poll_interval: Duration,
    pub classifier: ClassifierBackend,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Root URL of the DeepFace-compatible service.
    pub deepface_url: String,
    /// Optional Spotify market (ISO 3166-1 alpha-2) for search results.
    pub market: Option<String>,
    /// Secrets file consulted for credentials missing from the environment.
    pub secrets_path: PathBuf,
    spotify: Option<Credentials>,
}

impl Config {
    /// Load configuration from `MOODIFY_*` / `SPOTIFY_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let secrets_path = lookup("MOODIFY_SECRETS")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_config_dir(&lookup).join("secrets.toml"));
        let secrets = load_secrets(&secrets_path)?
            .spotify
            .unwrap_or_default();

        // Environment wins over the secrets file, field by field.
        let client_id = lookup("SPOTIFY_CLIENT_ID").or(secrets.client_id);
        let client_secret = lookup("SPOTIFY_CLIENT_SECRET").or(secrets.client_secret);
        let spotify = match (client_id, client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some(Credentials::new(id, secret))
            }
            _ => None,
        };

        let classifier = match lookup("MOODIFY_CLASSIFIER") {
            Some(v) => v.parse()?,
            None => ClassifierBackend::Onnx,
        };

        let model_dir = lookup("MOODIFY_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(moodify_core::default_model_dir);

        Ok(Self {
            camera_device: lookup("MOODIFY_CAMERA_DEVICE")
                .unwrap_or_else(|| "/dev/video0".to_string()),
            analysis_interval: Duration::from_secs(parse_or(
                &lookup,
                "MOODIFY_ANALYSIS_INTERVAL_SECS",
                3,
            )),
            poll_interval: Duration::from_millis(parse_or(&lookup, "MOODIFY_POLL_INTERVAL_MS", 33)),
            classifier,
            model_dir,
            deepface_url: lookup("MOODIFY_DEEPFACE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:5005".to_string()),
            market: lookup("MOODIFY_MARKET").filter(|m| !m.is_empty()),
            secrets_path,
            spotify,
        })
    }

    /// Spotify credentials, required before the first catalog call.
    pub fn spotify_credentials(&self) -> Result<Credentials, ConfigError> {
        self.spotify.clone().ok_or_else(|| {
            ConfigError::MissingCredentials(self.secrets_path.display().to_string())
        })
    }

    /// Path to the facial-expression model.
    pub fn expression_model_path(&self) -> String {
        self.model_dir
            .join("facial_expression.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the SCRFD face detection model.
    pub fn face_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn default_config_dir(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("moodify")
}

/// A missing secrets file is not an error; an unreadable or malformed one is.
fn load_secrets(path: &Path) -> Result<SecretsFile, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SecretsFile::default()),
        Err(source) => {
            return Err(ConfigError::SecretsRead {
                path: path.display().to_string(),
                source,
            })
        }
    };
    toml::from_str(&text).map_err(|source| ConfigError::SecretsParse {
        path: path.display().to_string(),
        source,
    })
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
