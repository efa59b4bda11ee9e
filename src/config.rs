//! Application-level configuration loading.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    capture::{CaptureConstraints, Facing, SyntheticFailure},
    inference::InferencePolicy,
    state::game::TiePolicy,
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "BAGTOSS_BACK_CONFIG_PATH";
const DEFAULT_PORT: u16 = 8080;

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureSettings,
    pub classifier: ClassifierSettings,
    pub storage: StorageSettings,
    pub game: GameSettings,
}

/// Camera request and round transition limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub facing: Facing,
    pub bitrate_bps: u32,
    /// Delay between two segments emitted by the synthetic camera.
    pub segment_interval_ms: u64,
    pub segment_size: usize,
    /// Upper bound on device start/finalize work during a transition.
    pub transition_timeout_ms: u64,
    /// Make the synthetic camera refuse to open, to rehearse the error screen.
    pub simulate_failure: Option<SyntheticFailure>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        let constraints = CaptureConstraints::default();
        Self {
            width: constraints.width,
            height: constraints.height,
            facing: constraints.facing,
            bitrate_bps: constraints.bitrate_bps,
            segment_interval_ms: 250,
            segment_size: 4 * 1024,
            transition_timeout_ms: 5_000,
            simulate_failure: None,
        }
    }
}

impl CaptureSettings {
    /// Constraints requested from the camera.
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            width: self.width,
            height: self.height,
            facing: self.facing,
            bitrate_bps: self.bitrate_bps,
            ..CaptureConstraints::default()
        }
    }

    /// Delay between synthetic segments.
    pub fn segment_interval(&self) -> Duration {
        Duration::from_millis(self.segment_interval_ms)
    }

    /// Bound on device work during a transition.
    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Remote classifier endpoint. Without one, a simulated classifier is used.
    pub url: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub simulated_delay_ms: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        let policy = InferencePolicy::default();
        Self {
            url: None,
            timeout_ms: policy.timeout.as_millis() as u64,
            max_retries: policy.max_retries,
            simulated_delay_ms: 1_000,
        }
    }
}

impl ClassifierSettings {
    /// Wait and retry policy for every classification.
    pub fn policy(&self) -> InferencePolicy {
        InferencePolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
        }
    }

    /// Answer delay of the simulated classifier.
    pub fn simulated_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_delay_ms)
    }
}

/// Which key-value backend holds the stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    File,
    Memory,
    Couch,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub kind: StorageKind,
    /// Stats file used by the `file` backend.
    pub path: PathBuf,
    /// CouchDB fallbacks when `COUCH_BASE_URL` / `COUCH_DB` are not set.
    pub couch_url: Option<String>,
    pub couch_database: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            kind: StorageKind::File,
            path: PathBuf::from("data/stats.json"),
            couch_url: None,
            couch_database: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    pub tie_policy: TiePolicy,
    /// Largest value a manual score edit accepts.
    pub max_score: u32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            tie_policy: TiePolicy::default(),
            max_score: 999,
        }
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        storage = ?config.storage.kind,
                        classifier = config.classifier.url.as_deref().unwrap_or("simulated"),
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str(contents)
    }
}

/// Listening port from `PORT` or `SERVER_PORT`.
pub fn server_port() -> u16 {
    env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
