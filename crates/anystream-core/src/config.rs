//! Application configuration types.
//!
//! The top-level [`Config`] is deserialized from JSON. Every section
//! defaults sensibly so an empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub tools: ToolsConfig,
    pub streaming: StreamingConfig,
    pub import: ImportConfig,
    pub events: EventsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.auth.enabled && self.auth.api_key.as_deref().unwrap_or("").is_empty() {
            warnings.push("auth is enabled but api_key is not set; every request will be rejected".into());
        }

        let s = &self.streaming;
        if s.segment_duration_secs == 0 {
            warnings.push("streaming.segment_duration_secs is 0; using 1".into());
        }
        if s.session_idle_timeout_secs < s.cleanup_interval_secs {
            warnings.push(format!(
                "streaming.session_idle_timeout_secs ({}) is shorter than cleanup_interval_secs ({})",
                s.session_idle_timeout_secs, s.cleanup_interval_secs
            ));
        }
        if s.completion_threshold_percent == 0 || s.completion_threshold_percent > 100 {
            warnings.push(format!(
                "streaming.completion_threshold_percent {} is outside 1..=100",
                s.completion_threshold_percent
            ));
        }

        if self.import.probe_concurrency == 0 {
            warnings.push("import.probe_concurrency is 0; using 1".into());
        }
        if self.import.extensions.is_empty() {
            warnings.push("import.extensions is empty; every file will be considered".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8888,
            db_path: PathBuf::from("/data/anystream.db"),
            static_dir: None,
        }
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
}

/// Paths to external CLI tools. Unset entries are looked up on `PATH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Streaming session and transcode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Root for transcode output (`<data_dir>/transcode/<token>`) and
    /// previews (`<data_dir>/previews/<media_ref_id>`).
    pub data_dir: PathBuf,
    pub segment_duration_secs: u32,
    pub session_idle_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    pub sessions_poll_interval_secs: u64,
    pub video_crf: u32,
    pub video_preset: String,
    pub audio_bitrate: String,
    pub max_height: u32,
    pub completion_threshold_percent: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data/anystream"),
            segment_duration_secs: 6,
            session_idle_timeout_secs: 300,
            cleanup_interval_secs: 30,
            sessions_poll_interval_secs: 2,
            video_crf: 23,
            video_preset: "veryfast".into(),
            audio_bitrate: "192k".into(),
            max_height: 1080,
            completion_threshold_percent: 90,
        }
    }
}

impl StreamingConfig {
    /// Directory that holds per-session transcode output.
    pub fn transcode_dir(&self) -> PathBuf {
        self.data_dir.join("transcode")
    }

    /// Directory that holds preview thumbnails.
    pub fn previews_dir(&self) -> PathBuf {
        self.data_dir.join("previews")
    }

    pub fn segment_duration(&self) -> u32 {
        self.segment_duration_secs.max(1)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    pub fn sessions_poll_interval(&self) -> Duration {
        Duration::from_secs(self.sessions_poll_interval_secs.max(1))
    }
}

/// Media import settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Lower-case file extensions considered importable.
    pub extensions: Vec<String>,
    /// Maximum number of probes running at once during a batch import.
    pub probe_concurrency: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            extensions: ["mkv", "mp4", "m4v", "avi", "mov", "webm", "ts", "wmv"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            probe_concurrency: 4,
        }
    }
}

/// Event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Per-subscriber queue length before the oldest events are dropped.
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_is_valid() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.streaming.segment_duration_secs, 6);
        assert_eq!(config.streaming.completion_threshold_percent, 90);
        assert_eq!(config.import.probe_concurrency, 4);
    }

    #[test]
    fn default_config_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config =
            Config::from_json(r#"{"streaming": {"segment_duration_secs": 4}}"#).unwrap();
        assert_eq!(config.streaming.segment_duration_secs, 4);
        assert_eq!(config.streaming.video_preset, "veryfast");
    }

    #[test]
    fn auth_without_key_warns() {
        let mut config = Config::default();
        config.auth.enabled = true;
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("api_key")));
    }

    #[test]
    fn bad_threshold_warns() {
        let mut config = Config::default();
        config.streaming.completion_threshold_percent = 150;
        assert!(config
            .validate()
            .iter()
            .any(|w| w.contains("completion_threshold_percent")));
    }

    #[test]
    fn invalid_json_is_validation_error() {
        let err = Config::from_json("{not json").unwrap_err();
        assert_eq!(err.http_status(), 422);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let config = Config::load_or_default(Some(Path::new("/nonexistent/anystream.json")));
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn derived_dirs() {
        let mut s = StreamingConfig::default();
        s.data_dir = PathBuf::from("/tmp/as");
        assert_eq!(s.transcode_dir(), PathBuf::from("/tmp/as/transcode"));
        assert_eq!(s.previews_dir(), PathBuf::from("/tmp/as/previews"));
        s.segment_duration_secs = 0;
        assert_eq!(s.segment_duration(), 1);
    }
}
