//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML and carries the
//! database, transcode and tool sections. Every section defaults sensibly so
//! an empty file is valid. Environment variables override file values via
//! [`Config::apply_env_overrides`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::{presets, Error};

/// Overrides the ffmpeg binary location.
pub const ENV_FFMPEG_PATH: &str = "FFMPEG_PATH";
/// Overrides `database.path`.
pub const ENV_DB_PATH: &str = "TUBECODE_DB_PATH";
/// Overrides `transcode.output_dir`.
pub const ENV_OUTPUT_DIR: &str = "TUBECODE_OUTPUT_DIR";
/// Overrides `transcode.workers`.
pub const ENV_WORKERS: &str = "TUBECODE_WORKERS";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub transcode: TranscodeConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path.
    ///
    /// Unlike [`Config::load_or_default`] this fails when the file is missing
    /// or malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|e| {
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

    /// Apply environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_FFMPEG_PATH).filter(|v| !v.is_empty()) {
            self.tools.ffmpeg_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR).filter(|v| !v.is_empty()) {
            self.transcode.output_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_WORKERS) {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.transcode.workers = n,
                Err(e) => tracing::warn!("Ignoring {ENV_WORKERS}={raw:?}: {e}"),
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.transcode.workers == 0 {
            warnings.push("transcode.workers is 0; one worker will be started".into());
        }
        if self.transcode.queue_capacity == 0 {
            warnings.push("transcode.queue_capacity is 0; a capacity of 1 will be used".into());
        }
        if self.transcode.job_timeout_secs == Some(0) {
            warnings.push("transcode.job_timeout_secs is 0; every encode will time out".into());
        }
        for label in &self.transcode.default_qualities {
            if !presets::is_known(label) {
                warnings.push(format!(
                    "transcode.default_qualities contains unknown preset '{label}'"
                ));
            }
        }
        if let Some(ref p) = self.tools.ffmpeg_path {
            if !p.exists() {
                warnings.push(format!(
                    "tools.ffmpeg_path {} does not exist; PATH will be searched",
                    p.display()
                ));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Durable store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/tubecode.db"),
        }
    }
}

/// Worker pool and rendition output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub output_dir: PathBuf,
    /// Number of workers, which is also the maximum number of concurrent
    /// encoder processes.
    pub workers: usize,
    pub queue_capacity: usize,
    /// Optional per-job deadline; the encoder is killed when it elapses.
    pub job_timeout_secs: Option<u64>,
    /// Delete partially written outputs after a failed, timed out or
    /// cancelled encode.
    pub cleanup_failed_outputs: bool,
    /// Qualities the CLI requests when none are given.
    pub default_qualities: Vec<String>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./data/renditions"),
            workers: 2,
            queue_capacity: 100,
            job_timeout_secs: None,
            cleanup_failed_outputs: false,
            default_qualities: vec!["360p".into(), "720p".into()],
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
}
