//! Encoder binary discovery.
//!
//! ffmpeg is located from the configured path (which the `FFMPEG_PATH`
//! environment override feeds), falling back to a `PATH` search.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tc_core::config::ToolsConfig;

use crate::command::ToolCommand;

const FFMPEG: &str = "ffmpeg";

/// Deadline for `ffmpeg -version`.
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Availability information for a tool, returned by [`check_ffmpeg`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// Version string (first line of `-version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Locate the ffmpeg executable.
///
/// A configured path is used directly when it exists; a configured bare name
/// is searched for in `PATH`. If neither works the default name is searched
/// for in `PATH`.
pub fn resolve_ffmpeg(tools: &ToolsConfig) -> tc_core::Result<PathBuf> {
    if let Some(custom) = tools.ffmpeg_path.as_deref() {
        if let Some(found) = resolve_custom(custom) {
            return Ok(found);
        }
        tracing::warn!(
            path = %custom.display(),
            "configured ffmpeg not found; falling back to PATH"
        );
    }

    which::which(FFMPEG).map_err(|_| {
        tc_core::Error::tool(FFMPEG, "ffmpeg not found; is it installed and in PATH?")
    })
}

fn resolve_custom(custom: &Path) -> Option<PathBuf> {
    if custom.is_file() {
        return Some(custom.to_path_buf());
    }
    which::which(custom).ok()
}

/// Resolve ffmpeg and report its version.
pub async fn check_ffmpeg(tools: &ToolsConfig) -> ToolInfo {
    match resolve_ffmpeg(tools) {
        Ok(path) => {
            let version = detect_version(&path).await;
            ToolInfo {
                name: FFMPEG.to_string(),
                available: version.is_some(),
                version,
                path: Some(path),
            }
        }
        Err(e) => {
            tracing::debug!("{e}");
            ToolInfo {
                name: FFMPEG.to_string(),
                available: false,
                version: None,
                path: None,
            }
        }
    }
}

/// Run `<ffmpeg> -version` and return the first line of stdout.
async fn detect_version(path: &Path) -> Option<String> {
    let output = ToolCommand::new(path.to_path_buf())
        .arg("-version")
        .timeout(VERSION_TIMEOUT)
        .execute()
        .await
        .ok()?;

    output.stdout.lines().next().map(|s| s.to_string())
}
