//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/chunkup/config.toml`
//! - Windows: `%APPDATA%/chunkup/config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use chunkup_uploader::{MismatchPolicy, UploadConfig};
use serde::{Deserialize, Serialize};

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket URL of the upload server.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Chunk size in bytes for new uploads.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Maximum chunks in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Directory holding resume state.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Minimum milliseconds between progress lines.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Refuse to upload a file that does not match an interrupted upload,
    /// instead of discarding the interrupted one.
    #[serde(default)]
    pub strict_resume: bool,
}

fn default_server_url() -> String {
    "ws://127.0.0.1:8420/ws".into()
}

fn default_chunk_size() -> u64 {
    chunkup_transfer::DEFAULT_CHUNK_SIZE
}

fn default_concurrency() -> usize {
    4
}

fn default_state_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let local =
            std::env::var("LOCALAPPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData\\Local".into());
        PathBuf::from(local).join("chunkup")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".local").join("share").join("chunkup")
    }
}

fn default_progress_interval_ms() -> u64 {
    250
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
            state_dir: default_state_dir(),
            progress_interval_ms: default_progress_interval_ms(),
            strict_resume: false,
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the platform default),
    /// creating a default file if none exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Resume state file for uploads made with this configuration.
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("resume.json")
    }

    /// Upload tunables derived from this configuration.
    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunk_size: self.chunk_size,
            concurrency: self.concurrency,
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            on_mismatch: if self.strict_resume {
                MismatchPolicy::Strict
            } else {
                MismatchPolicy::Discard
            },
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("chunkup")
            .join("config.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("chunkup").join("config.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/chunkup/config.toml"))
    }
}
