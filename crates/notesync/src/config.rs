//! Repository configuration.
//!
//! Loaded from `.notesync/config.toml`; missing keys take their defaults.
//! Command-line flags (and their `NOTESYNC_*` environment variables) are
//! applied on top by the caller.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const NOTESYNC_DIR: &str = ".notesync";
pub const CONFIG_FILE: &str = "config.toml";
pub const SQLITE_FILE: &str = "notes.sqlite";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Files,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote store base URL. Without one the CLI stays offline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    pub backend: Backend,
    pub offline: bool,
    pub conflict_window_ms: u64,
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: None,
            backend: Backend::Files,
            offline: false,
            conflict_window_ms: 1000,
            refresh_interval_secs: 30,
            request_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load `config.toml` from a notesync directory, or defaults if absent.
    pub fn load(notesync_dir: &Path) -> Result<Self> {
        let path = notesync_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.server_url = normalize_url(config.server_url);
        Ok(config)
    }

    pub fn save(&self, notesync_dir: &Path) -> Result<()> {
        let path = notesync_dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))
    }

    pub fn set_server_url(&mut self, url: Option<String>) {
        if let Some(url) = url {
            self.server_url = normalize_url(Some(url));
        }
    }

    /// Values beyond `i64::MAX` milliseconds saturate.
    pub fn conflict_window(&self) -> chrono::Duration {
        let ms = i64::try_from(self.conflict_window_ms).unwrap_or(i64::MAX);
        chrono::Duration::milliseconds(ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// An empty URL means "no server".
fn normalize_url(url: Option<String>) -> Option<String> {
    url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty())
}

/// Find the .notesync directory by searching up from `start`.
pub fn find_notesync_dir(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(NOTESYNC_DIR);
        if candidate.is_dir() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}
