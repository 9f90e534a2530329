//! Configuration management for the Hound client
//!
//! Handles config file loading/saving and environment overrides.
//! Config is stored at ~/.config/hound/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::client::DEFAULT_CLIENT_NAME;

/// Default backend address (the server's development port)
pub const DEFAULT_SERVER_URL: &str = "http://localhost:2323";

/// Progress below this position is never reported (5 minutes)
pub const DEFAULT_PROGRESS_FLOOR_SECS: u64 = 300;

/// Minimum spacing between two progress reports
pub const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 30;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hound server base URL
    pub server_url: String,
    /// Value of the `X-Client` header
    pub client_name: String,
    /// Cookie header carrying the login session
    pub session_cookie: Option<String>,
    /// Preferred local player (vlc, mpv)
    pub player: Option<String>,
    /// Progress reporting floor in seconds
    pub progress_floor_secs: u64,
    /// Progress reporting interval in seconds
    pub progress_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            session_cookie: None,
            player: None,
            progress_floor_secs: DEFAULT_PROGRESS_FLOOR_SECS,
            progress_interval_secs: DEFAULT_PROGRESS_INTERVAL_SECS,
        }
    }
}

impl Config {
    /// Get config file path (~/.config/hound/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("hound").join("config.toml"))
    }

    /// Load config from the default location with environment overrides
    pub fn load() -> Self {
        Self::path()
            .map(|p| Self::load_from(&p))
            .unwrap_or_default()
            .with_env_overrides()
    }

    /// Load config from a specific file, or return default if missing/invalid
    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Apply HOUND_SERVER_URL / HOUND_SESSION
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var("HOUND_SERVER_URL").ok(),
            std::env::var("HOUND_SESSION").ok(),
        )
    }

    fn with_overrides(mut self, server_url: Option<String>, session: Option<String>) -> Self {
        if let Some(url) = server_url.filter(|u| !u.is_empty()) {
            self.server_url = url;
        }
        if let Some(cookie) = session.filter(|c| !c.is_empty()) {
            self.session_cookie = Some(cookie);
        }
        self
    }

    /// Save config to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn progress_floor(&self) -> Duration {
        Duration::from_secs(self.progress_floor_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}
