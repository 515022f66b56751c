// ShelfSync - Offline Library Sync for Audiobookshelf
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Download configuration
//!
//! # Data Location
//! - Desktop (macOS): ~/Library/Application Support/ShelfSync/
//! - Desktop (Linux): ~/.local/share/ShelfSync/
//! - Desktop (Windows): %APPDATA%/ShelfSync/
//! - Mobile: supplied by the host app (shared app-group container when available)

use crate::error::{Result, ShelfError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server connection used by the CLI and the client registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Stable connection identifier (part of every item identifier)
    pub id: String,
    /// Base URL of the server, e.g. `https://abs.example.com/`
    pub server_url: String,
    /// Bearer token
    pub access_token: Option<String>,
}

/// Download subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Local application data directory
    pub data_directory: PathBuf,

    /// Container shared with app extensions; preferred over `data_directory` for downloads
    pub shared_container: Option<PathBuf>,

    /// SQLite database path (defaults to `<data_directory>/shelf.db`)
    pub database_path: Option<PathBuf>,

    /// Maximum number of transfers in flight at once
    pub max_active_transfers: usize,

    /// Failed attempts tolerated per asset before the owning item is removed
    pub asset_attempt_limit: u32,

    /// Whether to download over expensive or constrained network paths
    pub allow_cellular_downloads: bool,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,

    /// Capacity of the status/progress broadcast channel
    pub event_channel_capacity: usize,

    /// Known server connections
    pub connections: Vec<ConnectionConfig>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            data_directory: default_data_directory(),
            shared_container: None,
            database_path: None,
            max_active_transfers: 4,
            asset_attempt_limit: 3,
            allow_cellular_downloads: true,
            request_timeout_secs: 120,
            event_channel_capacity: 256,
            connections: Vec::new(),
        }
    }
}

impl DownloadConfig {
    /// Config rooted at a specific directory, everything else default
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            data_directory: root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            ShelfError::ConfigurationError(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty-printed JSON
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_active_transfers == 0 {
            return Err(ShelfError::ConfigurationError(
                "max_active_transfers must be at least 1".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(ShelfError::ConfigurationError(
                "event_channel_capacity must be at least 1".to_string(),
            ));
        }
        for connection in &self.connections {
            url::Url::parse(&connection.server_url).map_err(|e| {
                ShelfError::ConfigurationError(format!(
                    "Connection '{}' has an invalid server URL: {}",
                    connection.id, e
                ))
            })?;
        }
        Ok(())
    }

    /// Root directory that holds the download tree
    pub fn storage_root(&self) -> &Path {
        self.shared_container
            .as_deref()
            .unwrap_or(self.data_directory.as_path())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_directory.join("shelf.db"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connection(&self, id: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|c| c.id == id)
    }
}

/// Platform-specific application data directory
pub fn default_data_directory() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join("Library")
            .join("Application Support")
            .join("ShelfSync")
    }

    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("ShelfSync")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("ShelfSync")
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        // Mobile hosts pass their own directory
        PathBuf::from("./ShelfSync")
    }
}
