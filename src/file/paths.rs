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


//! Download directory layout
//!
//! ```text
//! <storage root>/DownloadV2/
//!     <connection id, percent-encoded>/<asset uuid>.<ext>
//!     .transfers/<task id>.tmp
//! ```

use crate::config::DownloadConfig;
use crate::storage::models::PersistedAsset;
use std::path::{Path, PathBuf};

const DOWNLOAD_DIRECTORY: &str = "DownloadV2";
const TRANSFER_DIRECTORY: &str = ".transfers";

/// Resolves where downloaded and in-flight files live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPaths {
    root: PathBuf,
}

impl DownloadPaths {
    /// Layout under `<storage_root>/DownloadV2`
    pub fn new<P: AsRef<Path>>(storage_root: P) -> Self {
        Self {
            root: storage_root.as_ref().join(DOWNLOAD_DIRECTORY),
        }
    }

    pub fn from_config(config: &DownloadConfig) -> Self {
        Self::new(config.storage_root())
    }

    /// The whole download tree
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every file of one server connection
    pub fn connection_directory(&self, connection_id: &str) -> PathBuf {
        self.root.join(urlencoding::encode(connection_id).as_ref())
    }

    /// Permanent location of an asset
    pub fn asset_path(&self, asset: &PersistedAsset) -> PathBuf {
        self.connection_directory(&asset.item_id.connection_id)
            .join(asset.file_name())
    }

    /// Directory transfers write into before completion
    pub fn transfer_directory(&self) -> PathBuf {
        self.root.join(TRANSFER_DIRECTORY)
    }

    /// Where a transfer task leaves its file on completion
    pub fn temporary_location(&self, task_id: i64) -> PathBuf {
        self.transfer_directory().join(format!("{}.tmp", task_id))
    }
}
