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


//! File operations and management
//!
//! # Key Operations
//! - Safe file moves (atomic when possible, with retry)
//! - File existence checks
//! - Directory creation and removal
//! - Stale temp file cleanup

use crate::error::{Result, ShelfError};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;

/// Maximum retry attempts for file operations
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Stateless helpers for safe file operations
#[derive(Debug, Default, Clone, Copy)]
pub struct FileManager;

impl FileManager {
    /// Safe move operation with retry
    ///
    /// # Algorithm
    /// 1. Check source exists
    /// 2. Delete destination if it exists
    /// 3. Create destination directory
    /// 4. Move file (atomic on same filesystem, copy + delete otherwise)
    /// 5. Retry up to 3 times on failure
    pub async fn safe_move(source: &Path, destination: &Path) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match Self::try_move(source, destination).await {
                Ok(()) => return Ok(()),
                Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                    return Err(ShelfError::FileIoError(format!(
                        "Failed to move file after {} attempts: {} -> {}: {}",
                        MAX_RETRY_ATTEMPTS,
                        source.display(),
                        destination.display(),
                        e
                    )));
                }
                Err(ShelfError::FileNotFound(path)) => return Err(ShelfError::FileNotFound(path)),
                Err(_) => {
                    sleep(RETRY_DELAY).await;
                    continue;
                }
            }
        }
    }

    async fn try_move(source: &Path, destination: &Path) -> Result<()> {
        if !Self::file_exists(source).await {
            return Err(ShelfError::FileNotFound(source.display().to_string()));
        }

        if Self::file_exists(destination).await {
            Self::delete_once(destination).await?;
        }

        if let Some(parent) = destination.parent() {
            Self::ensure_directory_exists(parent).await?;
        }

        if fs::rename(source, destination).await.is_ok() {
            return Ok(());
        }

        // Temp directory may live on another volume
        fs::copy(source, destination).await.map_err(|e| {
            ShelfError::FileIoError(format!(
                "Move failed: {} -> {}: {}",
                source.display(),
                destination.display(),
                e
            ))
        })?;
        Self::delete_once(source).await
    }

    /// Safe delete operation with retry
    ///
    /// A missing file is not an error.
    pub async fn safe_delete(path: &Path) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match Self::delete_once(path).await {
                Ok(()) => return Ok(()),
                Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                    return Err(ShelfError::FileIoError(format!(
                        "Failed to delete file after {} attempts: {}: {}",
                        MAX_RETRY_ATTEMPTS,
                        path.display(),
                        e
                    )));
                }
                Err(_) => {
                    sleep(RETRY_DELAY).await;
                    continue;
                }
            }
        }
    }

    async fn delete_once(path: &Path) -> Result<()> {
        if !Self::file_exists(path).await {
            return Ok(());
        }

        fs::remove_file(path).await.map_err(|e| {
            ShelfError::FileIoError(format!("Delete failed: {}: {}", path.display(), e))
        })
    }

    /// Remove a directory tree; a missing directory is not an error
    pub async fn remove_directory(path: &Path) -> Result<()> {
        match fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ShelfError::FileIoError(format!(
                "Failed to remove directory {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Ensure directory exists, creating parent directories as needed
    pub async fn ensure_directory_exists(path: &Path) -> Result<()> {
        if Self::file_exists(path).await {
            return Ok(());
        }

        fs::create_dir_all(path).await.map_err(|e| {
            ShelfError::FileIoError(format!(
                "Failed to create directory {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Check if file exists
    pub async fn file_exists(path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    /// Delete `*.tmp` files in a directory, returning how many were removed
    pub async fn cleanup_temp_files(directory: &Path) -> Result<usize> {
        let mut entries = match fs::read_dir(directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                Self::safe_delete(&path).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}
