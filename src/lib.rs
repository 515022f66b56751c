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

//! ShelfSync core
//!
//! Offline download manager for Audiobookshelf libraries. Items are persisted in
//! SQLite together with a ledger of every file they need; a background scheduler
//! moves those files over HTTP with bounded concurrency and retries.
//!
//! # Modules
//! - `download` - the download subsystem and its notifications
//! - `storage` - SQLite schema, queries and the key-value cache
//! - `transfer` - background file transfers
//! - `api` - Audiobookshelf API client
//! - `item` - library item identifiers and types
//! - `file` - on-disk layout and file operations
//! - `platform` - host hooks (network path, background leases, backups)
//! - `config` - configuration
//! - `error` - error types

pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod file;
pub mod item;
#[cfg(feature = "cli")]
pub mod logging;
pub mod platform;
pub mod storage;
pub mod transfer;

pub use config::{ConnectionConfig, DownloadConfig};
pub use download::{DownloadEvent, DownloadSubsystem};
pub use error::{Result, ShelfError};
pub use item::{DownloadStatus, ImageSize, ItemIdentifier, ItemType};
