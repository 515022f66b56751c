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


//! Database storage and models
//!
//! This module handles all database operations using SQLite.
//!
//! # Database Schema
//! - PersistedAudiobooks / PersistedEpisodes / PersistedPodcasts: downloaded items
//! - PersistedChapters: chapter markers, many per item
//! - PersistedAssets: the asset ledger, one row per file on disk
//! - KeyValueEntries: auxiliary cache (status, cover paths, failure counters)
//! - SearchIndex: offline search over item names
//!
//! # Usage Example
//! ```no_run
//! use shelf_core::item::ItemIdentifier;
//! use shelf_core::storage::{queries, Database};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new("./shelf.db").await?;
//!
//! let id = ItemIdentifier::audiobook("li_8gch9ve09orgn4fdz8", "lib_main", "home");
//! let assets = queries::list_assets(db.pool(), &id).await?;
//! println!("{} assets", assets.len());
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod key_value;
pub mod migrations;
pub mod models;
pub mod queries;

// Re-export commonly used types
pub use database::Database;
pub use key_value::{keys, Key, KeyValueCache, KeyValueStore, SqliteKeyValueStore};
pub use models::{AssetFileType, PersistedAsset, SearchEntry};
