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


//! Database migrations
//!
//! # Migration Strategy
//! Since sqlx's compile-time migration system requires build-time database connection,
//! we implement migrations as runtime SQL execution for mobile compatibility.
//!
//! # Keys
//! Every item row is keyed by the encoded item identifier (`item_key`) and also
//! carries the identifier's components in their own columns. Lookups by connection,
//! library or primary ID match those columns exactly.

use crate::error::Result;
use sqlx::{Executor, SqlitePool};

/// Run all database migrations
///
/// Migrations are tracked in the `_migrations` table.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    create_migrations_table(pool).await?;

    run_migration(pool, 1, "initial_schema", create_initial_schema(pool)).await?;
    run_migration(pool, 2, "key_value_store", create_key_value_store(pool)).await?;

    Ok(())
}

async fn create_migrations_table(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .await?;

    Ok(())
}

/// Run a single migration if it hasn't been applied yet
async fn run_migration(
    pool: &SqlitePool,
    id: i32,
    name: &str,
    migration_fn: impl std::future::Future<Output = Result<()>>,
) -> Result<()> {
    let applied: Option<i32> = sqlx::query_scalar("SELECT id FROM _migrations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    if applied.is_some() {
        return Ok(());
    }

    migration_fn.await?;

    sqlx::query("INSERT INTO _migrations (id, name) VALUES (?, ?)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;

    tracing::debug!(migration = name, "Applied database migration");
    Ok(())
}

/// Items, chapters, the asset ledger and the search index
async fn create_initial_schema(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
-- ============================================================================
-- ITEMS
-- ============================================================================

CREATE TABLE IF NOT EXISTS PersistedAudiobooks (
    item_key TEXT PRIMARY KEY,
    connection_id TEXT NOT NULL,
    library_id TEXT NOT NULL,
    primary_id TEXT NOT NULL,

    name TEXT NOT NULL,
    authors TEXT NOT NULL DEFAULT '[]',      -- JSON array
    description TEXT,
    genres TEXT NOT NULL DEFAULT '[]',       -- JSON array
    added_at TEXT NOT NULL,                  -- RFC 3339
    released TEXT,
    size INTEGER,
    duration REAL NOT NULL DEFAULT 0,

    subtitle TEXT,
    narrators TEXT NOT NULL DEFAULT '[]',    -- JSON array
    series TEXT NOT NULL DEFAULT '[]',       -- JSON array of {name, sequence}
    explicit INTEGER NOT NULL DEFAULT 0,
    abridged INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_audiobooks_connection ON PersistedAudiobooks(connection_id);
CREATE INDEX IF NOT EXISTS idx_audiobooks_library ON PersistedAudiobooks(connection_id, library_id);
CREATE INDEX IF NOT EXISTS idx_audiobooks_primary ON PersistedAudiobooks(primary_id, connection_id);

CREATE TABLE IF NOT EXISTS PersistedPodcasts (
    item_key TEXT PRIMARY KEY,
    connection_id TEXT NOT NULL,
    library_id TEXT NOT NULL,
    primary_id TEXT NOT NULL,

    name TEXT NOT NULL,
    authors TEXT NOT NULL DEFAULT '[]',
    description TEXT,
    genres TEXT NOT NULL DEFAULT '[]',
    added_at TEXT NOT NULL,
    released TEXT,

    explicit INTEGER NOT NULL DEFAULT 0,
    publishing_type TEXT,
    episode_count INTEGER
);

CREATE INDEX IF NOT EXISTS idx_podcasts_connection ON PersistedPodcasts(connection_id);
CREATE INDEX IF NOT EXISTS idx_podcasts_primary ON PersistedPodcasts(primary_id, connection_id);

-- Episodes are owned by their podcast; podcast_key is a plain lookup key.
-- Cascading removal happens in the download subsystem, not in SQL.
CREATE TABLE IF NOT EXISTS PersistedEpisodes (
    item_key TEXT PRIMARY KEY,
    connection_id TEXT NOT NULL,
    library_id TEXT NOT NULL,
    primary_id TEXT NOT NULL,
    grouping_id TEXT NOT NULL,
    podcast_key TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0,    -- order within the podcast

    name TEXT NOT NULL,
    authors TEXT NOT NULL DEFAULT '[]',
    description TEXT,
    added_at TEXT NOT NULL,
    released TEXT,
    size INTEGER,
    duration REAL NOT NULL DEFAULT 0,

    podcast_name TEXT NOT NULL DEFAULT '',
    episode_type TEXT,
    season TEXT,
    episode_number TEXT
);

CREATE INDEX IF NOT EXISTS idx_episodes_podcast ON PersistedEpisodes(podcast_key, position);
CREATE INDEX IF NOT EXISTS idx_episodes_connection ON PersistedEpisodes(connection_id);
CREATE INDEX IF NOT EXISTS idx_episodes_primary ON PersistedEpisodes(primary_id, grouping_id, connection_id);

-- ============================================================================
-- CHAPTERS
-- ============================================================================

CREATE TABLE IF NOT EXISTS PersistedChapters (
    chapter_row INTEGER PRIMARY KEY AUTOINCREMENT,
    item_key TEXT NOT NULL,
    chapter_id INTEGER NOT NULL,
    start_offset REAL NOT NULL,
    end_offset REAL NOT NULL,
    title TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chapters_item ON PersistedChapters(item_key, chapter_id);

-- ============================================================================
-- ASSET LEDGER
-- ============================================================================

CREATE TABLE IF NOT EXISTS PersistedAssets (
    asset_id TEXT PRIMARY KEY,              -- UUID v4
    item_key TEXT NOT NULL,
    connection_id TEXT NOT NULL,

    file_type TEXT NOT NULL,                -- 'audio' | 'image' | 'pdf'
    audio_offset REAL,
    audio_duration REAL,
    source_ino TEXT,
    file_extension TEXT,
    image_size TEXT,
    pdf_name TEXT,

    is_downloaded INTEGER NOT NULL DEFAULT 0,
    download_task_id INTEGER UNIQUE,        -- at most one in-flight transfer per task
    progress_weight REAL NOT NULL DEFAULT 0,

    CHECK (file_type IN ('audio', 'image', 'pdf'))
);

CREATE INDEX IF NOT EXISTS idx_assets_item ON PersistedAssets(item_key);
CREATE INDEX IF NOT EXISTS idx_assets_pending ON PersistedAssets(is_downloaded, download_task_id);
CREATE INDEX IF NOT EXISTS idx_assets_connection ON PersistedAssets(connection_id);

-- ============================================================================
-- SEARCH INDEX (maintained elsewhere, read here)
-- ============================================================================

CREATE TABLE IF NOT EXISTS SearchIndex (
    item_key TEXT PRIMARY KEY,
    connection_id TEXT NOT NULL,
    primary_name TEXT NOT NULL,
    secondary_name TEXT,
    author_name TEXT
);

CREATE INDEX IF NOT EXISTS idx_search_connection ON SearchIndex(connection_id);
        "#,
    )
    .await?;

    Ok(())
}

/// Auxiliary key-value cache (status cache, cover paths, failure counters)
async fn create_key_value_store(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
CREATE TABLE IF NOT EXISTS KeyValueEntries (
    identifier TEXT PRIMARY KEY,
    cluster TEXT NOT NULL,
    value TEXT NOT NULL,                    -- JSON
    purgeable INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_key_value_cluster ON KeyValueEntries(cluster);
        "#,
    )
    .await?;

    Ok(())
}
