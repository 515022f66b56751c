//! Database query functions
//!
//! Repository functions for items, chapters, the asset ledger and the search index.
//!
//! # Query Patterns
//! - Functions used inside a transaction take any `SqliteExecutor`, so callers can
//!   pass either the pool or `&mut *tx`
//! - Items are matched by their encoded key or by structured identifier columns,
//!   never by substring
//! - Multi-row writes (item + chapters + assets) are committed by the caller in one
//!   transaction

use crate::error::{Result, ShelfError};
use crate::item::{
    Audiobook, Chapter, Episode, ItemIdentifier, ItemType, PlayableItem, Podcast, SeriesFragment,
};
use crate::storage::models::*;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor, SqlitePool};
use uuid::Uuid;

// ============================================================================
// ROW HELPERS
// ============================================================================

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: serde::de::DeserializeOwned>(table: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| ShelfError::corrupt(table, e.to_string()))
}

fn parse_timestamp(table: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| ShelfError::corrupt(table, format!("bad timestamp '{}': {}", raw, e)))
}

fn row_item_id(table: &str, row: &SqliteRow) -> Result<ItemIdentifier> {
    let key: String = row.try_get("item_key")?;
    key.parse()
        .map_err(|e: ShelfError| ShelfError::corrupt(table, e.to_string()))
}

fn row_to_audiobook(row: &SqliteRow) -> Result<Audiobook> {
    const TABLE: &str = "PersistedAudiobooks";
    let authors: String = row.try_get("authors")?;
    let genres: String = row.try_get("genres")?;
    let narrators: String = row.try_get("narrators")?;
    let series: String = row.try_get("series")?;
    let added_at: String = row.try_get("added_at")?;

    Ok(Audiobook {
        id: row_item_id(TABLE, row)?,
        name: row.try_get("name")?,
        authors: from_json(TABLE, &authors)?,
        description: row.try_get("description")?,
        genres: from_json(TABLE, &genres)?,
        added_at: parse_timestamp(TABLE, &added_at)?,
        released: row.try_get("released")?,
        size: row.try_get("size")?,
        duration: row.try_get("duration")?,
        subtitle: row.try_get("subtitle")?,
        narrators: from_json(TABLE, &narrators)?,
        series: from_json::<Vec<SeriesFragment>>(TABLE, &series)?,
        explicit: row.try_get("explicit")?,
        abridged: row.try_get("abridged")?,
    })
}

fn row_to_episode(row: &SqliteRow) -> Result<Episode> {
    const TABLE: &str = "PersistedEpisodes";
    let authors: String = row.try_get("authors")?;
    let added_at: String = row.try_get("added_at")?;

    Ok(Episode {
        id: row_item_id(TABLE, row)?,
        name: row.try_get("name")?,
        authors: from_json(TABLE, &authors)?,
        description: row.try_get("description")?,
        added_at: parse_timestamp(TABLE, &added_at)?,
        released: row.try_get("released")?,
        size: row.try_get("size")?,
        duration: row.try_get("duration")?,
        podcast_name: row.try_get("podcast_name")?,
        episode_type: row.try_get("episode_type")?,
        season: row.try_get("season")?,
        episode_number: row.try_get("episode_number")?,
    })
}

fn row_to_podcast(row: &SqliteRow) -> Result<Podcast> {
    const TABLE: &str = "PersistedPodcasts";
    let authors: String = row.try_get("authors")?;
    let genres: String = row.try_get("genres")?;
    let added_at: String = row.try_get("added_at")?;

    Ok(Podcast {
        id: row_item_id(TABLE, row)?,
        name: row.try_get("name")?,
        authors: from_json(TABLE, &authors)?,
        description: row.try_get("description")?,
        genres: from_json(TABLE, &genres)?,
        added_at: parse_timestamp(TABLE, &added_at)?,
        released: row.try_get("released")?,
        explicit: row.try_get("explicit")?,
        publishing_type: row.try_get("publishing_type")?,
        episode_count: row.try_get("episode_count")?,
    })
}

fn row_to_chapter(row: &SqliteRow) -> Result<Chapter> {
    Ok(Chapter {
        id: row.try_get("chapter_id")?,
        start_offset: row.try_get("start_offset")?,
        end_offset: row.try_get("end_offset")?,
        title: row.try_get("title")?,
    })
}

fn row_to_asset(row: &SqliteRow) -> Result<PersistedAsset> {
    const TABLE: &str = "PersistedAssets";
    let id: String = row.try_get("asset_id")?;
    let kind: String = row.try_get("file_type")?;

    let file_type = PersistedAsset::decode_file_type(
        &kind,
        row.try_get("audio_offset")?,
        row.try_get("audio_duration")?,
        row.try_get("source_ino")?,
        row.try_get("file_extension")?,
        row.try_get("image_size")?,
        row.try_get("pdf_name")?,
    )?;

    Ok(PersistedAsset {
        id: Uuid::parse_str(&id).map_err(|e| ShelfError::corrupt(TABLE, e.to_string()))?,
        item_id: row_item_id(TABLE, row)?,
        file_type,
        is_downloaded: row.try_get("is_downloaded")?,
        download_task_id: row.try_get("download_task_id")?,
        progress_weight: row.try_get("progress_weight")?,
    })
}

// ============================================================================
// AUDIOBOOK QUERIES
// ============================================================================

pub async fn insert_audiobook<'e, E>(executor: E, book: &Audiobook) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO PersistedAudiobooks (
            item_key, connection_id, library_id, primary_id,
            name, authors, description, genres, added_at, released, size, duration,
            subtitle, narrators, series, explicit, abridged
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(book.id.key())
    .bind(&book.id.connection_id)
    .bind(&book.id.library_id)
    .bind(&book.id.primary_id)
    .bind(&book.name)
    .bind(to_json(&book.authors)?)
    .bind(&book.description)
    .bind(to_json(&book.genres)?)
    .bind(book.added_at.to_rfc3339())
    .bind(&book.released)
    .bind(book.size)
    .bind(book.duration)
    .bind(&book.subtitle)
    .bind(to_json(&book.narrators)?)
    .bind(to_json(&book.series)?)
    .bind(book.explicit)
    .bind(book.abridged)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn find_audiobook(pool: &SqlitePool, id: &ItemIdentifier) -> Result<Option<Audiobook>> {
    let row = sqlx::query("SELECT * FROM PersistedAudiobooks WHERE item_key = ?")
        .bind(id.key())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_audiobook).transpose()
}

pub async fn list_audiobooks(pool: &SqlitePool) -> Result<Vec<Audiobook>> {
    let rows = sqlx::query("SELECT * FROM PersistedAudiobooks ORDER BY name COLLATE NOCASE")
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_audiobook).collect()
}

/// Audiobooks of one library on one connection
pub async fn list_audiobooks_in_library(
    pool: &SqlitePool,
    connection_id: &str,
    library_id: &str,
) -> Result<Vec<Audiobook>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM PersistedAudiobooks
        WHERE connection_id = ? AND library_id = ?
        ORDER BY name COLLATE NOCASE
        "#,
    )
    .bind(connection_id)
    .bind(library_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_audiobook).collect()
}

pub async fn list_audiobook_ids_for_connection(
    pool: &SqlitePool,
    connection_id: &str,
) -> Result<Vec<ItemIdentifier>> {
    let rows = sqlx::query("SELECT item_key FROM PersistedAudiobooks WHERE connection_id = ?")
        .bind(connection_id)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| row_item_id("PersistedAudiobooks", row))
        .collect()
}

pub async fn delete_audiobook<'e, E>(executor: E, id: &ItemIdentifier) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM PersistedAudiobooks WHERE item_key = ?")
        .bind(id.key())
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

pub async fn delete_all_audiobooks(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM PersistedAudiobooks")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ============================================================================
// EPISODE QUERIES
// ============================================================================

/// Insert an episode at `position` within its podcast
pub async fn insert_episode<'e, E>(executor: E, episode: &Episode, position: i64) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let podcast_id = episode.podcast_id()?;

    sqlx::query(
        r#"
        INSERT INTO PersistedEpisodes (
            item_key, connection_id, library_id, primary_id, grouping_id,
            podcast_key, position,
            name, authors, description, added_at, released, size, duration,
            podcast_name, episode_type, season, episode_number
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(episode.id.key())
    .bind(&episode.id.connection_id)
    .bind(&episode.id.library_id)
    .bind(&episode.id.primary_id)
    .bind(&podcast_id.primary_id)
    .bind(podcast_id.key())
    .bind(position)
    .bind(&episode.name)
    .bind(to_json(&episode.authors)?)
    .bind(&episode.description)
    .bind(episode.added_at.to_rfc3339())
    .bind(&episode.released)
    .bind(episode.size)
    .bind(episode.duration)
    .bind(&episode.podcast_name)
    .bind(&episode.episode_type)
    .bind(&episode.season)
    .bind(&episode.episode_number)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn find_episode(pool: &SqlitePool, id: &ItemIdentifier) -> Result<Option<Episode>> {
    let row = sqlx::query("SELECT * FROM PersistedEpisodes WHERE item_key = ?")
        .bind(id.key())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_episode).transpose()
}

pub async fn list_episodes(pool: &SqlitePool) -> Result<Vec<Episode>> {
    let rows = sqlx::query("SELECT * FROM PersistedEpisodes ORDER BY podcast_key, position")
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_episode).collect()
}

/// Episodes owned by a podcast, in insertion order
pub async fn list_episodes_of_podcast(
    pool: &SqlitePool,
    podcast_id: &ItemIdentifier,
) -> Result<Vec<Episode>> {
    let rows = sqlx::query("SELECT * FROM PersistedEpisodes WHERE podcast_key = ? ORDER BY position")
        .bind(podcast_id.key())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_episode).collect()
}

pub async fn count_episodes_of_podcast<'e, E>(executor: E, podcast_id: &ItemIdentifier) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM PersistedEpisodes WHERE podcast_key = ?")
        .bind(podcast_id.key())
        .fetch_one(executor)
        .await?;
    Ok(count)
}

pub async fn list_episode_ids(pool: &SqlitePool) -> Result<Vec<ItemIdentifier>> {
    let rows = sqlx::query("SELECT item_key FROM PersistedEpisodes")
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| row_item_id("PersistedEpisodes", row))
        .collect()
}

pub async fn delete_episode<'e, E>(executor: E, id: &ItemIdentifier) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM PersistedEpisodes WHERE item_key = ?")
        .bind(id.key())
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Look up a persisted audiobook or episode by its identifier parts
pub async fn find_playable_by_parts(
    pool: &SqlitePool,
    primary_id: &str,
    grouping_id: Option<&str>,
    connection_id: &str,
) -> Result<Option<PlayableItem>> {
    if let Some(grouping_id) = grouping_id {
        let row = sqlx::query(
            r#"
            SELECT * FROM PersistedEpisodes
            WHERE primary_id = ? AND grouping_id = ? AND connection_id = ?
            "#,
        )
        .bind(primary_id)
        .bind(grouping_id)
        .bind(connection_id)
        .fetch_optional(pool)
        .await?;

        return row
            .as_ref()
            .map(|r| row_to_episode(r).map(PlayableItem::Episode))
            .transpose();
    }

    let row = sqlx::query(
        "SELECT * FROM PersistedAudiobooks WHERE primary_id = ? AND connection_id = ?",
    )
    .bind(primary_id)
    .bind(connection_id)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = row {
        return Ok(Some(PlayableItem::Audiobook(row_to_audiobook(&row)?)));
    }

    let row = sqlx::query(
        "SELECT * FROM PersistedEpisodes WHERE primary_id = ? AND connection_id = ? LIMIT 1",
    )
    .bind(primary_id)
    .bind(connection_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref()
        .map(|r| row_to_episode(r).map(PlayableItem::Episode))
        .transpose()
}

// ============================================================================
// PODCAST QUERIES
// ============================================================================

/// Insert a podcast unless a row with the same identity exists
///
/// Returns `false` when the podcast was already persisted.
pub async fn insert_podcast<'e, E>(executor: E, podcast: &Podcast) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO PersistedPodcasts (
            item_key, connection_id, library_id, primary_id,
            name, authors, description, genres, added_at, released,
            explicit, publishing_type, episode_count
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(item_key) DO NOTHING
        "#,
    )
    .bind(podcast.id.key())
    .bind(&podcast.id.connection_id)
    .bind(&podcast.id.library_id)
    .bind(&podcast.id.primary_id)
    .bind(&podcast.name)
    .bind(to_json(&podcast.authors)?)
    .bind(&podcast.description)
    .bind(to_json(&podcast.genres)?)
    .bind(podcast.added_at.to_rfc3339())
    .bind(&podcast.released)
    .bind(podcast.explicit)
    .bind(&podcast.publishing_type)
    .bind(podcast.episode_count)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn find_podcast<'e, E>(executor: E, id: &ItemIdentifier) -> Result<Option<Podcast>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query("SELECT * FROM PersistedPodcasts WHERE item_key = ?")
        .bind(id.key())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(row_to_podcast).transpose()
}

pub async fn find_podcast_by_parts(
    pool: &SqlitePool,
    primary_id: &str,
    connection_id: &str,
) -> Result<Option<Podcast>> {
    let row = sqlx::query(
        "SELECT * FROM PersistedPodcasts WHERE primary_id = ? AND connection_id = ?",
    )
    .bind(primary_id)
    .bind(connection_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_podcast).transpose()
}

pub async fn list_podcasts(pool: &SqlitePool) -> Result<Vec<Podcast>> {
    let rows = sqlx::query("SELECT * FROM PersistedPodcasts ORDER BY name COLLATE NOCASE")
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_podcast).collect()
}

pub async fn list_podcast_ids_for_connection(
    pool: &SqlitePool,
    connection_id: &str,
) -> Result<Vec<ItemIdentifier>> {
    let rows = sqlx::query("SELECT item_key FROM PersistedPodcasts WHERE connection_id = ?")
        .bind(connection_id)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| row_item_id("PersistedPodcasts", row))
        .collect()
}

/// Podcasts that no longer own any episode
pub async fn list_empty_podcasts(pool: &SqlitePool) -> Result<Vec<ItemIdentifier>> {
    let rows = sqlx::query(
        r#"
        SELECT p.item_key FROM PersistedPodcasts p
        WHERE NOT EXISTS (
            SELECT 1 FROM PersistedEpisodes e WHERE e.podcast_key = p.item_key
        )
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| row_item_id("PersistedPodcasts", row))
        .collect()
}

pub async fn delete_podcast<'e, E>(executor: E, id: &ItemIdentifier) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM PersistedPodcasts WHERE item_key = ?")
        .bind(id.key())
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

// ============================================================================
// CHAPTER QUERIES
// ============================================================================

pub async fn insert_chapter<'e, E>(executor: E, item_id: &ItemIdentifier, chapter: &Chapter) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO PersistedChapters (item_key, chapter_id, start_offset, end_offset, title)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(item_id.key())
    .bind(chapter.id)
    .bind(chapter.start_offset)
    .bind(chapter.end_offset)
    .bind(&chapter.title)
    .execute(executor)
    .await?;

    Ok(())
}

/// Chapters of an item ordered by chapter index
pub async fn list_chapters(pool: &SqlitePool, item_id: &ItemIdentifier) -> Result<Vec<Chapter>> {
    let rows = sqlx::query(
        "SELECT * FROM PersistedChapters WHERE item_key = ? ORDER BY chapter_id, start_offset",
    )
    .bind(item_id.key())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_chapter).collect()
}

pub async fn delete_chapters<'e, E>(executor: E, item_id: &ItemIdentifier) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM PersistedChapters WHERE item_key = ?")
        .bind(item_id.key())
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

pub async fn delete_all_chapters(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM PersistedChapters")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ============================================================================
// ASSET QUERIES
// ============================================================================

pub async fn insert_asset<'e, E>(executor: E, asset: &PersistedAsset) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let (offset, duration, ino, extension, image_size, pdf_name) = match &asset.file_type {
        AssetFileType::Audio {
            offset,
            duration,
            ino,
            file_extension,
        } => (
            Some(*offset),
            Some(*duration),
            Some(ino.as_str()),
            Some(file_extension.as_str()),
            None,
            None,
        ),
        AssetFileType::Image { size } => (None, None, None, None, Some(size.as_str()), None),
        AssetFileType::Pdf { name, ino } => {
            (None, None, Some(ino.as_str()), None, None, Some(name.as_str()))
        }
    };

    sqlx::query(
        r#"
        INSERT INTO PersistedAssets (
            asset_id, item_key, connection_id, file_type,
            audio_offset, audio_duration, source_ino, file_extension, image_size, pdf_name,
            is_downloaded, download_task_id, progress_weight
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(asset.id.to_string())
    .bind(asset.item_id.key())
    .bind(&asset.item_id.connection_id)
    .bind(asset.file_type.kind())
    .bind(offset)
    .bind(duration)
    .bind(ino)
    .bind(extension)
    .bind(image_size)
    .bind(pdf_name)
    .bind(asset.is_downloaded)
    .bind(asset.download_task_id)
    .bind(asset.progress_weight)
    .execute(executor)
    .await?;

    Ok(())
}

/// All assets of an item, audio ordered by timeline offset
pub async fn list_assets<'e, E>(executor: E, item_id: &ItemIdentifier) -> Result<Vec<PersistedAsset>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query(
        "SELECT * FROM PersistedAssets WHERE item_key = ? ORDER BY file_type, audio_offset",
    )
    .bind(item_id.key())
    .fetch_all(executor)
    .await?;

    rows.iter().map(row_to_asset).collect()
}

pub async fn list_assets_for_connection(
    pool: &SqlitePool,
    connection_id: &str,
) -> Result<Vec<PersistedAsset>> {
    let rows = sqlx::query("SELECT * FROM PersistedAssets WHERE connection_id = ?")
        .bind(connection_id)
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_asset).collect()
}

/// Assets that currently have a transfer task recorded
pub async fn list_assets_in_flight(pool: &SqlitePool) -> Result<Vec<PersistedAsset>> {
    let rows = sqlx::query("SELECT * FROM PersistedAssets WHERE download_task_id IS NOT NULL")
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_asset).collect()
}

pub async fn find_asset_by_task(pool: &SqlitePool, task_id: i64) -> Result<Option<PersistedAsset>> {
    let row = sqlx::query("SELECT * FROM PersistedAssets WHERE download_task_id = ?")
        .bind(task_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_asset).transpose()
}

/// First asset that is neither downloaded nor in flight
pub async fn next_pending_asset(pool: &SqlitePool) -> Result<Option<PersistedAsset>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM PersistedAssets
        WHERE is_downloaded = 0 AND download_task_id IS NULL
        ORDER BY rowid
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_asset).transpose()
}

/// Record (or clear) the transfer task moving an asset
pub async fn set_asset_task(pool: &SqlitePool, asset_id: Uuid, task_id: Option<i64>) -> Result<()> {
    let result = sqlx::query("UPDATE PersistedAssets SET download_task_id = ? WHERE asset_id = ?")
        .bind(task_id)
        .bind(asset_id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ShelfError::not_found(format!("asset {}", asset_id)));
    }
    Ok(())
}

/// Mark an asset downloaded and clear its task ID
pub async fn mark_asset_downloaded(pool: &SqlitePool, asset_id: Uuid) -> Result<()> {
    let result = sqlx::query(
        "UPDATE PersistedAssets SET is_downloaded = 1, download_task_id = NULL WHERE asset_id = ?",
    )
    .bind(asset_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ShelfError::not_found(format!("asset {}", asset_id)));
    }
    Ok(())
}

pub async fn clear_all_task_ids(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE PersistedAssets SET download_task_id = NULL WHERE download_task_id IS NOT NULL",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete_assets<'e, E>(executor: E, item_id: &ItemIdentifier) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM PersistedAssets WHERE item_key = ?")
        .bind(item_id.key())
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

pub async fn delete_all_assets(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM PersistedAssets")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// (total, downloaded) asset counts of an item
pub async fn asset_counts(pool: &SqlitePool, item_id: &ItemIdentifier) -> Result<(i64, i64)> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS total, COALESCE(SUM(is_downloaded), 0) AS downloaded
        FROM PersistedAssets WHERE item_key = ?
        "#,
    )
    .bind(item_id.key())
    .fetch_one(pool)
    .await?;

    Ok((row.try_get("total")?, row.try_get("downloaded")?))
}

/// Sum of the progress weights of downloaded assets
pub async fn downloaded_weight(pool: &SqlitePool, item_id: &ItemIdentifier) -> Result<f64> {
    let weight: f64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(progress_weight), 0.0) FROM PersistedAssets
        WHERE item_key = ? AND is_downloaded = 1
        "#,
    )
    .bind(item_id.key())
    .fetch_one(pool)
    .await?;

    Ok(weight)
}

// ============================================================================
// SEARCH QUERIES
// ============================================================================

pub async fn upsert_search_entry<'e, E>(executor: E, entry: &SearchEntry) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO SearchIndex (item_key, connection_id, primary_name, secondary_name, author_name)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(item_key) DO UPDATE SET
            primary_name = excluded.primary_name,
            secondary_name = excluded.secondary_name,
            author_name = excluded.author_name
        "#,
    )
    .bind(entry.item_id.key())
    .bind(&entry.item_id.connection_id)
    .bind(&entry.primary_name)
    .bind(&entry.secondary_name)
    .bind(&entry.author_name)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn delete_all_search_entries(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM SearchIndex").execute(pool).await?;
    Ok(result.rows_affected())
}

pub async fn delete_search_entries_for_connection(pool: &SqlitePool, connection_id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM SearchIndex WHERE connection_id = ?")
        .bind(connection_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Case-insensitive search over names, optionally restricted to one item type
pub async fn search(
    pool: &SqlitePool,
    query: &str,
    item_type: Option<ItemType>,
    limit: i64,
) -> Result<Vec<SearchEntry>> {
    let pattern = format!("%{}%", escape_like(query.trim()));

    let rows = sqlx::query(
        r#"
        SELECT * FROM SearchIndex
        WHERE primary_name LIKE ? ESCAPE '\'
           OR secondary_name LIKE ? ESCAPE '\'
           OR author_name LIKE ? ESCAPE '\'
        ORDER BY primary_name COLLATE NOCASE
        "#,
    )
    .bind(&pattern)
    .bind(&pattern)
    .bind(&pattern)
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::new();
    for row in &rows {
        let item_id = row_item_id("SearchIndex", row)?;
        if item_type.is_some_and(|t| t != item_id.item_type) {
            continue;
        }
        entries.push(SearchEntry {
            item_id,
            primary_name: row.try_get("primary_name")?,
            secondary_name: row.try_get("secondary_name")?,
            author_name: row.try_get("author_name")?,
        });
        if entries.len() as i64 >= limit {
            break;
        }
    }

    Ok(entries)
}
