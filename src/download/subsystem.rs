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

//! Download subsystem
//!
//! Turns a remote audiobook or episode into a local bundle of audio files,
//! chapters, cover variants and supplementary documents.
//!
//! # Flow
//! 1. [`DownloadSubsystem::download`] fetches the item graph and inserts the item,
//!    its chapters and one ledger row per file in a single transaction.
//! 2. A scheduling pass picks the next pending asset, creates a suspended transfer,
//!    records the task ID on the asset and resumes the transfer. Each pass starts at
//!    most one transfer and then re-arms itself until the transfer ceiling is reached.
//! 3. Transfer callbacks are handled one at a time by the subsystem's event loop:
//!    completions move the file into place and mark the asset downloaded, failures
//!    count attempts and remove the whole item once the attempt limit is exceeded.
//!
//! Item status is derived from the ledger. The cached status in the key-value store
//! is a fast path only, and a cached `none` is never trusted.
//!
//! # Locks
//! - `guards`: busy set and block counts
//! - `ledger_lock`: asset bookkeeping that decides completion, and row deletion
//! - `pass_lock`: one scheduling pass at a time
//!
//! `pass_lock` is never acquired while `ledger_lock` is held.

use super::events::{DownloadEvent, EventBus, ProgressChange};
use super::progress::ProgressWeights;
use crate::api::{LibraryApi, TransferRequest};
use crate::config::DownloadConfig;
use crate::error::{Result, ShelfError};
use crate::file::{DownloadPaths, FileManager};
use crate::item::{
    AudioTrack, Chapter, DownloadStatus, Episode, ImageSize, Item, ItemIdentifier, ItemType,
    PlayableItem, Podcast, Audiobook,
};
use crate::platform::Platform;
use crate::storage::{
    keys, queries, AssetFileType, Database, KeyValueCache, PersistedAsset, SqliteKeyValueStore,
};
use crate::transfer::{HttpTransferSession, TransferBackend, TransferEvent, CANCELLED};
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SEARCH_LIMIT: i64 = 250;

#[derive(Debug, Default)]
struct GuardState {
    /// Block count per item; absent means unblocked
    blocked: HashMap<ItemIdentifier, usize>,
    /// Items with an enqueue or removal in progress
    busy: HashSet<ItemIdentifier>,
}

pub struct DownloadSubsystem {
    this: Weak<DownloadSubsystem>,
    database: Database,
    cache: KeyValueCache,
    api: Arc<dyn LibraryApi>,
    transfers: Arc<dyn TransferBackend>,
    platform: Arc<dyn Platform>,
    paths: DownloadPaths,
    config: DownloadConfig,
    events: EventBus,
    guards: Mutex<GuardState>,
    update_token: StdMutex<Option<CancellationToken>>,
    pass_lock: Mutex<()>,
    ledger_lock: Mutex<()>,
}

impl DownloadSubsystem {
    /// Wire the subsystem to its collaborators and start handling transfer events
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: DownloadConfig,
        database: Database,
        cache: KeyValueCache,
        api: Arc<dyn LibraryApi>,
        transfers: Arc<dyn TransferBackend>,
        transfer_events: mpsc::UnboundedReceiver<TransferEvent>,
        platform: Arc<dyn Platform>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let subsystem = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            paths: DownloadPaths::from_config(&config),
            events: EventBus::new(config.event_channel_capacity),
            database,
            cache,
            api,
            transfers,
            platform,
            config,
            guards: Mutex::new(GuardState::default()),
            update_token: StdMutex::new(None),
            pass_lock: Mutex::new(()),
            ledger_lock: Mutex::new(()),
        });

        tokio::spawn(event_loop(Arc::downgrade(&subsystem), transfer_events));
        Ok(subsystem)
    }

    /// Open the database from the configuration and transfer over HTTP
    pub async fn open(
        config: DownloadConfig,
        api: Arc<dyn LibraryApi>,
        platform: Arc<dyn Platform>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let database = Database::new(config.database_path()).await?;
        let cache = KeyValueCache::new(Arc::new(SqliteKeyValueStore::new(database.pool().clone())));
        let (session, transfer_events) =
            HttpTransferSession::new(DownloadPaths::from_config(&config), config.request_timeout());

        Self::new(
            config,
            database,
            cache,
            api,
            Arc::new(session),
            transfer_events,
            platform,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn paths(&self) -> &DownloadPaths {
        &self.paths
    }

    // ========================================================================
    // ENQUEUE
    // ========================================================================

    /// Enqueue an audiobook or episode for download
    ///
    /// Returns once the item and its ledger are persisted; transfers run in the
    /// background.
    ///
    /// # Errors
    /// - `UnsupportedItemType` for anything but audiobooks and episodes
    /// - `Existing` if the item is already persisted
    /// - `Blocked` while the item has blocks
    /// - `Busy` while another enqueue or removal of the item runs
    pub async fn download(&self, item_id: &ItemIdentifier) -> Result<()> {
        if !item_id.is_playable() {
            return Err(ShelfError::UnsupportedItemType(item_id.item_type.to_string()));
        }

        if self.is_persisted(item_id).await? {
            self.refresh_cached_none(item_id).await;
            return Err(ShelfError::Existing(item_id.to_string()));
        }

        {
            let mut guards = self.guards.lock().await;
            if guards.blocked.contains_key(item_id) {
                return Err(ShelfError::Blocked(item_id.to_string()));
            }
            if !guards.busy.insert(item_id.clone()) {
                return Err(ShelfError::Busy(item_id.to_string()));
            }
        }

        let lease = self
            .platform
            .begin_background_lease(&format!("download::{}", item_id));

        let result = match self.is_persisted(item_id).await {
            // Another enqueue finished between the first check and taking the busy slot
            Ok(true) => Err(ShelfError::Existing(item_id.to_string())),
            Ok(false) => self.create_download(item_id).await,
            Err(e) => Err(e),
        };

        self.guards.lock().await.busy.remove(item_id);

        match result {
            Ok(()) => {
                info!(item = %item_id, "Created download");
                self.events.status_changed(item_id, DownloadStatus::Downloading);
                self.schedule_update_task();
                drop(lease);
                Ok(())
            }
            Err(e) => {
                error!(item = %item_id, error = %e, "Error creating download");
                drop(lease);
                Err(e)
            }
        }
    }

    async fn is_persisted(&self, item_id: &ItemIdentifier) -> Result<bool> {
        let pool = self.database.pool();
        Ok(match item_id.item_type {
            ItemType::Audiobook => queries::find_audiobook(pool, item_id).await?.is_some(),
            ItemType::Episode => queries::find_episode(pool, item_id).await?.is_some(),
            ItemType::Podcast => queries::find_podcast(pool, item_id).await?.is_some(),
            _ => false,
        })
    }

    /// Replace a cached `none` with the derived status and tell subscribers
    async fn refresh_cached_none(&self, item_id: &ItemIdentifier) {
        let key = keys::cached_download_status(item_id);
        if let Ok(Some(DownloadStatus::None)) = self.cache.get(&key).await {
            let status = self.status(item_id).await;
            self.events.status_changed(item_id, status);
        }
    }

    async fn create_download(&self, item_id: &ItemIdentifier) -> Result<()> {
        self.cache
            .set(&keys::cached_download_status(item_id), None)
            .await?;

        let graph = self.api.playable_item(item_id).await?;
        let pool = self.database.pool();

        let mut podcast_skeleton: Option<Podcast> = None;
        if let PlayableItem::Episode(episode) = &graph.item {
            let podcast_id = episode.podcast_id()?;
            if queries::find_podcast(pool, &podcast_id).await?.is_none() {
                podcast_skeleton = Some(self.api.podcast(&podcast_id).await?);
            }
        }

        let weights = ProgressWeights::compute(
            ImageSize::ALL.len(),
            graph.supplementary_pdfs.len(),
            graph.audio_files.len(),
        );

        let mut assets: Vec<PersistedAsset> = ImageSize::ALL
            .iter()
            .map(|size| PersistedAsset::image(item_id, *size, weights.cover))
            .collect();
        assets.extend(
            graph
                .supplementary_pdfs
                .iter()
                .map(|pdf| PersistedAsset::pdf(item_id, pdf, weights.pdf)),
        );
        assets.extend(
            graph
                .audio_files
                .iter()
                .map(|file| PersistedAsset::audio(item_id, file, weights.audio)),
        );

        let mut tx = pool.begin().await?;

        // A concurrent enqueue of a sibling episode may have created the podcast since the check
        let mut created_podcast = false;
        if let Some(podcast) = &podcast_skeleton {
            created_podcast = queries::insert_podcast(&mut *tx, podcast).await?;
            if created_podcast {
                for size in ImageSize::ALL {
                    queries::insert_asset(&mut *tx, &PersistedAsset::image(&podcast.id, size, 0.0))
                        .await?;
                }
            }
        }

        for chapter in &graph.chapters {
            queries::insert_chapter(&mut *tx, item_id, chapter).await?;
        }
        for asset in &assets {
            queries::insert_asset(&mut *tx, asset).await?;
        }

        match &graph.item {
            PlayableItem::Audiobook(audiobook) => {
                queries::insert_audiobook(&mut *tx, audiobook).await?;
            }
            PlayableItem::Episode(episode) => {
                let position = queries::count_episodes_of_podcast(&mut *tx, &episode.podcast_id()?).await?;
                queries::insert_episode(&mut *tx, episode, position).await?;
            }
        }

        tx.commit().await?;

        if let Some(podcast) = podcast_skeleton.as_ref().filter(|_| created_podcast) {
            info!(podcast = %podcast.id, item = %item_id, "Created podcast for episode");
        }
        Ok(())
    }

    // ========================================================================
    // REMOVAL
    // ========================================================================

    /// Remove a download
    ///
    /// Podcasts cascade to every episode. Removing a playable item that is not
    /// persisted succeeds.
    ///
    /// # Errors
    /// - `Missing` for a podcast that is not persisted
    /// - `Blocked` / `Busy` for a guarded audiobook or episode
    pub fn remove<'a>(&'a self, item_id: &'a ItemIdentifier) -> BoxFuture<'a, Result<()>> {
        async move {
            match item_id.item_type {
                ItemType::Podcast => self.remove_podcast(item_id).await,
                ItemType::Audiobook | ItemType::Episode => self.remove_playable(item_id, true).await,
                other => Err(ShelfError::UnsupportedItemType(other.to_string())),
            }
        }
        .boxed()
    }

    async fn remove_podcast(&self, podcast_id: &ItemIdentifier) -> Result<()> {
        let pool = self.database.pool();
        if queries::find_podcast(pool, podcast_id).await?.is_none() {
            return Err(ShelfError::Missing(podcast_id.to_string()));
        }

        for episode in queries::list_episodes_of_podcast(pool, podcast_id).await? {
            self.remove_playable(&episode.id, false).await?;
        }

        let assets = {
            let _ledger = self.ledger_lock.lock().await;
            let assets = queries::list_assets(pool, podcast_id).await?;
            self.cancel_transfers(&assets).await;

            let mut tx = pool.begin().await?;
            queries::delete_assets(&mut *tx, podcast_id).await?;
            queries::delete_podcast(&mut *tx, podcast_id).await?;
            tx.commit().await?;
            assets
        };

        self.delete_files(&assets).await;
        for size in ImageSize::ALL {
            self.cache.set(&keys::cover_path(podcast_id, size), None).await?;
        }

        info!(podcast = %podcast_id, "Removed podcast");
        Ok(())
    }

    async fn remove_playable(&self, item_id: &ItemIdentifier, prune_podcasts: bool) -> Result<()> {
        {
            let mut guards = self.guards.lock().await;
            if guards.blocked.contains_key(item_id) {
                return Err(ShelfError::Blocked(item_id.to_string()));
            }
            if !guards.busy.insert(item_id.clone()) {
                return Err(ShelfError::Busy(item_id.to_string()));
            }
        }

        let result = self.delete_playable(item_id).await;
        self.guards.lock().await.busy.remove(item_id);

        if let Err(e) = result {
            error!(item = %item_id, error = %e, "Error removing download");
            return Err(e);
        }

        self.events.status_changed(item_id, DownloadStatus::None);

        if prune_podcasts {
            if let Err(e) = self.remove_empty_podcasts().await {
                warn!(error = %e, "Failed to remove empty podcasts");
            }
        }
        Ok(())
    }

    async fn delete_playable(&self, item_id: &ItemIdentifier) -> Result<()> {
        let pool = self.database.pool();

        let assets = {
            let _ledger = self.ledger_lock.lock().await;
            let assets = queries::list_assets(pool, item_id).await?;
            self.cancel_transfers(&assets).await;

            let mut tx = pool.begin().await?;
            let removed = match item_id.item_type {
                ItemType::Episode => queries::delete_episode(&mut *tx, item_id).await?,
                _ => queries::delete_audiobook(&mut *tx, item_id).await?,
            };
            queries::delete_chapters(&mut *tx, item_id).await?;
            queries::delete_assets(&mut *tx, item_id).await?;
            tx.commit().await?;

            if removed == 0 {
                warn!(item = %item_id, "Tried to delete non-existent download");
            }
            assets
        };

        self.delete_files(&assets).await;

        self.cache
            .set(&keys::cached_download_status(item_id), None)
            .await?;
        self.cache
            .remove_cluster(&keys::failed_attempts_cluster(item_id))
            .await?;
        for size in ImageSize::ALL {
            self.cache.set(&keys::cover_path(item_id, size), None).await?;
        }

        info!(item = %item_id, "Removed download");
        Ok(())
    }

    async fn remove_empty_podcasts(&self) -> Result<()> {
        for podcast_id in queries::list_empty_podcasts(self.database.pool()).await? {
            self.remove(&podcast_id).await?;
        }
        Ok(())
    }

    async fn cancel_transfers(&self, assets: &[PersistedAsset]) {
        for task_id in assets.iter().filter_map(|asset| asset.download_task_id) {
            self.transfers.cancel(task_id).await;
        }
    }

    async fn delete_files(&self, assets: &[PersistedAsset]) {
        for asset in assets.iter().filter(|asset| asset.is_downloaded) {
            if let Err(e) = FileManager::safe_delete(&self.paths.asset_path(asset)).await {
                warn!(asset = %asset.id, error = %e, "Failed to delete downloaded file");
            }
        }
    }

    /// Remove every download; each step runs even if an earlier one failed
    pub async fn remove_all(&self) {
        let pool = self.database.pool();

        {
            let _ledger = self.ledger_lock.lock().await;
            match queries::list_assets_in_flight(pool).await {
                Ok(assets) => self.cancel_transfers(&assets).await,
                Err(e) => error!(error = %e, "Failed to list active transfers"),
            }
            // Audiobook assets go with their rows so no pass picks them up again
            match queries::list_audiobooks(pool).await {
                Ok(audiobooks) => {
                    for audiobook in audiobooks {
                        if let Err(e) = queries::delete_assets(pool, &audiobook.id).await {
                            error!(item = %audiobook.id, error = %e, "Failed to remove assets");
                        }
                    }
                }
                Err(e) => error!(error = %e, "Failed to list audiobooks"),
            }
            if let Err(e) = queries::delete_all_audiobooks(pool).await {
                error!(error = %e, "Failed to remove audiobooks");
            }
        }

        match queries::list_episode_ids(pool).await {
            Ok(episodes) => {
                for episode_id in episodes {
                    if let Err(e) = self.remove(&episode_id).await {
                        error!(item = %episode_id, error = %e, "Failed to remove episode");
                    }
                }
            }
            Err(e) => error!(error = %e, "Failed to list episodes"),
        }

        {
            let _ledger = self.ledger_lock.lock().await;
            if let Err(e) = queries::delete_all_assets(pool).await {
                error!(error = %e, "Failed to remove assets");
            }
            if let Err(e) = queries::delete_all_chapters(pool).await {
                error!(error = %e, "Failed to remove chapters");
            }
        }

        if let Err(e) = queries::delete_all_search_entries(pool).await {
            error!(error = %e, "Failed to clear search index");
        }

        for cluster in [keys::DOWNLOAD_STATUS_CLUSTER, keys::COVER_PATH_CLUSTER] {
            if let Err(e) = self.cache.remove_cluster(cluster).await {
                error!(cluster, error = %e, "Failed to clear cache cluster");
            }
        }

        if let Err(e) = FileManager::remove_directory(self.paths.root()).await {
            error!(error = %e, "Failed to remove download directory");
        }
        if let Err(e) = self.database.reclaim_space().await {
            warn!(error = %e, "Failed to reclaim database space");
        }

        self.events.invalidate_all();
    }

    /// Remove every download of one server connection
    pub async fn remove_connection(&self, connection_id: &str) -> Result<()> {
        let pool = self.database.pool();

        for item_id in queries::list_audiobook_ids_for_connection(pool, connection_id).await? {
            if let Err(e) = self.remove_playable(&item_id, false).await {
                error!(item = %item_id, error = %e, "Failed to remove audiobook");
            }
        }
        for podcast_id in queries::list_podcast_ids_for_connection(pool, connection_id).await? {
            if let Err(e) = self.remove_podcast(&podcast_id).await {
                error!(item = %podcast_id, error = %e, "Failed to remove podcast");
            }
        }

        // Rows left behind by failed removals above are kept; their files go with the directory
        let leftovers = queries::list_assets_for_connection(pool, connection_id).await?;
        if !leftovers.is_empty() {
            warn!(connection = connection_id, count = leftovers.len(), "Assets remain after removing connection");
        }

        queries::delete_search_entries_for_connection(pool, connection_id).await?;
        FileManager::remove_directory(&self.paths.connection_directory(connection_id)).await?;

        info!(connection = connection_id, "Removed connection downloads");
        self.events.invalidate_all();
        Ok(())
    }

    // ========================================================================
    // BLOCKS
    // ========================================================================

    pub async fn add_block(&self, item_id: &ItemIdentifier) {
        *self
            .guards
            .lock()
            .await
            .blocked
            .entry(item_id.clone())
            .or_insert(0) += 1;
    }

    pub async fn remove_block(&self, item_id: &ItemIdentifier) {
        let mut guards = self.guards.lock().await;
        let Some(count) = guards.blocked.get_mut(item_id) else {
            warn!(item = %item_id, "Tried to remove non existing block");
            return;
        };

        *count -= 1;
        if *count == 0 {
            guards.blocked.remove(item_id);
        }
    }

    // ========================================================================
    // STATUS
    // ========================================================================

    pub async fn status(&self, item_id: &ItemIdentifier) -> DownloadStatus {
        if !item_id.is_playable() {
            return DownloadStatus::None;
        }

        let key = keys::cached_download_status(item_id);
        match self.cache.get(&key).await {
            Ok(Some(DownloadStatus::None)) => {
                if let Err(e) = self.cache.set(&key, None).await {
                    error!(item = %item_id, error = %e, "Failed to clear cached download status");
                }
            }
            Ok(Some(status)) => return status,
            Ok(None) => {}
            Err(e) => warn!(item = %item_id, error = %e, "Failed to read cached download status"),
        }

        let status = self.fetch_download_status(item_id).await;
        if let Err(e) = self.cache.set(&key, Some(&status)).await {
            warn!(item = %item_id, error = %e, "Failed to cache download status");
        }
        status
    }

    /// Status derived from the ledger
    async fn fetch_download_status(&self, item_id: &ItemIdentifier) -> DownloadStatus {
        match queries::asset_counts(self.database.pool(), item_id).await {
            Ok((0, _)) => DownloadStatus::None,
            Ok((total, downloaded)) if total == downloaded => DownloadStatus::Completed,
            Ok(_) => DownloadStatus::Downloading,
            Err(e) => {
                error!(item = %item_id, error = %e, "Failed to derive download status");
                DownloadStatus::None
            }
        }
    }

    /// Fraction of the item already on disk, from 0.0 to 1.0
    pub async fn download_progress(&self, item_id: &ItemIdentifier) -> f64 {
        queries::downloaded_weight(self.database.pool(), item_id)
            .await
            .unwrap_or_else(|e| {
                warn!(item = %item_id, error = %e, "Failed to read download progress");
                0.0
            })
    }

    // ========================================================================
    // READ-BACK
    // ========================================================================

    /// Path of a downloaded cover variant
    pub async fn cover(&self, item_id: &ItemIdentifier, size: ImageSize) -> Option<PathBuf> {
        let key = keys::cover_path(item_id, size);

        if let Ok(Some(cached)) = self.cache.get(&key).await {
            if FileManager::file_exists(&cached).await {
                return Some(cached);
            }
            debug!(item = %item_id, size = size.as_str(), "Cached cover is gone");
            if let Err(e) = self.cache.set(&key, None).await {
                warn!(item = %item_id, error = %e, "Failed to drop cached cover path");
            }
        }

        let assets = queries::list_assets(self.database.pool(), item_id).await.ok()?;
        let asset = assets.iter().find(|asset| {
            asset.is_downloaded && matches!(asset.file_type, AssetFileType::Image { size: current } if current == size)
        })?;

        let path = self.paths.asset_path(asset);
        if !FileManager::file_exists(&path).await {
            return None;
        }

        if let Err(e) = self.cache.set(&key, Some(&path)).await {
            error!(item = %item_id, size = size.as_str(), error = %e, "Failed to cache cover path");
        }
        Some(path)
    }

    /// Audio files of an item in playback order
    pub async fn audio_tracks(&self, item_id: &ItemIdentifier) -> Result<Vec<AudioTrack>> {
        let mut tracks: Vec<AudioTrack> = queries::list_assets(self.database.pool(), item_id)
            .await?
            .iter()
            .filter_map(|asset| match &asset.file_type {
                AssetFileType::Audio { offset, duration, .. } => Some(AudioTrack {
                    offset: *offset,
                    duration: *duration,
                    resource: self.paths.asset_path(asset),
                }),
                _ => None,
            })
            .collect();

        tracks.sort_by(|a, b| a.offset.total_cmp(&b.offset));
        Ok(tracks)
    }

    pub async fn chapters(&self, item_id: &ItemIdentifier) -> Result<Vec<Chapter>> {
        queries::list_chapters(self.database.pool(), item_id).await
    }

    pub async fn item(&self, item_id: &ItemIdentifier) -> Result<Option<Item>> {
        let pool = self.database.pool();
        Ok(match item_id.item_type {
            ItemType::Audiobook => queries::find_audiobook(pool, item_id).await?.map(Item::Audiobook),
            ItemType::Episode => queries::find_episode(pool, item_id).await?.map(Item::Episode),
            ItemType::Podcast => queries::find_podcast(pool, item_id).await?.map(Item::Podcast),
            _ => None,
        })
    }

    /// Look up a persisted audiobook or episode by identifier parts
    pub async fn playable_item(
        &self,
        primary_id: &str,
        grouping_id: Option<&str>,
        connection_id: &str,
    ) -> Result<Option<PlayableItem>> {
        queries::find_playable_by_parts(self.database.pool(), primary_id, grouping_id, connection_id).await
    }

    pub async fn podcast(&self, primary_id: &str, connection_id: &str) -> Result<Option<Podcast>> {
        queries::find_podcast_by_parts(self.database.pool(), primary_id, connection_id).await
    }

    pub async fn audiobooks(&self) -> Result<Vec<Audiobook>> {
        queries::list_audiobooks(self.database.pool()).await
    }

    pub async fn audiobooks_in(&self, connection_id: &str, library_id: &str) -> Result<Vec<Audiobook>> {
        queries::list_audiobooks_in_library(self.database.pool(), connection_id, library_id).await
    }

    pub async fn episodes(&self) -> Result<Vec<Episode>> {
        queries::list_episodes(self.database.pool()).await
    }

    pub async fn episodes_of(&self, podcast_id: &ItemIdentifier) -> Result<Vec<Episode>> {
        if podcast_id.item_type != ItemType::Podcast {
            return Err(ShelfError::UnsupportedItemType(podcast_id.item_type.to_string()));
        }
        queries::list_episodes_of_podcast(self.database.pool(), podcast_id).await
    }

    pub async fn podcasts(&self) -> Result<Vec<Podcast>> {
        queries::list_podcasts(self.database.pool()).await
    }

    /// Items whose name, subtitle or author contains `query`
    pub async fn search(&self, query: &str, item_type: Option<ItemType>) -> Result<Vec<ItemIdentifier>> {
        let entries = queries::search(self.database.pool(), query, item_type, SEARCH_LIMIT).await?;
        Ok(entries.into_iter().map(|entry| entry.item_id).collect())
    }

    // ========================================================================
    // SCHEDULING
    // ========================================================================

    /// Supersede any running scheduling pass with a new one
    pub fn schedule_update_task(&self) {
        let Some(this) = self.this.upgrade() else {
            return;
        };

        let token = CancellationToken::new();
        {
            let mut current = self
                .update_token
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = current.replace(token.clone()) {
                previous.cancel();
            }
        }

        tokio::spawn(async move {
            if let Err(e) = this.schedule_unfinished_for_completion(&token).await {
                error!(error = %e, "Failed to schedule unfinished downloads");
            }
        });
    }

    async fn schedule_unfinished_for_completion(&self, token: &CancellationToken) -> Result<()> {
        let pass = self.pass_lock.lock().await;
        if token.is_cancelled() {
            return Ok(());
        }

        if self.platform.network_path().is_metered() && !self.config.allow_cellular_downloads {
            debug!("Metered network and cellular downloads disabled, not scheduling");
            return Ok(());
        }

        let active = self.transfers.active_tasks().await.len();
        if active >= self.config.max_active_transfers {
            debug!(active, "Transfer ceiling reached, skipping");
            return Ok(());
        }

        let pool = self.database.pool();
        let Some(asset) = queries::next_pending_asset(pool).await? else {
            return Ok(());
        };

        if token.is_cancelled() {
            return Ok(());
        }

        let request = match self.resolve_request(&asset).await {
            Ok(request) => request,
            Err(e) if matches!(asset.file_type, AssetFileType::Image { .. }) => {
                debug!(asset = %asset.id, item = %asset.item_id, error = %e, "Cover unavailable, skipping");
                drop(pass);
                self.finish_without_transfer(&asset).await?;
                self.schedule_update_task();
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if token.is_cancelled() {
            return Ok(());
        }

        let task_id = self.transfers.prepare(request).await?;
        if let Err(e) = queries::set_asset_task(pool, asset.id, Some(task_id)).await {
            self.transfers.cancel(task_id).await;
            return Err(e);
        }

        if let Err(e) = self.transfers.resume(task_id).await {
            drop(pass);
            self.handle_failure(task_id, &e.to_string()).await;
            return Ok(());
        }

        info!(asset = %asset.id, item = %asset.item_id, task = task_id, "Began downloading asset");

        drop(pass);
        self.schedule_update_task();
        Ok(())
    }

    async fn resolve_request(&self, asset: &PersistedAsset) -> Result<TransferRequest> {
        match &asset.file_type {
            AssetFileType::Audio { ino, .. } => self.api.audio_track_request(&asset.item_id, ino).await,
            AssetFileType::Pdf { ino, .. } => self.api.pdf_request(&asset.item_id, ino).await,
            AssetFileType::Image { size } => self.api.cover_request(&asset.item_id, *size).await,
        }
    }

    /// Mark an asset done with nothing on disk
    async fn finish_without_transfer(&self, asset: &PersistedAsset) -> Result<()> {
        let _ledger = self.ledger_lock.lock().await;
        queries::mark_asset_downloaded(self.database.pool(), asset.id).await?;
        self.finished_downloading(&asset.item_id).await;
        Ok(())
    }

    /// Publish completion if the item's last asset just finished
    ///
    /// Callers hold the ledger lock.
    async fn finished_downloading(&self, item_id: &ItemIdentifier) {
        if !item_id.is_playable() {
            return;
        }
        if self.fetch_download_status(item_id).await != DownloadStatus::Completed {
            return;
        }

        if let Err(e) = self
            .cache
            .set(&keys::cached_download_status(item_id), Some(&DownloadStatus::Completed))
            .await
        {
            error!(item = %item_id, error = %e, "Failed to update download status after it finished downloading");
        }

        info!(item = %item_id, "Finished downloading item");
        self.events.status_changed(item_id, DownloadStatus::Completed);
    }

    /// Re-arm the scheduler when the app returns to the foreground
    pub fn app_did_become_active(&self) {
        self.schedule_update_task();
    }

    pub fn network_path_changed(&self) {
        self.schedule_update_task();
    }

    /// Forget task IDs the transfer backend no longer knows and re-arm
    ///
    /// Call once on launch; tasks do not survive the process.
    pub async fn resume_pending(&self) -> Result<()> {
        let active: HashSet<i64> = self.transfers.active_tasks().await.into_iter().collect();

        {
            let _ledger = self.ledger_lock.lock().await;
            for asset in queries::list_assets_in_flight(self.database.pool()).await? {
                let Some(task_id) = asset.download_task_id else {
                    continue;
                };
                if active.contains(&task_id) {
                    continue;
                }
                debug!(asset = %asset.id, task = task_id, "Clearing stale transfer");
                queries::set_asset_task(self.database.pool(), asset.id, None).await?;
            }
        }

        if active.is_empty() {
            let removed = FileManager::cleanup_temp_files(&self.paths.transfer_directory()).await?;
            if removed > 0 {
                debug!(removed, "Removed stale transfer files");
            }
        }

        self.schedule_update_task();
        Ok(())
    }

    /// The transfer session went away: forget and cancel every task
    pub async fn invalidate_active_downloads(&self) {
        info!("Invalidating active downloads");

        {
            let _ledger = self.ledger_lock.lock().await;
            if let Err(e) = queries::clear_all_task_ids(self.database.pool()).await {
                error!(error = %e, "Failed to clear task IDs while invalidating active downloads");
            }
        }

        for task_id in self.transfers.active_tasks().await {
            self.transfers.cancel(task_id).await;
        }

        self.events.invalidate_all();
    }

    // ========================================================================
    // TRANSFER CALLBACKS
    // ========================================================================

    async fn handle_transfer_event(&self, event: TransferEvent) {
        match event {
            TransferEvent::Progress {
                task_id,
                bytes_written,
                total_bytes_written,
                total_bytes_expected,
            } => {
                match queries::find_asset_by_task(self.database.pool(), task_id).await {
                    Ok(Some(asset)) => self.events.publish(DownloadEvent::ProgressChanged(ProgressChange {
                        item_id: asset.item_id,
                        asset_id: asset.id,
                        progress_weight: asset.progress_weight,
                        bytes_written,
                        total_bytes_written,
                        total_bytes_expected,
                    })),
                    Ok(None) => {}
                    Err(e) => debug!(task = task_id, error = %e, "Failed to map progress to asset"),
                }
            }
            TransferEvent::Finished { task_id } => self.handle_completion(task_id).await,
            TransferEvent::Failed { task_id, error } => self.handle_failure(task_id, &error).await,
            TransferEvent::Invalidated => self.invalidate_active_downloads().await,
        }
    }

    async fn handle_completion(&self, task_id: i64) {
        match self.complete_transfer(task_id).await {
            Ok(true) => self.schedule_update_task(),
            Ok(false) => self.handle_failure(task_id, "no asset for finished transfer").await,
            Err(e) => {
                warn!(task = task_id, error = %e, "Failed to store finished transfer");
                self.handle_failure(task_id, &e.to_string()).await;
            }
        }
    }

    /// Returns `false` if no asset owns the task
    async fn complete_transfer(&self, task_id: i64) -> Result<bool> {
        let _ledger = self.ledger_lock.lock().await;
        let pool = self.database.pool();

        let Some(asset) = queries::find_asset_by_task(pool, task_id).await? else {
            return Ok(false);
        };

        let destination = self.paths.asset_path(&asset);
        if let Some(parent) = destination.parent() {
            FileManager::ensure_directory_exists(parent).await?;
        }
        FileManager::safe_move(&self.paths.temporary_location(task_id), &destination).await?;

        if let Err(e) = self.platform.exclude_from_backup(&destination) {
            warn!(asset = %asset.id, error = %e, "Failed to exclude download from backups");
        }

        queries::mark_asset_downloaded(pool, asset.id).await?;
        info!(asset = %asset.id, item = %asset.item_id, "Finished downloading asset");

        self.finished_downloading(&asset.item_id).await;
        Ok(true)
    }

    async fn handle_failure(&self, task_id: i64, reason: &str) {
        if let Err(e) = self.record_failure(task_id, reason).await {
            error!(task = task_id, error = %e, "Failed to record transfer failure");
        }
        self.schedule_update_task();
    }

    async fn record_failure(&self, task_id: i64, reason: &str) -> Result<()> {
        let ledger = self.ledger_lock.lock().await;
        let pool = self.database.pool();

        if let Err(e) = FileManager::safe_delete(&self.paths.temporary_location(task_id)).await {
            warn!(task = task_id, error = %e, "Failed to delete transfer file");
        }

        let Some(asset) = queries::find_asset_by_task(pool, task_id).await? else {
            if reason == CANCELLED {
                debug!(task = task_id, "Cancelled transfer has no asset");
            } else {
                error!(task = task_id, reason, "Task failed and corresponding asset not found");
            }
            return Ok(());
        };

        warn!(task = task_id, asset = %asset.id, item = %asset.item_id, reason, "Transfer failed");

        let key = keys::asset_failed_attempts(asset.id, &asset.item_id);
        let attempts = self.cache.get(&key).await?.unwrap_or(0) + 1;
        self.cache.set(&key, Some(&attempts)).await?;
        info!(asset = %asset.id, attempts, "Asset failed to download");

        if attempts <= self.config.asset_attempt_limit {
            // Pending again for the next pass
            queries::set_asset_task(pool, asset.id, None).await?;
            return Ok(());
        }

        if !asset.item_id.is_playable() {
            warn!(asset = %asset.id, item = %asset.item_id, "Giving up on podcast asset");
            queries::set_asset_task(pool, asset.id, None).await?;
            queries::mark_asset_downloaded(pool, asset.id).await?;
            return Ok(());
        }

        // The task ID stays recorded so no pass picks the asset up before removal
        drop(ledger);
        warn!(
            asset = %asset.id,
            item = %asset.item_id,
            limit = self.config.asset_attempt_limit,
            "Asset exceeded attempt limit, removing download"
        );
        let Err(e) = self.remove(&asset.item_id).await else {
            return Ok(());
        };

        // Removal was refused (blocked or busy); the next failure tries again
        warn!(item = %asset.item_id, error = %e, "Could not remove failed download");
        let _ledger = self.ledger_lock.lock().await;
        if queries::find_asset_by_task(pool, task_id).await?.is_some() {
            queries::set_asset_task(pool, asset.id, None).await?;
        }
        Ok(())
    }
}

async fn event_loop(
    subsystem: Weak<DownloadSubsystem>,
    mut receiver: mpsc::UnboundedReceiver<TransferEvent>,
) {
    while let Some(event) = receiver.recv().await {
        let Some(subsystem) = subsystem.upgrade() else {
            break;
        };
        subsystem.handle_transfer_event(event).await;
    }
    debug!("Transfer event loop stopped");
}
