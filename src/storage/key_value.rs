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


//! Auxiliary key-value cache
//!
//! Small JSON values addressed by an identifier and grouped into clusters so a
//! whole group can be dropped at once. The download subsystem keeps three kinds
//! of entries here:
//! - the cached download status of an item (untrusted fast path)
//! - resolved cover image paths
//! - per-asset failed transfer attempts, clustered by owning item

use crate::error::Result;
use crate::item::{DownloadStatus, ImageSize, ItemIdentifier};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Backend for raw key-value entries
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, identifier: &str) -> Result<Option<String>>;

    /// Store a value, or remove the entry when `value` is `None`
    async fn set(
        &self,
        identifier: &str,
        cluster: &str,
        value: Option<String>,
        purgeable: bool,
    ) -> Result<()>;

    /// Remove every entry of a cluster, returning the number removed
    async fn remove_cluster(&self, cluster: &str) -> Result<u64>;

    /// Drop all entries flagged purgeable
    async fn purge(&self) -> Result<u64>;
}

/// Key-value store backed by the `KeyValueEntries` table
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, identifier: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM KeyValueEntries WHERE identifier = ?")
                .bind(identifier)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn set(
        &self,
        identifier: &str,
        cluster: &str,
        value: Option<String>,
        purgeable: bool,
    ) -> Result<()> {
        match value {
            Some(value) => {
                sqlx::query(
                    r#"
                    INSERT INTO KeyValueEntries (identifier, cluster, value, purgeable, updated_at)
                    VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
                    ON CONFLICT(identifier) DO UPDATE SET
                        cluster = excluded.cluster,
                        value = excluded.value,
                        purgeable = excluded.purgeable,
                        updated_at = CURRENT_TIMESTAMP
                    "#,
                )
                .bind(identifier)
                .bind(cluster)
                .bind(value)
                .bind(purgeable)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM KeyValueEntries WHERE identifier = ?")
                    .bind(identifier)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn remove_cluster(&self, cluster: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM KeyValueEntries WHERE cluster = ?")
            .bind(cluster)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM KeyValueEntries WHERE purgeable = 1")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Typed key into the cache
#[derive(Debug, Clone)]
pub struct Key<T> {
    pub identifier: String,
    pub cluster: String,
    pub purgeable: bool,
    _value: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub fn new(identifier: impl Into<String>, cluster: impl Into<String>, purgeable: bool) -> Self {
        Self {
            identifier: identifier.into(),
            cluster: cluster.into(),
            purgeable,
            _value: PhantomData,
        }
    }
}

/// Keys used by the download subsystem
pub mod keys {
    use super::*;

    pub const DOWNLOAD_STATUS_CLUSTER: &str = "download.status";
    pub const COVER_PATH_CLUSTER: &str = "download.cover_path";

    pub fn failed_attempts_cluster(item_id: &ItemIdentifier) -> String {
        format!("download.failed_attempts/{}", item_id)
    }

    pub fn asset_failed_attempts(asset_id: Uuid, item_id: &ItemIdentifier) -> Key<u32> {
        Key::new(
            format!("download.failed_attempts/{}", asset_id),
            failed_attempts_cluster(item_id),
            false,
        )
    }

    pub fn cached_download_status(item_id: &ItemIdentifier) -> Key<DownloadStatus> {
        Key::new(
            format!("download.status/{}", item_id),
            DOWNLOAD_STATUS_CLUSTER,
            true,
        )
    }

    pub fn cover_path(item_id: &ItemIdentifier, size: ImageSize) -> Key<PathBuf> {
        Key::new(
            format!("download.cover_path/{}/{}", item_id, size.as_str()),
            COVER_PATH_CLUSTER,
            true,
        )
    }
}

/// Typed JSON view over a [`KeyValueStore`]
#[derive(Clone)]
pub struct KeyValueCache {
    store: Arc<dyn KeyValueStore>,
}

impl KeyValueCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read a value; entries that no longer decode are treated as absent
    pub async fn get<T: DeserializeOwned>(&self, key: &Key<T>) -> Result<Option<T>> {
        let Some(raw) = self.store.get(&key.identifier).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key = %key.identifier, error = %e, "Dropping undecodable cache entry");
                self.store
                    .set(&key.identifier, &key.cluster, None, key.purgeable)
                    .await?;
                Ok(None)
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &Key<T>, value: Option<&T>) -> Result<()> {
        let raw = value.map(serde_json::to_string).transpose()?;
        self.store
            .set(&key.identifier, &key.cluster, raw, key.purgeable)
            .await
    }

    pub async fn remove_cluster(&self, cluster: &str) -> Result<u64> {
        self.store.remove_cluster(cluster).await
    }

    pub async fn purge(&self) -> Result<u64> {
        self.store.purge().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    async fn cache() -> KeyValueCache {
        let db = Database::new_in_memory().await.unwrap();
        KeyValueCache::new(Arc::new(SqliteKeyValueStore::new(db.pool().clone())))
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let cache = cache().await;
        let item = ItemIdentifier::audiobook("1", "lib", "conn");
        let key = keys::cached_download_status(&item);

        assert_eq!(cache.get(&key).await.unwrap(), None);
        cache.set(&key, Some(&DownloadStatus::Downloading)).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(DownloadStatus::Downloading));

        cache.set(&key, None).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_cluster_is_scoped_to_item() {
        let cache = cache().await;
        let a = ItemIdentifier::audiobook("1", "lib", "conn");
        let b = ItemIdentifier::audiobook("11", "lib", "conn");
        let key_a = keys::asset_failed_attempts(Uuid::new_v4(), &a);
        let key_b = keys::asset_failed_attempts(Uuid::new_v4(), &b);

        cache.set(&key_a, Some(&2)).await.unwrap();
        cache.set(&key_b, Some(&1)).await.unwrap();

        let removed = cache
            .remove_cluster(&keys::failed_attempts_cluster(&a))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.get(&key_a).await.unwrap(), None);
        assert_eq!(cache.get(&key_b).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_purge_keeps_failure_counters() {
        let cache = cache().await;
        let item = ItemIdentifier::audiobook("1", "lib", "conn");
        let status = keys::cached_download_status(&item);
        let attempts = keys::asset_failed_attempts(Uuid::new_v4(), &item);

        cache.set(&status, Some(&DownloadStatus::Completed)).await.unwrap();
        cache.set(&attempts, Some(&3)).await.unwrap();

        assert_eq!(cache.purge().await.unwrap(), 1);
        assert_eq!(cache.get(&status).await.unwrap(), None);
        assert_eq!(cache.get(&attempts).await.unwrap(), Some(3));
    }
}
