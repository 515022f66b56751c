//! End-to-end behavior of the download subsystem against mocked collaborators

#[macro_use]
mod common;

use common::*;
use shelf_core::download::{DownloadEvent, ProgressChange, ProgressWeights};
use shelf_core::item::{ImageSize, ItemIdentifier};
use shelf_core::storage::{keys, queries, AssetFileType, PersistedAsset};
use shelf_core::{DownloadStatus, ShelfError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

async fn weight_sum(harness: &Harness, item_id: &ItemIdentifier) -> f64 {
    queries::list_assets(harness.database.pool(), item_id)
        .await
        .unwrap()
        .iter()
        .map(|asset| asset.progress_weight)
        .sum()
}

#[tokio::test]
async fn test_enqueue_persists_item_and_ledger() {
    let harness = harness(MockApi::new().with_audio_files(3).with_pdfs(2)).await;
    let book = audiobook_id("li_1");

    harness.downloads.download(&book).await.unwrap();

    let assets = queries::list_assets(harness.database.pool(), &book).await.unwrap();
    assert_eq!(assets.len(), ImageSize::ALL.len() + 2 + 3);
    assert!((weight_sum(&harness, &book).await - 1.0).abs() < 1e-9);

    assert_eq!(harness.downloads.chapters(&book).await.unwrap().len(), 2);
    assert_eq!(harness.downloads.audiobooks().await.unwrap().len(), 1);
    assert_eq!(harness.downloads.status(&book).await, DownloadStatus::Downloading);

    // The lease covers the enqueue only
    assert_eq!(harness.platform.leases_begun.load(Ordering::SeqCst), 1);
    assert_eq!(harness.platform.leases_released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_weights_sum_to_one_for_every_item() {
    let harness = harness(MockApi::new().with_audio_files(7).with_pdfs(1)).await;
    let items = [audiobook_id("li_1"), episode_id("ep_1", "pod_1"), episode_id("ep_2", "pod_1")];

    for item in &items {
        harness.downloads.download(item).await.unwrap();
        assert!((weight_sum(&harness, item).await - 1.0).abs() < 1e-9, "{}", item);
    }
}

#[tokio::test]
async fn test_unsupported_item_types() {
    let harness = harness(MockApi::new()).await;

    let result = harness.downloads.download(&podcast_id("pod_1")).await;
    assert!(matches!(result, Err(ShelfError::UnsupportedItemType(_))));

    let result = harness.downloads.episodes_of(&audiobook_id("li_1")).await;
    assert!(matches!(result, Err(ShelfError::UnsupportedItemType(_))));

    assert_eq!(harness.downloads.status(&podcast_id("pod_1")).await, DownloadStatus::None);
}

#[tokio::test]
async fn test_duplicate_enqueue_is_existing() {
    let harness = harness(MockApi::new()).await;
    let book = audiobook_id("li_1");

    harness.downloads.download(&book).await.unwrap();
    let result = harness.downloads.download(&book).await;
    assert!(matches!(result, Err(ShelfError::Existing(_))));
    assert_eq!(harness.api.graph_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_existing_refreshes_cached_none() {
    let harness = harness(MockApi::new()).await;
    let book = audiobook_id("li_1");
    harness.downloads.download(&book).await.unwrap();

    harness
        .cache
        .set(&keys::cached_download_status(&book), Some(&DownloadStatus::None))
        .await
        .unwrap();

    let mut events = harness.downloads.subscribe();
    let result = harness.downloads.download(&book).await;
    assert!(matches!(result, Err(ShelfError::Existing(_))));
    assert_eq!(next_status(&mut events, &book).await, DownloadStatus::Downloading);
}

#[tokio::test]
async fn test_busy_while_enqueue_in_flight() {
    let gate = Arc::new(Notify::new());
    let harness = harness(MockApi::new().with_gate(gate.clone())).await;
    let book = audiobook_id("li_1");

    let downloads = harness.downloads.clone();
    let first = {
        let book = book.clone();
        tokio::spawn(async move { downloads.download(&book).await })
    };

    eventually!(harness.api.graph_requests.load(Ordering::SeqCst) == 1);

    let second = harness.downloads.download(&book).await;
    assert!(matches!(second, Err(ShelfError::Busy(_))));
    let removal = harness.downloads.remove(&book).await;
    assert!(matches!(removal, Err(ShelfError::Busy(_))));

    gate.notify_one();
    first.await.unwrap().unwrap();

    assert_eq!(harness.downloads.status(&book).await, DownloadStatus::Downloading);
}

#[tokio::test]
async fn test_single_completed_notification() {
    let harness = harness(MockApi::new().with_audio_files(2).without_covers()).await;
    let book = audiobook_id("li_1");
    let mut events = harness.downloads.subscribe();

    harness.downloads.download(&book).await.unwrap();
    assert_eq!(next_status(&mut events, &book).await, DownloadStatus::Downloading);

    eventually!(harness.transfers.running().len() == 2);
    harness.transfers.complete_all().await;

    assert_eq!(next_status(&mut events, &book).await, DownloadStatus::Completed);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let later_completions = drain(&mut events)
        .into_iter()
        .filter(|event| {
            matches!(event, DownloadEvent::StatusChanged(Some(change))
                if change.item_id == book && change.status == DownloadStatus::Completed)
        })
        .count();
    assert_eq!(later_completions, 0);

    assert_eq!(harness.downloads.status(&book).await, DownloadStatus::Completed);
    assert!((harness.downloads.download_progress(&book).await - 1.0).abs() < 1e-9);
    assert_eq!(harness.platform.excluded.load(Ordering::SeqCst), 2);

    let tracks = harness.downloads.audio_tracks(&book).await.unwrap();
    assert_eq!(tracks.len(), 2);
    assert!(tracks[0].offset < tracks[1].offset);
    for track in &tracks {
        assert!(track.resource.exists());
        assert!(track.resource.starts_with(harness.downloads.paths().connection_directory(CONNECTION)));
    }
}

#[tokio::test]
async fn test_progress_is_weighted_sum_of_downloaded_assets() {
    let harness = harness(MockApi::new()).await;
    let book = audiobook_id("li_1");
    let pool = harness.database.pool();

    queries::insert_audiobook(pool, &sample_audiobook(&book)).await.unwrap();
    let mut ids = Vec::new();
    for i in 0..10 {
        let file = shelf_core::item::AudioFile {
            ino: i.to_string(),
            file_extension: "m4b".to_string(),
            offset: i as f64,
            duration: 1.0,
        };
        let asset = PersistedAsset::audio(&book, &file, 0.1);
        queries::insert_asset(pool, &asset).await.unwrap();
        ids.push(asset.id);
    }
    for id in &ids[..6] {
        queries::mark_asset_downloaded(pool, *id).await.unwrap();
    }

    assert!((harness.downloads.download_progress(&book).await - 0.6).abs() < 1e-9);
    assert_eq!(harness.downloads.download_progress(&audiobook_id("missing")).await, 0.0);
}

#[tokio::test]
async fn test_transfer_ceiling() {
    let harness = harness(MockApi::new().with_audio_files(10).without_covers()).await;
    let book = audiobook_id("li_1");

    harness.downloads.download(&book).await.unwrap();
    eventually!(harness.transfers.running().len() == 4);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.transfers.running().len(), 4);
    assert_eq!(harness.transfers.max_active(), 4);

    let first = harness.transfers.running()[0];
    harness.transfers.complete(first).await;
    eventually!(harness.transfers.resumed() == 5);
    eventually!(harness.transfers.running().len() == 4);
    assert_eq!(harness.transfers.max_active(), 4);
}

#[tokio::test]
async fn test_retry_ceiling_removes_item() {
    let harness = harness(MockApi::new().without_covers()).await;
    let book = audiobook_id("li_1");
    harness.transfers.fail_on_resume(true);
    let mut events = harness.downloads.subscribe();

    harness.downloads.download(&book).await.unwrap();
    assert_eq!(next_status(&mut events, &book).await, DownloadStatus::Downloading);
    assert_eq!(next_status(&mut events, &book).await, DownloadStatus::None);

    assert!(harness.downloads.item(&book).await.unwrap().is_none());
    assert!(queries::list_assets(harness.database.pool(), &book).await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.transfers.resumed(), 4);
}

#[tokio::test]
async fn test_podcast_cascade() {
    let harness = harness(MockApi::new().with_audio_files(2)).await;
    let podcast = podcast_id("pod_1");
    let first = episode_id("ep_1", "pod_1");
    let second = episode_id("ep_2", "pod_1");

    harness.downloads.download(&first).await.unwrap();
    harness.downloads.download(&second).await.unwrap();
    assert_eq!(harness.api.podcast_requests.load(Ordering::SeqCst), 1);

    let episodes = harness.downloads.episodes_of(&podcast).await.unwrap();
    assert_eq!(
        episodes.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
        vec![first.clone(), second.clone()]
    );
    assert_eq!(
        queries::list_assets(harness.database.pool(), &podcast).await.unwrap().len(),
        ImageSize::ALL.len()
    );

    harness.downloads.remove(&podcast).await.unwrap();

    assert!(harness.downloads.podcasts().await.unwrap().is_empty());
    assert!(harness.downloads.episodes().await.unwrap().is_empty());
    for item in [&podcast, &first, &second] {
        assert!(queries::list_assets(harness.database.pool(), item).await.unwrap().is_empty());
    }

    let result = harness.downloads.remove(&podcast).await;
    assert!(matches!(result, Err(ShelfError::Missing(_))));
}

#[tokio::test]
async fn test_removing_last_episode_prunes_podcast() {
    let harness = harness(MockApi::new()).await;
    let episode = episode_id("ep_1", "pod_1");

    harness.downloads.download(&episode).await.unwrap();
    assert!(harness.downloads.podcast("pod_1", CONNECTION).await.unwrap().is_some());

    harness.downloads.remove(&episode).await.unwrap();
    assert!(harness.downloads.podcasts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_deletes_files_and_caches() {
    let harness = harness(MockApi::new()).await;
    let book = audiobook_id("li_1");

    harness.downloads.download(&book).await.unwrap();
    drive_to_completion(&harness, &book).await;

    let cover = harness.downloads.cover(&book, ImageSize::Small).await.unwrap();
    let tracks = harness.downloads.audio_tracks(&book).await.unwrap();
    assert!(cover.exists());

    harness.downloads.remove(&book).await.unwrap();

    assert!(!cover.exists());
    assert!(tracks.iter().all(|track| !track.resource.exists()));
    assert!(harness.downloads.chapters(&book).await.unwrap().is_empty());
    assert!(harness.downloads.cover(&book, ImageSize::Small).await.is_none());
    assert_eq!(harness.downloads.status(&book).await, DownloadStatus::None);

    // Removing again is not an error
    harness.downloads.remove(&book).await.unwrap();
}

#[tokio::test]
async fn test_cover_cache_self_heals() {
    let harness = harness(MockApi::new()).await;
    let book = audiobook_id("li_1");

    harness.downloads.download(&book).await.unwrap();
    drive_to_completion(&harness, &book).await;

    let cover = harness.downloads.cover(&book, ImageSize::Large).await.unwrap();
    let cached = harness.cache.get(&keys::cover_path(&book, ImageSize::Large)).await.unwrap();
    assert_eq!(cached.as_ref(), Some(&cover));

    tokio::fs::remove_file(&cover).await.unwrap();
    assert!(harness.downloads.cover(&book, ImageSize::Large).await.is_none());
    let cached = harness.cache.get(&keys::cover_path(&book, ImageSize::Large)).await.unwrap();
    assert!(cached.is_none());
}

#[tokio::test]
async fn test_block_counting() {
    let harness = harness(MockApi::new()).await;
    let book = audiobook_id("li_1");

    harness.downloads.add_block(&book).await;
    harness.downloads.add_block(&book).await;
    assert!(matches!(harness.downloads.download(&book).await, Err(ShelfError::Blocked(_))));

    harness.downloads.remove_block(&book).await;
    assert!(matches!(harness.downloads.download(&book).await, Err(ShelfError::Blocked(_))));

    harness.downloads.remove_block(&book).await;
    harness.downloads.download(&book).await.unwrap();

    harness.downloads.add_block(&book).await;
    assert!(matches!(harness.downloads.remove(&book).await, Err(ShelfError::Blocked(_))));
    harness.downloads.remove_block(&book).await;
    harness.downloads.remove(&book).await.unwrap();

    // Unbalanced removal is ignored
    harness.downloads.remove_block(&book).await;
    harness.downloads.download(&book).await.unwrap();
}

#[tokio::test]
async fn test_status_distrusts_cached_none() {
    let harness = harness(MockApi::new()).await;
    let book = audiobook_id("li_1");
    assert_eq!(harness.downloads.status(&book).await, DownloadStatus::None);

    harness.downloads.download(&book).await.unwrap();
    harness
        .cache
        .set(&keys::cached_download_status(&book), Some(&DownloadStatus::None))
        .await
        .unwrap();

    assert_eq!(harness.downloads.status(&book).await, DownloadStatus::Downloading);
}

#[tokio::test]
async fn test_progress_events_map_to_assets() {
    let harness = harness(MockApi::new().without_covers()).await;
    let book = audiobook_id("li_1");
    let mut events = harness.downloads.subscribe();

    harness.downloads.download(&book).await.unwrap();
    eventually!(harness.transfers.running().len() == 1);
    let task_id = harness.transfers.running()[0];
    harness.transfers.progress(task_id, 512, 1024);

    let change = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(DownloadEvent::ProgressChanged(change)) = events.recv().await {
                return change;
            }
        }
    })
    .await
    .unwrap();

    let ProgressChange {
        item_id,
        progress_weight,
        total_bytes_written,
        total_bytes_expected,
        ..
    } = change;
    assert_eq!(item_id, book);
    let expected = ProgressWeights::compute(ImageSize::ALL.len(), 0, 1).audio;
    assert!((progress_weight - expected).abs() < 1e-9);
    assert_eq!(total_bytes_written, 512);
    assert_eq!(total_bytes_expected, Some(1024));
}

#[tokio::test]
async fn test_metered_network_defers_transfers() {
    let harness = harness_with(MockApi::new().without_covers(), |config| {
        config.allow_cellular_downloads = false;
    })
    .await;
    harness.platform.set_metered(true);
    let book = audiobook_id("li_1");

    harness.downloads.download(&book).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.transfers.running().is_empty());

    harness.platform.set_metered(false);
    harness.downloads.network_path_changed();
    eventually!(harness.transfers.running().len() == 1);
}

#[tokio::test]
async fn test_resume_pending_after_restart() {
    let harness = harness(MockApi::new().without_covers()).await;
    let book = audiobook_id("li_1");

    harness.downloads.download(&book).await.unwrap();
    eventually!(harness.transfers.running().len() == 1);

    harness.transfers.forget_all();
    harness.downloads.resume_pending().await.unwrap();

    eventually!(harness.transfers.running().len() == 1);
    assert_eq!(harness.transfers.resumed(), 2);
}

#[tokio::test]
async fn test_invalidated_session_clears_tasks() {
    let harness = harness(MockApi::new().without_covers()).await;
    let book = audiobook_id("li_1");
    let mut events = harness.downloads.subscribe();

    harness.downloads.download(&book).await.unwrap();
    eventually!(harness.transfers.running().len() == 1);

    harness.transfers.invalidate();
    let global = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(DownloadEvent::StatusChanged(None)) = events.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(global.is_ok());
    assert!(queries::list_assets_in_flight(harness.database.pool()).await.unwrap().is_empty());

    harness.downloads.app_did_become_active();
    eventually!(harness.transfers.running().len() == 1);
}

#[tokio::test]
async fn test_remove_all() {
    let harness = harness(MockApi::new()).await;
    let book = audiobook_id("li_1");
    let episode = episode_id("ep_1", "pod_1");

    harness.downloads.download(&book).await.unwrap();
    harness.downloads.download(&episode).await.unwrap();
    drive_to_completion(&harness, &book).await;
    assert!(harness.downloads.paths().root().exists());

    let mut events = harness.downloads.subscribe();
    harness.downloads.remove_all().await;

    assert!(harness.downloads.audiobooks().await.unwrap().is_empty());
    assert!(harness.downloads.episodes().await.unwrap().is_empty());
    assert!(harness.downloads.podcasts().await.unwrap().is_empty());
    assert!(!harness.downloads.paths().root().exists());

    let global = drain(&mut events)
        .into_iter()
        .any(|event| event == DownloadEvent::StatusChanged(None));
    assert!(global);
}

#[tokio::test]
async fn test_remove_connection_matches_structured_id() {
    let harness = harness(MockApi::new()).await;
    let home = audiobook_id("li_1");
    // Primary ID contains the other connection's name
    let other = ItemIdentifier::audiobook("home", LIBRARY, "work");

    harness.downloads.download(&home).await.unwrap();
    harness.downloads.download(&other).await.unwrap();

    harness.downloads.remove_connection(CONNECTION).await.unwrap();

    let remaining: Vec<ItemIdentifier> = harness
        .downloads
        .audiobooks()
        .await
        .unwrap()
        .into_iter()
        .map(|book| book.id)
        .collect();
    assert_eq!(remaining, vec![other.clone()]);
    assert!(!queries::list_assets(harness.database.pool(), &other).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lookup_by_parts() {
    let harness = harness(MockApi::new()).await;
    let book = audiobook_id("li_1");
    let episode = episode_id("ep_1", "pod_1");

    harness.downloads.download(&book).await.unwrap();
    harness.downloads.download(&episode).await.unwrap();

    let found = harness.downloads.playable_item("li_1", None, CONNECTION).await.unwrap();
    assert_eq!(found.map(|item| item.id().clone()), Some(book.clone()));

    let found = harness
        .downloads
        .playable_item("ep_1", Some("pod_1"), CONNECTION)
        .await
        .unwrap();
    assert_eq!(found.map(|item| item.id().clone()), Some(episode));

    assert!(harness.downloads.playable_item("li_1", None, "work").await.unwrap().is_none());
    assert_eq!(
        harness.downloads.audiobooks_in(CONNECTION, LIBRARY).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_image_assets_for_every_size() {
    let harness = harness(MockApi::new()).await;
    let book = audiobook_id("li_1");
    harness.downloads.download(&book).await.unwrap();

    let mut sizes: Vec<ImageSize> = queries::list_assets(harness.database.pool(), &book)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|asset| match asset.file_type {
            AssetFileType::Image { size } => Some(size),
            _ => None,
        })
        .collect();
    sizes.sort_by_key(|size| size.width());
    assert_eq!(sizes, ImageSize::ALL.to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_episodes_share_new_podcast() {
    let gate = Arc::new(Notify::new());
    let harness = harness(MockApi::new().with_gate(gate.clone())).await;
    let podcast = podcast_id("pod_1");
    let first = episode_id("ep_1", "pod_1");
    let second = episode_id("ep_2", "pod_1");

    let spawn_download = |item: ItemIdentifier| {
        let downloads = harness.downloads.clone();
        tokio::spawn(async move { downloads.download(&item).await })
    };
    let first_task = spawn_download(first.clone());
    let second_task = spawn_download(second.clone());

    // Release both graph fetches together so both see the podcast as missing
    eventually!(harness.api.graph_requests.load(Ordering::SeqCst) == 2);
    while !(first_task.is_finished() && second_task.is_finished()) {
        gate.notify_waiters();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    first_task.await.unwrap().unwrap();
    second_task.await.unwrap().unwrap();

    assert_eq!(harness.downloads.podcasts().await.unwrap().len(), 1);
    assert_eq!(harness.downloads.episodes_of(&podcast).await.unwrap().len(), 2);
    assert_eq!(
        queries::list_assets(harness.database.pool(), &podcast).await.unwrap().len(),
        ImageSize::ALL.len()
    );
}

#[tokio::test]
async fn test_failed_item_is_removed_once_unblocked() {
    let gate = Arc::new(Notify::new());
    let harness = harness(MockApi::new().without_covers().with_gate(gate.clone())).await;
    let book = audiobook_id("li_1");
    harness.transfers.fail_on_resume(true);

    let downloads = harness.downloads.clone();
    let enqueue = {
        let book = book.clone();
        tokio::spawn(async move { downloads.download(&book).await })
    };
    eventually!(harness.api.graph_requests.load(Ordering::SeqCst) == 1);
    harness.downloads.add_block(&book).await;
    gate.notify_one();
    enqueue.await.unwrap().unwrap();

    // Past the attempt limit the removal is refused, but the asset keeps retrying
    eventually!(harness.transfers.resumed() > 6);
    assert!(harness.downloads.item(&book).await.unwrap().is_some());

    harness.downloads.remove_block(&book).await;
    eventually!(harness.downloads.item(&book).await.unwrap().is_none());
    assert!(queries::list_assets(harness.database.pool(), &book).await.unwrap().is_empty());
    assert_eq!(harness.downloads.status(&book).await, DownloadStatus::None);
}
