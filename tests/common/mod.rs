//! Shared fixtures for the download subsystem tests
//!
//! - `MockApi` serves generated item graphs
//! - `MockTransferBackend` only moves bytes when a test tells it to
//! - `CountingPlatform` records leases and backup exclusions

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use shelf_core::api::{LibraryApi, TransferRequest};
use shelf_core::download::DownloadEvent;
use shelf_core::file::DownloadPaths;
use shelf_core::item::{
    AudioFile, Audiobook, Chapter, Episode, ImageSize, ItemIdentifier, PlayableItem, PlayableItemGraph,
    Podcast, SupplementaryPdf,
};
use shelf_core::platform::{BackgroundLease, NetworkPath, Platform};
use shelf_core::storage::{Database, KeyValueCache, SqliteKeyValueStore};
use shelf_core::transfer::{TransferBackend, TransferEvent, CANCELLED};
use shelf_core::{DownloadConfig, DownloadStatus, DownloadSubsystem, Result, ShelfError};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc, Notify};
use url::Url;

pub const CONNECTION: &str = "home";
pub const LIBRARY: &str = "lib-main";

/// Poll a condition until it holds, failing the test after five seconds
#[macro_export]
macro_rules! eventually {
    ($cond:expr) => {{
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if $cond {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {}",
                stringify!($cond)
            );
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }};
}

pub fn audiobook_id(primary: &str) -> ItemIdentifier {
    ItemIdentifier::audiobook(primary, LIBRARY, CONNECTION)
}

pub fn episode_id(primary: &str, podcast: &str) -> ItemIdentifier {
    ItemIdentifier::episode(primary, podcast, LIBRARY, CONNECTION)
}

pub fn podcast_id(primary: &str) -> ItemIdentifier {
    ItemIdentifier::podcast(primary, LIBRARY, CONNECTION)
}

pub fn sample_audiobook(id: &ItemIdentifier) -> Audiobook {
    Audiobook {
        id: id.clone(),
        name: format!("Book {}", id.primary_id),
        authors: vec!["Ursula K. Le Guin".to_string()],
        description: None,
        genres: vec!["Fantasy".to_string()],
        added_at: Utc::now(),
        released: Some("1968".to_string()),
        size: Some(4096),
        duration: 3600.0,
        subtitle: None,
        narrators: vec!["Rob Inglis".to_string()],
        series: vec![],
        explicit: false,
        abridged: false,
    }
}

fn sample_episode(id: &ItemIdentifier) -> Episode {
    Episode {
        id: id.clone(),
        name: format!("Episode {}", id.primary_id),
        authors: vec!["Host".to_string()],
        description: None,
        added_at: Utc::now(),
        released: None,
        size: Some(2048),
        duration: 1800.0,
        podcast_name: "The Show".to_string(),
        episode_type: Some("full".to_string()),
        season: None,
        episode_number: None,
    }
}

// ============================================================================
// API
// ============================================================================

pub struct MockApi {
    audio_files: usize,
    pdfs: usize,
    covers_available: bool,
    gate: Option<Arc<Notify>>,
    pub graph_requests: AtomicUsize,
    pub podcast_requests: AtomicUsize,
}

impl MockApi {
    /// One audio file, no documents, covers available
    pub fn new() -> Self {
        Self {
            audio_files: 1,
            pdfs: 0,
            covers_available: true,
            gate: None,
            graph_requests: AtomicUsize::new(0),
            podcast_requests: AtomicUsize::new(0),
        }
    }

    pub fn with_audio_files(mut self, count: usize) -> Self {
        self.audio_files = count;
        self
    }

    pub fn with_pdfs(mut self, count: usize) -> Self {
        self.pdfs = count;
        self
    }

    /// Cover requests fail, so covers complete without a transfer
    pub fn without_covers(mut self) -> Self {
        self.covers_available = false;
        self
    }

    /// Item graph requests wait until the gate is notified
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn request(item_id: &ItemIdentifier, path: &str) -> Result<TransferRequest> {
        let url = Url::parse(&format!("http://abs.invalid/{}/{}", item_id.primary_id, path))?;
        Ok(TransferRequest::new(url))
    }
}

#[async_trait]
impl LibraryApi for MockApi {
    async fn playable_item(&self, item_id: &ItemIdentifier) -> Result<PlayableItemGraph> {
        self.graph_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let item = match item_id.item_type {
            shelf_core::ItemType::Audiobook => PlayableItem::Audiobook(sample_audiobook(item_id)),
            shelf_core::ItemType::Episode => PlayableItem::Episode(sample_episode(item_id)),
            other => return Err(ShelfError::UnsupportedItemType(other.to_string())),
        };

        let audio_files = (0..self.audio_files)
            .map(|i| AudioFile {
                ino: format!("audio-{}", i),
                file_extension: "mp3".to_string(),
                offset: i as f64 * 60.0,
                duration: 60.0,
            })
            .collect();
        let supplementary_pdfs = (0..self.pdfs)
            .map(|i| SupplementaryPdf {
                ino: format!("pdf-{}", i),
                file_name: format!("Booklet {}", i),
                file_extension: "pdf".to_string(),
            })
            .collect();
        let chapters = vec![
            Chapter {
                id: 0,
                start_offset: 0.0,
                end_offset: 30.0,
                title: "Opening".to_string(),
            },
            Chapter {
                id: 1,
                start_offset: 30.0,
                end_offset: 60.0,
                title: "Closing".to_string(),
            },
        ];

        Ok(PlayableItemGraph {
            item,
            audio_files,
            chapters,
            supplementary_pdfs,
        })
    }

    async fn podcast(&self, podcast_id: &ItemIdentifier) -> Result<Podcast> {
        self.podcast_requests.fetch_add(1, Ordering::SeqCst);
        Ok(Podcast {
            id: podcast_id.clone(),
            name: "The Show".to_string(),
            authors: vec!["Host".to_string()],
            description: None,
            genres: vec![],
            added_at: Utc::now(),
            released: None,
            explicit: false,
            publishing_type: Some("episodic".to_string()),
            episode_count: Some(2),
        })
    }

    async fn cover_request(&self, item_id: &ItemIdentifier, size: ImageSize) -> Result<TransferRequest> {
        if !self.covers_available {
            return Err(ShelfError::not_found(format!("cover of {}", item_id)));
        }
        Self::request(item_id, &format!("cover-{}", size.width()))
    }

    async fn pdf_request(&self, item_id: &ItemIdentifier, ino: &str) -> Result<TransferRequest> {
        Self::request(item_id, ino)
    }

    async fn audio_track_request(&self, item_id: &ItemIdentifier, ino: &str) -> Result<TransferRequest> {
        Self::request(item_id, ino)
    }
}

// ============================================================================
// TRANSFERS
// ============================================================================

#[derive(Default)]
struct BackendState {
    prepared: BTreeSet<i64>,
    running: BTreeSet<i64>,
    resumed: usize,
    max_active: usize,
}

pub struct MockTransferBackend {
    paths: DownloadPaths,
    events: mpsc::UnboundedSender<TransferEvent>,
    state: Mutex<BackendState>,
    next_task_id: AtomicI64,
    fail_on_resume: AtomicBool,
}

impl MockTransferBackend {
    pub fn new(paths: DownloadPaths) -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let backend = Self {
            paths,
            events,
            state: Mutex::new(BackendState::default()),
            next_task_id: AtomicI64::new(1),
            fail_on_resume: AtomicBool::new(false),
        };
        (backend, receiver)
    }

    /// Every resumed task fails right away
    pub fn fail_on_resume(&self, fail: bool) {
        self.fail_on_resume.store(fail, Ordering::SeqCst);
    }

    pub fn running(&self) -> Vec<i64> {
        self.state.lock().unwrap().running.iter().copied().collect()
    }

    pub fn resumed(&self) -> usize {
        self.state.lock().unwrap().resumed
    }

    pub fn max_active(&self) -> usize {
        self.state.lock().unwrap().max_active
    }

    /// Write the payload of a running task and report it finished
    pub async fn complete(&self, task_id: i64) {
        let destination = self.paths.temporary_location(task_id);
        tokio::fs::create_dir_all(self.paths.transfer_directory())
            .await
            .unwrap();
        tokio::fs::write(&destination, format!("payload of task {}", task_id))
            .await
            .unwrap();

        {
            let mut state = self.state.lock().unwrap();
            state.running.remove(&task_id);
            state.prepared.remove(&task_id);
        }
        self.events.send(TransferEvent::Finished { task_id }).unwrap();
    }

    pub async fn complete_all(&self) {
        for task_id in self.running() {
            self.complete(task_id).await;
        }
    }

    pub fn progress(&self, task_id: i64, written: u64, expected: u64) {
        self.events
            .send(TransferEvent::Progress {
                task_id,
                bytes_written: written,
                total_bytes_written: written,
                total_bytes_expected: Some(expected),
            })
            .unwrap();
    }

    /// Lose every task without callbacks, like a process restart
    pub fn forget_all(&self) {
        let mut state = self.state.lock().unwrap();
        state.prepared.clear();
        state.running.clear();
    }

    /// Drop every task and report the session gone
    pub fn invalidate(&self) {
        self.forget_all();
        self.events.send(TransferEvent::Invalidated).unwrap();
    }
}

#[async_trait]
impl TransferBackend for MockTransferBackend {
    async fn prepare(&self, _request: TransferRequest) -> Result<i64> {
        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().prepared.insert(task_id);
        Ok(task_id)
    }

    async fn resume(&self, task_id: i64) -> Result<()> {
        let failed = {
            let mut state = self.state.lock().unwrap();
            if !state.prepared.remove(&task_id) {
                return Err(ShelfError::UnknownTask(task_id));
            }
            state.resumed += 1;

            if self.fail_on_resume.load(Ordering::SeqCst) {
                true
            } else {
                state.running.insert(task_id);
                let active = state.running.len() + state.prepared.len();
                state.max_active = state.max_active.max(active);
                false
            }
        };

        if failed {
            self.events
                .send(TransferEvent::Failed {
                    task_id,
                    error: "connection reset".to_string(),
                })
                .unwrap();
        }
        Ok(())
    }

    async fn cancel(&self, task_id: i64) {
        let known = {
            let mut state = self.state.lock().unwrap();
            state.prepared.remove(&task_id) | state.running.remove(&task_id)
        };
        if known {
            let _ = self.events.send(TransferEvent::Failed {
                task_id,
                error: CANCELLED.to_string(),
            });
        }
    }

    async fn active_tasks(&self) -> Vec<i64> {
        let state = self.state.lock().unwrap();
        state.prepared.union(&state.running).copied().collect()
    }
}

// ============================================================================
// PLATFORM
// ============================================================================

#[derive(Default)]
pub struct CountingPlatform {
    metered: AtomicBool,
    pub leases_begun: AtomicUsize,
    pub leases_released: Arc<AtomicUsize>,
    pub excluded: AtomicUsize,
}

impl CountingPlatform {
    pub fn set_metered(&self, metered: bool) {
        self.metered.store(metered, Ordering::SeqCst);
    }
}

impl Platform for CountingPlatform {
    fn network_path(&self) -> NetworkPath {
        NetworkPath {
            is_expensive: self.metered.load(Ordering::SeqCst),
            is_constrained: false,
        }
    }

    fn begin_background_lease(&self, name: &str) -> BackgroundLease {
        self.leases_begun.fetch_add(1, Ordering::SeqCst);
        let released = Arc::clone(&self.leases_released);
        BackgroundLease::new(name, move || {
            released.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn exclude_from_backup(&self, path: &Path) -> Result<()> {
        assert!(path.exists(), "excluded file must exist");
        self.excluded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// HARNESS
// ============================================================================

pub struct Harness {
    pub downloads: Arc<DownloadSubsystem>,
    pub api: Arc<MockApi>,
    pub transfers: Arc<MockTransferBackend>,
    pub platform: Arc<CountingPlatform>,
    pub database: Database,
    pub cache: KeyValueCache,
    pub dir: TempDir,
}

pub async fn harness(api: MockApi) -> Harness {
    harness_with(api, |_| {}).await
}

pub async fn harness_with(api: MockApi, configure: impl FnOnce(&mut DownloadConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DownloadConfig::with_root(dir.path());
    configure(&mut config);

    let database = Database::new_in_memory().await.unwrap();
    let cache = KeyValueCache::new(Arc::new(SqliteKeyValueStore::new(database.pool().clone())));
    let api = Arc::new(api);
    let platform = Arc::new(CountingPlatform::default());
    let (transfers, transfer_events) = MockTransferBackend::new(DownloadPaths::from_config(&config));
    let transfers = Arc::new(transfers);

    let downloads = DownloadSubsystem::new(
        config,
        database.clone(),
        cache.clone(),
        api.clone(),
        transfers.clone(),
        transfer_events,
        platform.clone(),
    )
    .unwrap();

    Harness {
        downloads,
        api,
        transfers,
        platform,
        database,
        cache,
        dir,
    }
}

/// Wait for the next status change of `item_id`
pub async fn next_status(
    events: &mut broadcast::Receiver<DownloadEvent>,
    item_id: &ItemIdentifier,
) -> DownloadStatus {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let DownloadEvent::StatusChanged(Some(change)) = events.recv().await.unwrap() {
                if &change.item_id == item_id {
                    return change.status;
                }
            }
        }
    })
    .await
    .expect("no status change in time")
}

/// Events already queued for a receiver
pub fn drain(events: &mut broadcast::Receiver<DownloadEvent>) -> Vec<DownloadEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Complete transfers until every asset of the item is on disk
pub async fn drive_to_completion(harness: &Harness, item_id: &ItemIdentifier) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while harness.downloads.download_progress(item_id).await < 1.0 - 1e-9 {
        assert!(tokio::time::Instant::now() < deadline, "{} never completed", item_id);
        harness.transfers.complete_all().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
