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

//! reqwest-backed transfer session
//!
//! Each task streams its response body into `<transfers>/<task id>.tmp`.
//! Progress is reported at most every 200ms. A 401 answer is retried once
//! with a refreshed token from the request's credential provider.

use super::{TransferBackend, TransferEvent, CANCELLED};
use crate::api::TransferRequest;
use crate::error::{Result, ShelfError};
use crate::file::{DownloadPaths, FileManager};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Response, StatusCode};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

struct TaskEntry {
    /// Present until the task is resumed
    request: Option<TransferRequest>,
    cancel: CancellationToken,
}

pub struct HttpTransferSession {
    client: OnceCell<Client>,
    /// Connect timeout, and the longest wait for the next piece of a response
    timeout: Duration,
    paths: DownloadPaths,
    next_task_id: AtomicI64,
    tasks: Arc<Mutex<HashMap<i64, TaskEntry>>>,
    events: mpsc::UnboundedSender<TransferEvent>,
}

impl HttpTransferSession {
    /// Create a session and the receiving end of its event channel
    pub fn new(
        paths: DownloadPaths,
        timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();

        // Task IDs must not collide with IDs recorded before a restart
        let seed = chrono::Utc::now().timestamp_millis();

        let session = Self {
            client: OnceCell::new(),
            timeout,
            paths,
            next_task_id: AtomicI64::new(seed),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            events,
        };
        (session, receiver)
    }

    async fn client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| async {
                Client::builder()
                    .connect_timeout(self.timeout)
                    .user_agent(concat!("ShelfSync/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .map_err(ShelfError::from)
            })
            .await
    }

    /// Cancel everything and tell the receiver the session is gone
    pub async fn invalidate(&self) {
        let drained: Vec<(i64, TaskEntry)> = self.tasks.lock().await.drain().collect();
        for (task_id, entry) in drained {
            entry.cancel.cancel();
            tracing::debug!(task = task_id, "Transfer dropped with session");
        }
        let _ = self.events.send(TransferEvent::Invalidated);
    }
}

#[async_trait]
impl TransferBackend for HttpTransferSession {
    async fn prepare(&self, request: TransferRequest) -> Result<i64> {
        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(task = task_id, ?request, "Transfer prepared");

        self.tasks.lock().await.insert(
            task_id,
            TaskEntry {
                request: Some(request),
                cancel: CancellationToken::new(),
            },
        );
        Ok(task_id)
    }

    async fn resume(&self, task_id: i64) -> Result<()> {
        {
            let tasks = self.tasks.lock().await;
            match tasks.get(&task_id) {
                None => return Err(ShelfError::UnknownTask(task_id)),
                Some(entry) if entry.request.is_none() => {
                    return Err(ShelfError::InvalidState(format!(
                        "transfer {} already running",
                        task_id
                    )))
                }
                Some(_) => {}
            }
        }

        let setup = async {
            let client = self.client().await?.clone();
            FileManager::ensure_directory_exists(&self.paths.transfer_directory()).await?;
            Ok::<_, ShelfError>(client)
        }
        .await;
        let client = match setup {
            Ok(client) => client,
            Err(e) => {
                // Never started, so the caller's error is the only report
                self.tasks.lock().await.remove(&task_id);
                return Err(e);
            }
        };

        let (request, cancel) = {
            let mut tasks = self.tasks.lock().await;
            let entry = tasks.get_mut(&task_id).ok_or(ShelfError::UnknownTask(task_id))?;
            let request = entry.request.take().ok_or_else(|| {
                ShelfError::InvalidState(format!("transfer {} already running", task_id))
            })?;
            (request, entry.cancel.clone())
        };

        let destination = self.paths.temporary_location(task_id);
        let tasks = Arc::clone(&self.tasks);
        let events = self.events.clone();
        let idle_timeout = self.timeout;

        tokio::spawn(async move {
            let result = run_transfer(
                &client,
                request,
                &destination,
                task_id,
                idle_timeout,
                &cancel,
                &events,
            )
            .await;

            // Cancelled tasks were already reported by `cancel`
            if tasks.lock().await.remove(&task_id).is_none() || cancel.is_cancelled() {
                let _ = FileManager::safe_delete(&destination).await;
                return;
            }

            let event = match result {
                Ok(()) => TransferEvent::Finished { task_id },
                Err(e) => {
                    tracing::warn!(task = task_id, error = %e, "Transfer failed");
                    let _ = FileManager::safe_delete(&destination).await;
                    TransferEvent::Failed {
                        task_id,
                        error: e.to_string(),
                    }
                }
            };
            let _ = events.send(event);
        });

        Ok(())
    }

    async fn cancel(&self, task_id: i64) {
        if let Some(entry) = self.tasks.lock().await.remove(&task_id) {
            entry.cancel.cancel();
            let _ = self.events.send(TransferEvent::Failed {
                task_id,
                error: CANCELLED.to_string(),
            });
        }
    }

    async fn active_tasks(&self) -> Vec<i64> {
        self.tasks.lock().await.keys().copied().collect()
    }
}

async fn run_transfer(
    client: &Client,
    mut request: TransferRequest,
    destination: &Path,
    task_id: i64,
    idle_timeout: Duration,
    cancel: &CancellationToken,
    events: &mpsc::UnboundedSender<TransferEvent>,
) -> Result<()> {
    let mut refreshed = false;

    let response = loop {
        let response = tokio::select! {
            response = tokio::time::timeout(idle_timeout, send(client, &request)) => {
                response.map_err(|_| stalled(task_id, idle_timeout))??
            }
            _ = cancel.cancelled() => return Err(ShelfError::Cancelled),
        };

        if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
            if let Some(credentials) = request.credentials.clone() {
                refreshed = true;
                let current = bearer_token(&request);
                let token = credentials.refresh_access_token(current.as_deref()).await?;
                set_bearer_token(&mut request, token);
                continue;
            }
        }
        break response;
    };

    let status = response.status();
    if !status.is_success() {
        return Err(ShelfError::TransferFailed {
            task_id,
            reason: format!("HTTP {}", status.as_u16()),
        });
    }

    let total_bytes_expected = response.content_length();
    let mut file = fs::File::create(destination).await?;
    let mut stream = response.bytes_stream();
    let mut total_bytes_written = 0u64;
    let mut unreported = 0u64;
    let mut last_update: Option<tokio::time::Instant> = None;

    while let Some(chunk) = tokio::select! {
        chunk = tokio::time::timeout(idle_timeout, stream.next()) => {
            chunk.map_err(|_| stalled(task_id, idle_timeout))?
        }
        _ = cancel.cancelled() => return Err(ShelfError::Cancelled),
    } {
        let chunk = chunk.map_err(|e| ShelfError::network_error(format!("Stream error: {}", e), true))?;
        file.write_all(&chunk).await?;

        total_bytes_written += chunk.len() as u64;
        unreported += chunk.len() as u64;

        if last_update.map_or(true, |at| at.elapsed() >= PROGRESS_INTERVAL) {
            let _ = events.send(TransferEvent::Progress {
                task_id,
                bytes_written: unreported,
                total_bytes_written,
                total_bytes_expected,
            });
            unreported = 0;
            last_update = Some(tokio::time::Instant::now());
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

fn stalled(task_id: i64, idle_timeout: Duration) -> ShelfError {
    ShelfError::network_error(
        format!("Transfer {} received no data for {:?}", task_id, idle_timeout),
        true,
    )
}

async fn send(client: &Client, request: &TransferRequest) -> Result<Response> {
    let mut builder = client.get(request.url.clone());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.send().await.map_err(|e| {
        ShelfError::network_error(format!("Request failed: {}", e), e.is_timeout() || e.is_connect())
    })
}

fn bearer_token(request: &TransferRequest) -> Option<String> {
    request
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(AUTHORIZATION.as_str()))
        .and_then(|(_, value)| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn set_bearer_token(request: &mut TransferRequest, token: Option<String>) {
    request
        .headers
        .retain(|(name, _)| !name.eq_ignore_ascii_case(AUTHORIZATION.as_str()));
    if let Some(token) = token {
        request
            .headers
            .push((AUTHORIZATION.as_str().to_string(), format!("Bearer {}", token)));
    }
}
