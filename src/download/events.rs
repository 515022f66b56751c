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

//! Download notifications
//!
//! Delivery is best effort: subscribers that lag or were not listening at
//! emission time miss events and have to poll.

use crate::item::{DownloadStatus, ItemIdentifier};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub item_id: ItemIdentifier,
    pub status: DownloadStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressChange {
    pub item_id: ItemIdentifier,
    pub asset_id: Uuid,
    pub progress_weight: f64,
    pub bytes_written: u64,
    pub total_bytes_written: u64,
    pub total_bytes_expected: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// `None` asks subscribers to re-check every item
    StatusChanged(Option<StatusChange>),
    ProgressChanged(ProgressChange),
}

/// Fan-out of [`DownloadEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DownloadEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: DownloadEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn status_changed(&self, item_id: &ItemIdentifier, status: DownloadStatus) {
        self.publish(DownloadEvent::StatusChanged(Some(StatusChange {
            item_id: item_id.clone(),
            status,
        })));
    }

    pub fn invalidate_all(&self) {
        self.publish(DownloadEvent::StatusChanged(None));
    }
}
