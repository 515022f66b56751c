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

//! Background file transfers
//!
//! The download subsystem hands resolved [`TransferRequest`]s to a
//! [`TransferBackend`] and learns about their outcome through a channel of
//! [`TransferEvent`]s. Tasks are created suspended and only start moving bytes
//! once resumed, so the caller can record the task ID before any callback can
//! arrive.
//!
//! A finished task leaves its payload at
//! [`DownloadPaths::temporary_location`](crate::file::DownloadPaths::temporary_location);
//! the receiver owns the file from then on.

pub mod session;

use crate::api::TransferRequest;
use crate::error::Result;
use async_trait::async_trait;

pub use session::HttpTransferSession;

/// Error reported for tasks stopped through [`TransferBackend::cancel`]
pub const CANCELLED: &str = "cancelled";

/// Callback from the transfer backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Progress {
        task_id: i64,
        bytes_written: u64,
        total_bytes_written: u64,
        total_bytes_expected: Option<u64>,
    },
    Finished {
        task_id: i64,
    },
    Failed {
        task_id: i64,
        error: String,
    },
    /// The whole session is gone; every outstanding task is lost
    Invalidated,
}

impl TransferEvent {
    pub fn task_id(&self) -> Option<i64> {
        match self {
            Self::Progress { task_id, .. }
            | Self::Finished { task_id }
            | Self::Failed { task_id, .. } => Some(*task_id),
            Self::Invalidated => None,
        }
    }
}

#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// Register a suspended task and return its ID
    async fn prepare(&self, request: TransferRequest) -> Result<i64>;

    /// Start a prepared task
    async fn resume(&self, task_id: i64) -> Result<()>;

    /// Stop a task; unknown IDs are ignored
    async fn cancel(&self, task_id: i64);

    /// IDs of prepared and running tasks
    async fn active_tasks(&self) -> Vec<i64>;
}
