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

//! Offline downloads
//!
//! # Modules
//! - `subsystem` - enqueue, removal, status, scheduling and transfer callbacks
//! - `events` - status and progress notifications
//! - `progress` - per-asset progress weights

pub mod events;
pub mod progress;
pub mod subsystem;

// Re-export commonly used types
pub use events::{DownloadEvent, EventBus, ProgressChange, StatusChange};
pub use progress::ProgressWeights;
pub use subsystem::DownloadSubsystem;
