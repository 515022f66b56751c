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


//! Library items
//!
//! - `identifier` - composite item identifiers and their string encoding
//! - `types` - audiobooks, episodes, podcasts and their files

pub mod identifier;
pub mod types;

pub use identifier::{ItemIdentifier, ItemType};
pub use types::{
    AudioFile, AudioTrack, Audiobook, Chapter, DownloadStatus, Episode, ImageSize, Item,
    PlayableItem, PlayableItemGraph, Podcast, SeriesFragment, SupplementaryPdf,
};
