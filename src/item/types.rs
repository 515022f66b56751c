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


//! Library item types shared by the API client and the download subsystem

use super::identifier::{ItemIdentifier, ItemType};
use crate::error::{Result, ShelfError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Download state of a playable item, derived from its assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    None,
    Downloading,
    Completed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::None => "none",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cover variants kept offline; one image asset exists per size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSize {
    Tiny,
    Small,
    Regular,
    Large,
}

impl ImageSize {
    pub const ALL: [ImageSize; 4] = [
        ImageSize::Tiny,
        ImageSize::Small,
        ImageSize::Regular,
        ImageSize::Large,
    ];

    /// Requested pixel width
    pub fn width(&self) -> u32 {
        match self {
            ImageSize::Tiny => 100,
            ImageSize::Small => 200,
            ImageSize::Regular => 400,
            ImageSize::Large => 800,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::Tiny => "tiny",
            ImageSize::Small => "small",
            ImageSize::Regular => "regular",
            ImageSize::Large => "large",
        }
    }
}

impl FromStr for ImageSize {
    type Err = ShelfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tiny" => Ok(ImageSize::Tiny),
            "small" => Ok(ImageSize::Small),
            "regular" => Ok(ImageSize::Regular),
            "large" => Ok(ImageSize::Large),
            other => Err(ShelfError::invalid_input(format!(
                "unknown image size '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesFragment {
    pub name: String,
    pub sequence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audiobook {
    pub id: ItemIdentifier,
    pub name: String,
    pub authors: Vec<String>,
    pub description: Option<String>,
    pub genres: Vec<String>,
    pub added_at: DateTime<Utc>,
    pub released: Option<String>,
    pub size: Option<i64>,
    pub duration: f64,
    pub subtitle: Option<String>,
    pub narrators: Vec<String>,
    pub series: Vec<SeriesFragment>,
    pub explicit: bool,
    pub abridged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: ItemIdentifier,
    pub name: String,
    pub authors: Vec<String>,
    pub description: Option<String>,
    pub added_at: DateTime<Utc>,
    pub released: Option<String>,
    pub size: Option<i64>,
    pub duration: f64,
    pub podcast_name: String,
    pub episode_type: Option<String>,
    pub season: Option<String>,
    pub episode_number: Option<String>,
}

impl Episode {
    /// The podcast that groups this episode
    pub fn podcast_id(&self) -> Result<ItemIdentifier> {
        self.id.podcast_id().ok_or_else(|| {
            ShelfError::InvalidIdentifier(format!("episode {} has no podcast", self.id))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Podcast {
    pub id: ItemIdentifier,
    pub name: String,
    pub authors: Vec<String>,
    pub description: Option<String>,
    pub genres: Vec<String>,
    pub added_at: DateTime<Utc>,
    pub released: Option<String>,
    pub explicit: bool,
    pub publishing_type: Option<String>,
    pub episode_count: Option<i64>,
}

/// Anything with audio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlayableItem {
    Audiobook(Audiobook),
    Episode(Episode),
}

impl PlayableItem {
    pub fn id(&self) -> &ItemIdentifier {
        match self {
            PlayableItem::Audiobook(a) => &a.id,
            PlayableItem::Episode(e) => &e.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PlayableItem::Audiobook(a) => &a.name,
            PlayableItem::Episode(e) => &e.name,
        }
    }
}

/// Any item the store can materialize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Item {
    Audiobook(Audiobook),
    Episode(Episode),
    Podcast(Podcast),
}

impl Item {
    pub fn id(&self) -> &ItemIdentifier {
        match self {
            Item::Audiobook(a) => &a.id,
            Item::Episode(e) => &e.id,
            Item::Podcast(p) => &p.id,
        }
    }

    pub fn item_type(&self) -> ItemType {
        self.id().item_type
    }

    pub fn name(&self) -> &str {
        match self {
            Item::Audiobook(a) => &a.name,
            Item::Episode(e) => &e.name,
            Item::Podcast(p) => &p.name,
        }
    }
}

impl From<PlayableItem> for Item {
    fn from(item: PlayableItem) -> Self {
        match item {
            PlayableItem::Audiobook(a) => Item::Audiobook(a),
            PlayableItem::Episode(e) => Item::Episode(e),
        }
    }
}

/// One remote audio file of a playable item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFile {
    /// Server-side inode, used to address the file
    pub ino: String,
    /// Extension without the leading dot
    pub file_extension: String,
    /// Start of this file within the item's timeline, in seconds
    pub offset: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub start_offset: f64,
    pub end_offset: f64,
    pub title: String,
}

/// Supplementary document (usually a PDF booklet)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplementaryPdf {
    pub ino: String,
    pub file_name: String,
    pub file_extension: String,
}

/// Downloaded audio segment ready for playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub offset: f64,
    pub duration: f64,
    pub resource: PathBuf,
}

/// Everything needed to materialize a playable item offline
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableItemGraph {
    pub item: PlayableItem,
    pub audio_files: Vec<AudioFile>,
    pub chapters: Vec<Chapter>,
    pub supplementary_pdfs: Vec<SupplementaryPdf>,
}
