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


//! Composite item identifiers
//!
//! Every library object is addressed by the server connection it came from, the
//! library it lives in, its own ID and (for episodes) the ID of the podcast that
//! groups it.
//!
//! # String Encoding
//! `type::connection::library::primary::grouping`
//!
//! Each component is percent-encoded before joining, so a component can never
//! contain the `::` separator and parsing is exact. The database never matches on
//! this string by substring; it stores the components in their own columns.

use crate::error::{Result, ShelfError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const SEPARATOR: &str = "::";

/// Kind of library object an identifier points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Audiobook,
    Author,
    Episode,
    Person,
    Podcast,
    Series,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Audiobook => "audiobook",
            ItemType::Author => "author",
            ItemType::Episode => "episode",
            ItemType::Person => "person",
            ItemType::Podcast => "podcast",
            ItemType::Series => "series",
        }
    }

    /// Audiobooks and episodes are the only types with audio
    pub fn is_playable(&self) -> bool {
        matches!(self, ItemType::Audiobook | ItemType::Episode)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = ShelfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "audiobook" => Ok(ItemType::Audiobook),
            "author" => Ok(ItemType::Author),
            "episode" => Ok(ItemType::Episode),
            "person" => Ok(ItemType::Person),
            "podcast" => Ok(ItemType::Podcast),
            "series" => Ok(ItemType::Series),
            other => Err(ShelfError::InvalidIdentifier(format!(
                "unknown item type '{}'",
                other
            ))),
        }
    }
}

/// Identifier of a library object on a specific server connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemIdentifier {
    pub primary_id: String,
    /// Podcast ID for episodes, `None` otherwise
    pub grouping_id: Option<String>,
    pub library_id: String,
    pub connection_id: String,
    pub item_type: ItemType,
}

impl ItemIdentifier {
    pub fn new(
        primary_id: impl Into<String>,
        grouping_id: Option<String>,
        library_id: impl Into<String>,
        connection_id: impl Into<String>,
        item_type: ItemType,
    ) -> Self {
        Self {
            primary_id: primary_id.into(),
            grouping_id: grouping_id.filter(|g| !g.is_empty()),
            library_id: library_id.into(),
            connection_id: connection_id.into(),
            item_type,
        }
    }

    pub fn audiobook(
        primary_id: impl Into<String>,
        library_id: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Self {
        Self::new(primary_id, None, library_id, connection_id, ItemType::Audiobook)
    }

    pub fn episode(
        primary_id: impl Into<String>,
        podcast_id: impl Into<String>,
        library_id: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Self {
        Self::new(
            primary_id,
            Some(podcast_id.into()),
            library_id,
            connection_id,
            ItemType::Episode,
        )
    }

    pub fn podcast(
        primary_id: impl Into<String>,
        library_id: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Self {
        Self::new(primary_id, None, library_id, connection_id, ItemType::Podcast)
    }

    pub fn is_playable(&self) -> bool {
        self.item_type.is_playable()
    }

    /// ID the server addresses this item by in `api/items/{id}` routes
    pub fn api_item_id(&self) -> &str {
        self.grouping_id.as_deref().unwrap_or(&self.primary_id)
    }

    /// Identifier of the podcast an episode belongs to
    pub fn podcast_id(&self) -> Option<ItemIdentifier> {
        if self.item_type != ItemType::Episode {
            return None;
        }
        let podcast = self.grouping_id.as_ref()?;
        Some(ItemIdentifier::podcast(
            podcast.clone(),
            self.library_id.clone(),
            self.connection_id.clone(),
        ))
    }

    /// Stable string key, also used as the primary key of persisted rows
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ItemIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let grouping = self.grouping_id.as_deref().unwrap_or("");
        let parts = [
            self.item_type.as_str().to_string(),
            urlencoding::encode(&self.connection_id).into_owned(),
            urlencoding::encode(&self.library_id).into_owned(),
            urlencoding::encode(&self.primary_id).into_owned(),
            urlencoding::encode(grouping).into_owned(),
        ];
        f.write_str(&parts.join(SEPARATOR))
    }
}

impl FromStr for ItemIdentifier {
    type Err = ShelfError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        if parts.len() != 5 {
            return Err(ShelfError::InvalidIdentifier(format!(
                "expected 5 components, found {} in '{}'",
                parts.len(),
                s
            )));
        }

        let decode = |part: &str| -> Result<String> {
            urlencoding::decode(part)
                .map(|c| c.into_owned())
                .map_err(|e| ShelfError::InvalidIdentifier(format!("'{}': {}", s, e)))
        };

        let item_type = parts[0].parse::<ItemType>()?;
        let connection_id = decode(parts[1])?;
        let library_id = decode(parts[2])?;
        let primary_id = decode(parts[3])?;
        let grouping_id = decode(parts[4])?;

        if primary_id.is_empty() {
            return Err(ShelfError::InvalidIdentifier(format!(
                "missing primary ID in '{}'",
                s
            )));
        }

        Ok(ItemIdentifier::new(
            primary_id,
            Some(grouping_id),
            library_id,
            connection_id,
            item_type,
        ))
    }
}

impl Serialize for ItemIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ItemIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
