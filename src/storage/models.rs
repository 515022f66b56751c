//! Database models for ShelfSync
//!
//! Items (audiobooks, episodes, podcasts) and chapters are stored as the library
//! types from `crate::item`; this module holds the rows that only exist in the
//! database: the asset ledger and the search index.
//!
//! # SQLite Adaptations
//! - Arrays stored as JSON strings (SQLite has no native array type)
//! - Enums stored as lowercase TEXT
//! - DateTime stored as TEXT in RFC 3339 format
//! - UUIDs stored as hyphenated TEXT

use crate::error::{Result, ShelfError};
use crate::item::{AudioFile, ImageSize, ItemIdentifier, SupplementaryPdf};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ASSET LEDGER
// ============================================================================

/// What an asset row holds on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AssetFileType {
    /// One audio segment of the item's timeline
    Audio {
        offset: f64,
        duration: f64,
        ino: String,
        file_extension: String,
    },
    /// One cover size variant
    Image { size: ImageSize },
    /// Supplementary document
    Pdf { name: String, ino: String },
}

impl AssetFileType {
    pub fn kind(&self) -> &'static str {
        match self {
            AssetFileType::Audio { .. } => "audio",
            AssetFileType::Image { .. } => "image",
            AssetFileType::Pdf { .. } => "pdf",
        }
    }

    /// Extension of the file on disk
    pub fn file_extension(&self) -> &str {
        match self {
            AssetFileType::Audio { file_extension, .. } => file_extension,
            AssetFileType::Image { .. } => "png",
            AssetFileType::Pdf { .. } => "pdf",
        }
    }
}

/// One physical file belonging to a persisted item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedAsset {
    pub id: Uuid,
    pub item_id: ItemIdentifier,
    pub file_type: AssetFileType,
    pub is_downloaded: bool,
    /// Transfer task currently moving this file, if any
    pub download_task_id: Option<i64>,
    pub progress_weight: f64,
}

impl PersistedAsset {
    fn new(item_id: &ItemIdentifier, file_type: AssetFileType, progress_weight: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id: item_id.clone(),
            file_type,
            is_downloaded: false,
            download_task_id: None,
            progress_weight,
        }
    }

    pub fn audio(item_id: &ItemIdentifier, file: &AudioFile, progress_weight: f64) -> Self {
        Self::new(
            item_id,
            AssetFileType::Audio {
                offset: file.offset,
                duration: file.duration,
                ino: file.ino.clone(),
                file_extension: file.file_extension.clone(),
            },
            progress_weight,
        )
    }

    pub fn image(item_id: &ItemIdentifier, size: ImageSize, progress_weight: f64) -> Self {
        Self::new(item_id, AssetFileType::Image { size }, progress_weight)
    }

    pub fn pdf(item_id: &ItemIdentifier, pdf: &SupplementaryPdf, progress_weight: f64) -> Self {
        Self::new(
            item_id,
            AssetFileType::Pdf {
                name: pdf.file_name.clone(),
                ino: pdf.ino.clone(),
            },
            progress_weight,
        )
    }

    /// File name inside the connection's download directory
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id, self.file_type.file_extension())
    }

    /// Decode the flattened file type columns of an asset row
    pub fn decode_file_type(
        kind: &str,
        offset: Option<f64>,
        duration: Option<f64>,
        ino: Option<String>,
        file_extension: Option<String>,
        image_size: Option<String>,
        pdf_name: Option<String>,
    ) -> Result<AssetFileType> {
        match kind {
            "audio" => Ok(AssetFileType::Audio {
                offset: offset.unwrap_or(0.0),
                duration: duration.unwrap_or(0.0),
                ino: ino.ok_or_else(|| ShelfError::corrupt("PersistedAssets", "audio without ino"))?,
                file_extension: file_extension.unwrap_or_else(|| "mp3".to_string()),
            }),
            "image" => {
                let size = image_size
                    .ok_or_else(|| ShelfError::corrupt("PersistedAssets", "image without size"))?;
                Ok(AssetFileType::Image { size: size.parse()? })
            }
            "pdf" => Ok(AssetFileType::Pdf {
                name: pdf_name.unwrap_or_default(),
                ino: ino.ok_or_else(|| ShelfError::corrupt("PersistedAssets", "pdf without ino"))?,
            }),
            other => Err(ShelfError::corrupt(
                "PersistedAssets",
                format!("unknown file type '{}'", other),
            )),
        }
    }
}

// ============================================================================
// SEARCH INDEX
// ============================================================================

/// Row of the offline search index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub item_id: ItemIdentifier,
    pub primary_name: String,
    pub secondary_name: Option<String>,
    pub author_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_file_name_uses_extension() {
        let item = ItemIdentifier::audiobook("b", "l", "c");
        let file = AudioFile {
            ino: "42".to_string(),
            file_extension: "m4b".to_string(),
            offset: 0.0,
            duration: 10.0,
        };
        let asset = PersistedAsset::audio(&item, &file, 0.8);
        assert_eq!(asset.file_name(), format!("{}.m4b", asset.id));
        assert!(!asset.is_downloaded);
        assert!(asset.download_task_id.is_none());

        let cover = PersistedAsset::image(&item, ImageSize::Large, 0.025);
        assert!(cover.file_name().ends_with(".png"));
    }

    #[test]
    fn test_decode_file_type() {
        let decoded = PersistedAsset::decode_file_type(
            "image",
            None,
            None,
            None,
            None,
            Some("small".to_string()),
            None,
        )
        .unwrap();
        assert_eq!(decoded, AssetFileType::Image { size: ImageSize::Small });

        assert!(PersistedAsset::decode_file_type("video", None, None, None, None, None, None)
            .is_err());
        assert!(PersistedAsset::decode_file_type("pdf", None, None, None, None, None, None)
            .is_err());
    }
}
