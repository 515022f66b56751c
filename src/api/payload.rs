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


//! Audiobookshelf response payloads
//!
//! Only the fields the download subsystem needs are modeled; everything else
//! in the expanded item response is ignored.
//!
//! # Item Response (`GET api/items/{id}?expanded=1`)
//! ```json
//! {
//!   "id": "li_8gch9ve09orgn4fdz8",
//!   "libraryId": "lib_c1u6t4p45c35rf0nzd",
//!   "mediaType": "book",
//!   "addedAt": 1650621073750,
//!   "media": {
//!     "metadata": { "title": "...", "authors": [{ "name": "..." }] },
//!     "tracks": [{ "startOffset": 0, "duration": 6004.6, "ino": "649644248522215260",
//!                  "metadata": { "ext": ".mp3" } }],
//!     "chapters": [{ "id": 0, "start": 0, "end": 6004.6, "title": "..." }]
//!   },
//!   "libraryFiles": [{ "ino": "...", "isSupplementary": true,
//!                      "metadata": { "filename": "Booklet.pdf", "ext": ".pdf" } }]
//! }
//! ```

use crate::error::{Result, ShelfError};
use crate::item::{
    AudioFile, Audiobook, Chapter, Episode, ItemIdentifier, ItemType, PlayableItem,
    PlayableItemGraph, Podcast, SeriesFragment, SupplementaryPdf,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemPayload {
    pub id: String,
    pub library_id: String,
    pub media_type: Option<String>,
    pub added_at: Option<i64>,
    pub size: Option<i64>,
    pub media: Option<MediaPayload>,
    pub library_files: Option<Vec<LibraryFilePayload>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaPayload {
    pub metadata: MetadataPayload,
    pub tracks: Option<Vec<AudioTrackPayload>>,
    pub chapters: Option<Vec<ChapterPayload>>,
    pub episodes: Option<Vec<EpisodePayload>>,
    pub duration: Option<f64>,
    pub size: Option<i64>,
    pub num_episodes: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataPayload {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub authors: Option<Vec<NamedPayload>>,
    /// Podcasts carry a single author string
    pub author: Option<String>,
    pub narrators: Option<Vec<String>>,
    pub series: Option<Vec<SeriesPayload>>,
    pub genres: Option<Vec<String>>,
    pub description: Option<String>,
    pub published_year: Option<String>,
    pub release_date: Option<String>,
    pub explicit: Option<bool>,
    pub abridged: Option<bool>,
    #[serde(rename = "type")]
    pub podcast_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NamedPayload {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesPayload {
    pub name: String,
    pub sequence: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioTrackPayload {
    pub index: Option<i64>,
    pub start_offset: f64,
    pub duration: f64,
    pub ino: Option<String>,
    pub metadata: Option<FileMetadataPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMetadataPayload {
    pub filename: Option<String>,
    pub ext: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChapterPayload {
    pub id: i64,
    pub start: f64,
    pub end: f64,
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EpisodePayload {
    pub id: String,
    pub season: Option<String>,
    pub episode: Option<String>,
    pub episode_type: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub pub_date: Option<String>,
    pub published_at: Option<i64>,
    pub added_at: Option<i64>,
    pub size: Option<i64>,
    pub duration: Option<f64>,
    pub audio_track: Option<AudioTrackPayload>,
    pub chapters: Option<Vec<ChapterPayload>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibraryFilePayload {
    pub ino: String,
    pub metadata: FileMetadataPayload,
    pub is_supplementary: Option<bool>,
    pub file_type: Option<String>,
}

fn timestamp(ms: Option<i64>) -> DateTime<Utc> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

fn strip_dot(ext: &str) -> String {
    ext.strip_prefix('.').unwrap_or(ext).to_string()
}

impl From<&ChapterPayload> for Chapter {
    fn from(payload: &ChapterPayload) -> Self {
        Chapter {
            id: payload.id,
            start_offset: payload.start,
            end_offset: payload.end,
            title: payload.title.clone(),
        }
    }
}

impl AudioTrackPayload {
    /// Tracks without an inode cannot be addressed and are skipped
    pub fn to_audio_file(&self) -> Option<AudioFile> {
        let ino = self.ino.clone()?;
        let ext = self
            .metadata
            .as_ref()
            .and_then(|m| m.ext.as_deref())
            .unwrap_or("mp3");

        Some(AudioFile {
            ino,
            file_extension: strip_dot(ext),
            offset: self.start_offset,
            duration: self.duration,
        })
    }
}

impl ItemPayload {
    fn metadata(&self) -> MetadataPayload {
        self.media
            .as_ref()
            .map(|m| m.metadata.clone())
            .unwrap_or_default()
    }

    /// Supplementary PDFs; files without the flag count as supplementary
    pub fn supplementary_pdfs(&self) -> Vec<SupplementaryPdf> {
        self.library_files
            .iter()
            .flatten()
            .filter(|file| {
                file.metadata.ext.as_deref() == Some(".pdf")
                    && file.is_supplementary.unwrap_or(true)
            })
            .map(|file| SupplementaryPdf {
                ino: file.ino.clone(),
                file_name: file.metadata.filename.clone().unwrap_or_else(|| "document.pdf".to_string()),
                file_extension: "pdf".to_string(),
            })
            .collect()
    }

    /// Build the download graph for `item_id` out of an expanded item response
    ///
    /// Episodes are looked up in the podcast's episode list by primary ID.
    pub fn into_graph(self, item_id: &ItemIdentifier) -> Result<PlayableItemGraph> {
        let supplementary_pdfs = self.supplementary_pdfs();
        let metadata = self.metadata();

        match item_id.item_type {
            ItemType::Episode => {
                let episode = self
                    .media
                    .as_ref()
                    .and_then(|m| m.episodes.as_ref())
                    .and_then(|episodes| episodes.iter().find(|e| e.id == item_id.primary_id))
                    .ok_or_else(|| ShelfError::not_found(format!("episode {}", item_id)))?;

                let track = episode
                    .audio_track
                    .as_ref()
                    .ok_or_else(|| ShelfError::not_found(format!("audio track of {}", item_id)))?;
                let chapters = episode
                    .chapters
                    .as_ref()
                    .ok_or_else(|| ShelfError::not_found(format!("chapters of {}", item_id)))?;

                let item = Episode {
                    id: item_id.clone(),
                    name: episode.title.clone().unwrap_or_default(),
                    authors: metadata.author.clone().into_iter().collect(),
                    description: episode.description.clone(),
                    added_at: timestamp(episode.added_at.or(self.added_at)),
                    released: episode
                        .published_at
                        .map(|ms| timestamp(Some(ms)).to_rfc3339())
                        .or_else(|| episode.pub_date.clone()),
                    size: episode.size,
                    duration: episode.duration.unwrap_or(track.duration),
                    podcast_name: metadata.title.clone().unwrap_or_default(),
                    episode_type: episode.episode_type.clone(),
                    season: episode.season.clone().filter(|s| !s.is_empty()),
                    episode_number: episode.episode.clone().filter(|s| !s.is_empty()),
                };

                Ok(PlayableItemGraph {
                    item: PlayableItem::Episode(item),
                    audio_files: track.to_audio_file().into_iter().collect(),
                    chapters: chapters.iter().map(Chapter::from).collect(),
                    supplementary_pdfs,
                })
            }
            ItemType::Audiobook => {
                let media = self
                    .media
                    .as_ref()
                    .ok_or_else(|| ShelfError::not_found(format!("media of {}", item_id)))?;
                let tracks = media
                    .tracks
                    .as_ref()
                    .ok_or_else(|| ShelfError::not_found(format!("tracks of {}", item_id)))?;
                let chapters = media
                    .chapters
                    .as_ref()
                    .ok_or_else(|| ShelfError::not_found(format!("chapters of {}", item_id)))?;

                let item = Audiobook {
                    id: item_id.clone(),
                    name: metadata.title.clone().unwrap_or_default(),
                    authors: metadata
                        .authors
                        .iter()
                        .flatten()
                        .map(|a| a.name.clone())
                        .collect(),
                    description: metadata.description.clone(),
                    genres: metadata.genres.clone().unwrap_or_default(),
                    added_at: timestamp(self.added_at),
                    released: metadata.published_year.clone(),
                    size: media.size.or(self.size),
                    duration: media
                        .duration
                        .unwrap_or_else(|| tracks.iter().map(|t| t.duration).sum()),
                    subtitle: metadata.subtitle.clone(),
                    narrators: metadata.narrators.clone().unwrap_or_default(),
                    series: metadata
                        .series
                        .iter()
                        .flatten()
                        .map(|s| SeriesFragment {
                            name: s.name.clone(),
                            sequence: s.sequence.clone(),
                        })
                        .collect(),
                    explicit: metadata.explicit.unwrap_or(false),
                    abridged: metadata.abridged.unwrap_or(false),
                };

                Ok(PlayableItemGraph {
                    item: PlayableItem::Audiobook(item),
                    audio_files: tracks.iter().filter_map(|t| t.to_audio_file()).collect(),
                    chapters: chapters.iter().map(Chapter::from).collect(),
                    supplementary_pdfs,
                })
            }
            other => Err(ShelfError::UnsupportedItemType(other.to_string())),
        }
    }

    /// Podcast metadata for `podcast_id`
    pub fn into_podcast(self, podcast_id: &ItemIdentifier) -> Result<Podcast> {
        if self.media_type.as_deref().is_some_and(|t| t != "podcast") {
            return Err(ShelfError::InvalidApiResponse {
                message: format!("{} is not a podcast", podcast_id),
                response_body: None,
            });
        }

        let metadata = self.metadata();
        let episode_count = self.media.as_ref().and_then(|m| {
            m.num_episodes
                .or_else(|| m.episodes.as_ref().map(|e| e.len() as i64))
        });

        Ok(Podcast {
            id: podcast_id.clone(),
            name: metadata.title.unwrap_or_default(),
            authors: metadata.author.into_iter().collect(),
            description: metadata.description,
            genres: metadata.genres.unwrap_or_default(),
            added_at: timestamp(self.added_at),
            released: metadata.release_date,
            explicit: metadata.explicit.unwrap_or(false),
            publishing_type: metadata.podcast_type,
            episode_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUDIOBOOK: &str = r#"{
        "id": "li_1",
        "libraryId": "lib_1",
        "mediaType": "book",
        "addedAt": 1650621073750,
        "media": {
            "metadata": {
                "title": "A Wizard of Earthsea",
                "authors": [{"id": "aut_1", "name": "Ursula K. Le Guin"}],
                "narrators": ["Kobna Holdbrook-Smith"],
                "series": [{"id": "ser_1", "name": "Earthsea", "sequence": "1"}],
                "genres": ["Fantasy"],
                "publishedYear": "1968",
                "explicit": false
            },
            "tracks": [
                {"index": 1, "startOffset": 0, "duration": 100.5, "ino": "11", "metadata": {"filename": "01.mp3", "ext": ".mp3"}},
                {"index": 2, "startOffset": 100.5, "duration": 50, "ino": "12", "metadata": {"filename": "02.m4b", "ext": ".m4b"}},
                {"index": 3, "startOffset": 150.5, "duration": 10}
            ],
            "chapters": [{"id": 0, "start": 0, "end": 150.5, "title": "Chapter 1"}]
        },
        "libraryFiles": [
            {"ino": "21", "isSupplementary": true, "metadata": {"filename": "Map.pdf", "ext": ".pdf"}},
            {"ino": "22", "metadata": {"filename": "Notes.pdf", "ext": ".pdf"}},
            {"ino": "23", "isSupplementary": false, "metadata": {"filename": "Main.pdf", "ext": ".pdf"}},
            {"ino": "24", "metadata": {"filename": "cover.jpg", "ext": ".jpg"}}
        ]
    }"#;

    const PODCAST: &str = r#"{
        "id": "li_pod",
        "libraryId": "lib_2",
        "mediaType": "podcast",
        "addedAt": 1650621073750,
        "media": {
            "metadata": {"title": "Radiolab", "author": "WNYC", "type": "episodic"},
            "episodes": [
                {"id": "ep_1", "title": "Episode One", "season": "", "episode": "1",
                 "publishedAt": 1650621073750, "duration": 1800,
                 "audioTrack": {"startOffset": 0, "duration": 1800, "ino": "31", "metadata": {"ext": ".mp3"}},
                 "chapters": []},
                {"id": "ep_2", "title": "No Audio"}
            ]
        }
    }"#;

    #[test]
    fn test_audiobook_graph() {
        let payload: ItemPayload = serde_json::from_str(AUDIOBOOK).unwrap();
        let id = ItemIdentifier::audiobook("li_1", "lib_1", "home");
        let graph = payload.into_graph(&id).unwrap();

        // Track without ino is skipped, leading dots stripped
        assert_eq!(graph.audio_files.len(), 2);
        assert_eq!(graph.audio_files[1].file_extension, "m4b");
        assert_eq!(graph.chapters.len(), 1);

        let pdfs: Vec<&str> = graph.supplementary_pdfs.iter().map(|p| p.ino.as_str()).collect();
        assert_eq!(pdfs, vec!["21", "22"]);

        match graph.item {
            PlayableItem::Audiobook(book) => {
                assert_eq!(book.authors, vec!["Ursula K. Le Guin"]);
                assert_eq!(book.series[0].sequence.as_deref(), Some("1"));
                assert!((book.duration - 160.5).abs() < 1e-9);
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_episode_graph() {
        let payload: ItemPayload = serde_json::from_str(PODCAST).unwrap();
        let id = ItemIdentifier::episode("ep_1", "li_pod", "lib_2", "home");
        let graph = payload.into_graph(&id).unwrap();

        assert_eq!(graph.audio_files.len(), 1);
        match graph.item {
            PlayableItem::Episode(episode) => {
                assert_eq!(episode.podcast_name, "Radiolab");
                assert_eq!(episode.season, None);
                assert_eq!(episode.episode_number.as_deref(), Some("1"));
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_episode_without_audio_is_not_found() {
        let payload: ItemPayload = serde_json::from_str(PODCAST).unwrap();
        let id = ItemIdentifier::episode("ep_2", "li_pod", "lib_2", "home");
        assert!(matches!(payload.into_graph(&id), Err(ShelfError::NotFound(_))));
    }

    #[test]
    fn test_podcast() {
        let payload: ItemPayload = serde_json::from_str(PODCAST).unwrap();
        let id = ItemIdentifier::podcast("li_pod", "lib_2", "home");
        let podcast = payload.into_podcast(&id).unwrap();
        assert_eq!(podcast.name, "Radiolab");
        assert_eq!(podcast.authors, vec!["WNYC"]);
        assert_eq!(podcast.publishing_type.as_deref(), Some("episodic"));
        assert_eq!(podcast.episode_count, Some(2));
    }

    #[test]
    fn test_audiobook_payload_is_not_a_podcast() {
        let payload: ItemPayload = serde_json::from_str(AUDIOBOOK).unwrap();
        let id = ItemIdentifier::podcast("li_1", "lib_1", "home");
        assert!(payload.into_podcast(&id).is_err());
    }
}
