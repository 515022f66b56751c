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


//! Audiobookshelf API integration
//!
//! The download subsystem talks to the server only through [`LibraryApi`]:
//! - fetch the full graph of a playable item (metadata, audio files, chapters, PDFs)
//! - fetch a podcast
//! - resolve authenticated transfer requests for covers, PDFs and audio files
//!
//! # Modules
//! - `client` - reqwest-backed client for one server connection plus a registry
//!   that dispatches by connection ID
//! - `credentials` - bearer token source with refresh on 401
//! - `payload` - server JSON shapes and their conversion into library items

pub mod client;
pub mod credentials;
pub mod payload;

use crate::error::Result;
use crate::item::{ImageSize, ItemIdentifier, PlayableItemGraph, Podcast};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use url::Url;

pub use client::{ClientRegistry, ShelfClient};
pub use credentials::{CredentialProvider, StaticCredentialProvider};

/// Fully resolved, authenticated request for one file
#[derive(Clone)]
pub struct TransferRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    /// Used to answer an authentication challenge during the transfer
    pub credentials: Option<Arc<dyn CredentialProvider>>,
}

impl TransferRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
            credentials: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

impl fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Header values carry bearer tokens
        let names: Vec<&str> = self.headers.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("TransferRequest")
            .field("url", &self.url.as_str())
            .field("headers", &names)
            .field("credentials", &self.credentials.is_some())
            .finish()
    }
}

/// Remote library operations needed to download items
#[async_trait]
pub trait LibraryApi: Send + Sync {
    /// Metadata, audio files, chapters and supplementary PDFs of an audiobook or episode
    async fn playable_item(&self, item_id: &ItemIdentifier) -> Result<PlayableItemGraph>;

    async fn podcast(&self, podcast_id: &ItemIdentifier) -> Result<Podcast>;

    async fn cover_request(&self, item_id: &ItemIdentifier, size: ImageSize) -> Result<TransferRequest>;

    async fn pdf_request(&self, item_id: &ItemIdentifier, ino: &str) -> Result<TransferRequest>;

    async fn audio_track_request(&self, item_id: &ItemIdentifier, ino: &str) -> Result<TransferRequest>;
}
