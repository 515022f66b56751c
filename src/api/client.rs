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


//! HTTP client for the Audiobookshelf API
//!
//! This module provides a reqwest wrapper for one server connection with:
//! - Bearer authentication from a [`CredentialProvider`]
//! - One token refresh on 401 responses
//! - Retry logic with exponential backoff on 5xx and transient network errors
//!
//! # Endpoints
//! - `GET api/items/{id}?expanded=1` - item graph (episodes use the podcast ID)
//! - `GET api/items/{id}/cover?width=` - cover image
//! - `GET api/authors/{id}/image?width=` - author image
//! - `GET api/items/{id}/ebook/{ino}` - supplementary document
//! - `GET api/items/{id}/file/{ino}` - audio file
//!
//! # Retry Strategy
//! - Maximum 3 attempts (1 initial + 2 retries)
//! - Exponential backoff: 1s, 2s between retries
//! - No retry on 4xx client errors

use super::credentials::CredentialProvider;
use super::payload::ItemPayload;
use super::{LibraryApi, TransferRequest};
use crate::config::{ConnectionConfig, DownloadConfig};
use crate::error::{Result, ShelfError};
use crate::item::{ImageSize, ItemIdentifier, ItemType, PlayableItemGraph, Podcast};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

/// Maximum attempts per request (1 initial + 2 retries)
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Initial retry delay in seconds (exponential backoff: 1s, 2s)
const INITIAL_RETRY_DELAY_SECS: u64 = 1;

/// Client for one Audiobookshelf server connection
pub struct ShelfClient {
    connection_id: String,
    base_url: Url,
    client: Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl ShelfClient {
    /// # Errors
    /// Returns error if the base URL cannot be parsed or the HTTP client cannot be built
    pub fn new(
        connection_id: impl Into<String>,
        base_url: &str,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        // `join` drops the last path segment unless the base ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ShelfSync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            connection_id: connection_id.into(),
            base_url,
            client,
            credentials,
        })
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for an API path with query parameters
    pub fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base_url.join(path)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn check_connection(&self, item_id: &ItemIdentifier) -> Result<()> {
        if item_id.connection_id != self.connection_id {
            return Err(ShelfError::invalid_input(format!(
                "{} does not belong to connection {}",
                item_id, self.connection_id
            )));
        }
        Ok(())
    }

    async fn build_auth_headers(&self, token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| ShelfError::InvalidInput(format!("Invalid auth token: {}", e)))?,
            );
        }

        Ok(headers)
    }

    /// GET a JSON document with auth refresh and retry
    pub async fn get_json<T>(&self, url: Url) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut attempts = 0;
        let mut refreshed = false;
        let mut token = self.credentials.access_token().await?;
        let mut last_error = None;

        while attempts < MAX_RETRY_ATTEMPTS {
            attempts += 1;

            let headers = self.build_auth_headers(token.as_deref()).await?;
            let result = self.client.get(url.clone()).headers(headers).send().await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    match status {
                        s if s.is_success() => return self.handle_success_response(response).await,

                        // Refresh once, then retry without counting the attempt
                        StatusCode::UNAUTHORIZED if !refreshed => {
                            refreshed = true;
                            attempts -= 1;
                            token = self
                                .credentials
                                .refresh_access_token(token.as_deref())
                                .await?;
                            tracing::debug!(connection = %self.connection_id, "Retrying request with refreshed token");
                            continue;
                        }

                        StatusCode::UNAUTHORIZED => {
                            return Err(ShelfError::Unauthorized(format!(
                                "{} rejected the refreshed token",
                                endpoint_of(&url)
                            )));
                        }

                        s if s.is_server_error() && attempts < MAX_RETRY_ATTEMPTS => {
                            let body = response.text().await.unwrap_or_default();
                            last_error = Some(ShelfError::api_failed(
                                format!("Server error: {}", body),
                                Some(status.as_u16()),
                                Some(endpoint_of(&url)),
                            ));
                            let delay = Duration::from_secs(
                                INITIAL_RETRY_DELAY_SECS * 2_u64.pow(attempts - 1),
                            );
                            tracing::warn!(status = status.as_u16(), ?delay, "Server error, retrying");
                            sleep(delay).await;
                            continue;
                        }

                        _ => return self.handle_error_response(response).await,
                    }
                }

                Err(e) if attempts < MAX_RETRY_ATTEMPTS && (e.is_timeout() || e.is_connect()) => {
                    last_error = Some(ShelfError::network_error(
                        format!("Network request failed: {}", e),
                        true,
                    ));
                    let delay =
                        Duration::from_secs(INITIAL_RETRY_DELAY_SECS * 2_u64.pow(attempts - 1));
                    sleep(delay).await;
                    continue;
                }

                Err(e) => {
                    return Err(ShelfError::network_error(
                        format!("Network request failed: {}", e),
                        e.is_timeout() || e.is_connect(),
                    ));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ShelfError::ApiRequestFailed {
            message: format!("Request failed after {} attempts", attempts),
            status_code: None,
            endpoint: Some(endpoint_of(&url)),
        }))
    }

    async fn handle_success_response<T>(&self, response: Response) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = response.url().clone();
        let body = response.text().await?;

        serde_json::from_str(&body).map_err(|e| ShelfError::InvalidApiResponse {
            message: format!("Failed to parse response from {}: {}", endpoint_of(&url), e),
            response_body: Some(body.chars().take(512).collect()),
        })
    }

    async fn handle_error_response<T>(&self, response: Response) -> Result<T> {
        let status = response.status();
        let endpoint = endpoint_of(response.url());
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::NOT_FOUND {
            return Err(ShelfError::not_found(endpoint));
        }

        Err(ShelfError::api_failed(
            format!("HTTP {}: {}", status.as_u16(), body),
            Some(status.as_u16()),
            Some(endpoint),
        ))
    }

    /// Authenticated request for a file, answered with a refresh on 401
    async fn transfer_request(&self, url: Url) -> Result<TransferRequest> {
        let mut request = TransferRequest::new(url).with_credentials(self.credentials.clone());
        if let Some(token) = self.credentials.access_token().await? {
            request = request.with_header(AUTHORIZATION.as_str(), format!("Bearer {}", token));
        }
        Ok(request)
    }

    async fn fetch_item(&self, api_item_id: &str) -> Result<ItemPayload> {
        let url = self.endpoint(
            &format!("api/items/{}", urlencoding::encode(api_item_id)),
            &[("expanded", "1".to_string())],
        )?;
        self.get_json(url).await
    }
}

/// Path of a URL, for error messages without query strings or tokens
fn endpoint_of(url: &Url) -> String {
    url.path().to_string()
}

#[async_trait]
impl LibraryApi for ShelfClient {
    async fn playable_item(&self, item_id: &ItemIdentifier) -> Result<PlayableItemGraph> {
        self.check_connection(item_id)?;
        if !item_id.is_playable() {
            return Err(ShelfError::UnsupportedItemType(item_id.item_type.to_string()));
        }

        let payload = self.fetch_item(item_id.api_item_id()).await?;
        payload.into_graph(item_id)
    }

    async fn podcast(&self, podcast_id: &ItemIdentifier) -> Result<Podcast> {
        self.check_connection(podcast_id)?;
        let payload = self.fetch_item(&podcast_id.primary_id).await?;
        payload.into_podcast(podcast_id)
    }

    async fn cover_request(&self, item_id: &ItemIdentifier, size: ImageSize) -> Result<TransferRequest> {
        self.check_connection(item_id)?;

        let path = match item_id.item_type {
            ItemType::Author => format!("api/authors/{}/image", urlencoding::encode(&item_id.primary_id)),
            ItemType::Episode => format!("api/items/{}/cover", urlencoding::encode(item_id.api_item_id())),
            _ => format!("api/items/{}/cover", urlencoding::encode(&item_id.primary_id)),
        };
        let url = self.endpoint(&path, &[("width", size.width().to_string())])?;
        self.transfer_request(url).await
    }

    async fn pdf_request(&self, item_id: &ItemIdentifier, ino: &str) -> Result<TransferRequest> {
        self.check_connection(item_id)?;
        let url = self.endpoint(
            &format!(
                "api/items/{}/ebook/{}",
                urlencoding::encode(item_id.api_item_id()),
                urlencoding::encode(ino)
            ),
            &[],
        )?;
        self.transfer_request(url).await
    }

    async fn audio_track_request(&self, item_id: &ItemIdentifier, ino: &str) -> Result<TransferRequest> {
        self.check_connection(item_id)?;
        let url = self.endpoint(
            &format!(
                "api/items/{}/file/{}",
                urlencoding::encode(item_id.api_item_id()),
                urlencoding::encode(ino)
            ),
            &[],
        )?;
        self.transfer_request(url).await
    }
}

/// Dispatches [`LibraryApi`] calls to the client of the item's connection
#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<String, Arc<ShelfClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one client per configured connection
    pub fn from_config(
        config: &DownloadConfig,
        credentials_for: impl Fn(&ConnectionConfig) -> Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for connection in &config.connections {
            let client = ShelfClient::new(
                connection.id.clone(),
                &connection.server_url,
                credentials_for(connection),
                config.request_timeout(),
            )?;
            registry.insert(client);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, client: ShelfClient) {
        self.clients
            .insert(client.connection_id().to_string(), Arc::new(client));
    }

    pub fn client(&self, connection_id: &str) -> Result<&Arc<ShelfClient>> {
        self.clients
            .get(connection_id)
            .ok_or_else(|| ShelfError::UnknownConnection(connection_id.to_string()))
    }
}

#[async_trait]
impl LibraryApi for ClientRegistry {
    async fn playable_item(&self, item_id: &ItemIdentifier) -> Result<PlayableItemGraph> {
        self.client(&item_id.connection_id)?.playable_item(item_id).await
    }

    async fn podcast(&self, podcast_id: &ItemIdentifier) -> Result<Podcast> {
        self.client(&podcast_id.connection_id)?.podcast(podcast_id).await
    }

    async fn cover_request(&self, item_id: &ItemIdentifier, size: ImageSize) -> Result<TransferRequest> {
        self.client(&item_id.connection_id)?
            .cover_request(item_id, size)
            .await
    }

    async fn pdf_request(&self, item_id: &ItemIdentifier, ino: &str) -> Result<TransferRequest> {
        self.client(&item_id.connection_id)?.pdf_request(item_id, ino).await
    }

    async fn audio_track_request(&self, item_id: &ItemIdentifier, ino: &str) -> Result<TransferRequest> {
        self.client(&item_id.connection_id)?
            .audio_track_request(item_id, ino)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::StaticCredentialProvider;

    fn client(base: &str) -> ShelfClient {
        ShelfClient::new(
            "home",
            base,
            Arc::new(StaticCredentialProvider::new(Some("secret".to_string()))),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = client("https://abs.example.com/shelf");
        let url = client
            .endpoint("api/items/li_1", &[("expanded", "1".to_string())])
            .unwrap();
        assert_eq!(url.as_str(), "https://abs.example.com/shelf/api/items/li_1?expanded=1");
    }

    #[tokio::test]
    async fn test_cover_request_routes() {
        let client = client("https://abs.example.com/");

        let episode = ItemIdentifier::episode("ep_1", "li_pod", "lib", "home");
        let request = client.cover_request(&episode, ImageSize::Small).await.unwrap();
        assert_eq!(request.url.path(), "/api/items/li_pod/cover");
        assert_eq!(request.url.query(), Some("width=200"));
        assert_eq!(
            request.headers,
            vec![("authorization".to_string(), "Bearer secret".to_string())]
        );

        let author = ItemIdentifier::new("aut_1", None, "lib", "home", ItemType::Author);
        let request = client.cover_request(&author, ImageSize::Tiny).await.unwrap();
        assert_eq!(request.url.path(), "/api/authors/aut_1/image");
    }

    #[tokio::test]
    async fn test_file_requests() {
        let client = client("https://abs.example.com/");
        let book = ItemIdentifier::audiobook("li_1", "lib", "home");

        let audio = client.audio_track_request(&book, "123").await.unwrap();
        assert_eq!(audio.url.path(), "/api/items/li_1/file/123");

        let pdf = client.pdf_request(&book, "456").await.unwrap();
        assert_eq!(pdf.url.path(), "/api/items/li_1/ebook/456");
        assert!(pdf.credentials.is_some());
    }

    #[tokio::test]
    async fn test_rejects_foreign_connection() {
        let client = client("https://abs.example.com/");
        let book = ItemIdentifier::audiobook("li_1", "lib", "work");
        assert!(client.audio_track_request(&book, "1").await.is_err());
    }

    #[tokio::test]
    async fn test_registry_unknown_connection() {
        let registry = ClientRegistry::new();
        let book = ItemIdentifier::audiobook("li_1", "lib", "nowhere");
        let result = registry.pdf_request(&book, "1").await;
        assert!(matches!(result, Err(ShelfError::UnknownConnection(_))));
    }
}
