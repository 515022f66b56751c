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


//! Bearer token source

use crate::error::{Result, ShelfError};
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::Mutex;

/// Supplies access tokens for one server connection
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current access token, if the connection uses one
    async fn access_token(&self) -> Result<Option<String>>;

    /// Called after the server rejected `expired`; returns the token to retry with
    async fn refresh_access_token(&self, expired: Option<&str>) -> Result<Option<String>>;
}

/// Fixed token, replaced only by the host
///
/// A token the server rejected is never handed out again.
#[derive(Debug, Default)]
pub struct StaticCredentialProvider {
    state: Mutex<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    token: Option<String>,
    known_expired: HashSet<String>,
}

impl StaticCredentialProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            state: Mutex::new(TokenState {
                token,
                known_expired: HashSet::new(),
            }),
        }
    }

    /// Install a new token, e.g. after the user signed in again
    pub async fn set_token(&self, token: Option<String>) {
        self.state.lock().await.token = token;
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.state.lock().await.token.clone())
    }

    async fn refresh_access_token(&self, expired: Option<&str>) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        if let Some(expired) = expired {
            state.known_expired.insert(expired.to_string());
        }

        match &state.token {
            Some(token) if !state.known_expired.contains(token) => Ok(Some(token.clone())),
            _ => Err(ShelfError::Unauthorized(
                "access token expired and cannot be refreshed".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refresh_rejects_known_expired() {
        let provider = StaticCredentialProvider::new(Some("a".to_string()));
        assert_eq!(provider.access_token().await.unwrap().as_deref(), Some("a"));

        let refreshed = provider.refresh_access_token(Some("a")).await;
        assert!(matches!(refreshed, Err(ShelfError::Unauthorized(_))));

        provider.set_token(Some("b".to_string())).await;
        let refreshed = provider.refresh_access_token(Some("a")).await.unwrap();
        assert_eq!(refreshed.as_deref(), Some("b"));
    }
}
