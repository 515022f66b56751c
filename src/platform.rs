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


//! Host platform hooks
//!
//! Mobile hosts know things the core cannot observe itself: whether the current
//! network path is metered, how to keep the process alive while an enqueue
//! finishes, and how to keep downloaded media out of device backups.

use crate::error::Result;
use std::fmt;
use std::path::Path;

/// Properties of the current network path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkPath {
    /// Cellular or personal hotspot
    pub is_expensive: bool,
    /// Low data mode
    pub is_constrained: bool,
}

impl NetworkPath {
    pub fn is_metered(&self) -> bool {
        self.is_expensive || self.is_constrained
    }
}

/// Keeps the host from suspending the process while held
///
/// The lease ends when dropped.
pub struct BackgroundLease {
    name: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl BackgroundLease {
    pub fn new(name: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            release: Some(Box::new(release)),
        }
    }

    /// Lease with nothing to release
    pub fn noop(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            release: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for BackgroundLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundLease")
            .field("name", &self.name)
            .finish()
    }
}

impl Drop for BackgroundLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

pub trait Platform: Send + Sync {
    fn network_path(&self) -> NetworkPath;

    fn begin_background_lease(&self, name: &str) -> BackgroundLease;

    /// Mark a downloaded file as excluded from device backups
    fn exclude_from_backup(&self, path: &Path) -> Result<()>;
}

/// Desktop hosts: unmetered network, nothing to keep alive, no backup flags
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopPlatform;

impl Platform for DesktopPlatform {
    fn network_path(&self) -> NetworkPath {
        NetworkPath::default()
    }

    fn begin_background_lease(&self, name: &str) -> BackgroundLease {
        BackgroundLease::noop(name)
    }

    fn exclude_from_backup(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}
