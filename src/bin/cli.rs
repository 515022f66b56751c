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

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shelf_core::api::{ClientRegistry, CredentialProvider, StaticCredentialProvider};
use shelf_core::download::{DownloadEvent, StatusChange};
use shelf_core::platform::DesktopPlatform;
use shelf_core::{logging, DownloadConfig, DownloadStatus, DownloadSubsystem, ItemIdentifier, ItemType};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "shelf-cli")]
#[command(about = "ShelfSync CLI - Desktop testing tool", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the download status and progress of an item
    Status {
        /// Item key, e.g. `audiobook::home::lib::li_123::`
        item: ItemIdentifier,
    },
    /// Enqueue an item and wait until it is on disk
    Download { item: ItemIdentifier },
    /// Remove a download (podcasts remove every episode)
    Remove { item: ItemIdentifier },
    /// Remove every download
    RemoveAll,
    /// Remove every download of one connection
    RemoveConnection { connection: String },
    /// Search downloaded items
    Search {
        query: String,
        /// Restrict to one item type
        #[arg(short = 't', long = "type")]
        item_type: Option<ItemType>,
    },
    /// List downloaded items
    List,
    /// Resume unfinished downloads and wait until the ledger is drained
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let config = match &cli.config {
        Some(path) => DownloadConfig::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => DownloadConfig::default(),
    };

    let registry = ClientRegistry::from_config(&config, |connection| {
        Arc::new(StaticCredentialProvider::new(connection.access_token.clone())) as Arc<dyn CredentialProvider>
    })?;

    let downloads = DownloadSubsystem::open(config, Arc::new(registry), Arc::new(DesktopPlatform))
        .await
        .context("failed to open download store")?;

    match cli.command {
        Commands::Status { item } => {
            let status = downloads.status(&item).await;
            let progress = downloads.download_progress(&item).await;
            println!("{}: {} ({:.0}%)", item, status, progress * 100.0);
        }
        Commands::Download { item } => {
            let mut events = downloads.subscribe();
            downloads.resume_pending().await?;
            downloads.download(&item).await?;
            println!("Downloading {}", item);

            loop {
                match events.recv().await {
                    Ok(DownloadEvent::StatusChanged(Some(StatusChange { item_id, status })))
                        if item_id == item =>
                    {
                        match status {
                            DownloadStatus::Completed => break,
                            DownloadStatus::None => bail!("download of {} was removed", item),
                            DownloadStatus::Downloading => {}
                        }
                    }
                    Ok(DownloadEvent::ProgressChanged(change)) if change.item_id == item => {
                        tracing::debug!(
                            asset = %change.asset_id,
                            written = change.total_bytes_written,
                            expected = ?change.total_bytes_expected,
                            "progress"
                        );
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Missed download events");
                        if downloads.status(&item).await == DownloadStatus::Completed {
                            break;
                        }
                    }
                    Err(e) => bail!("event stream closed: {}", e),
                }
            }
            println!("Downloaded {}", item);
        }
        Commands::Remove { item } => {
            downloads.remove(&item).await?;
            println!("Removed {}", item);
        }
        Commands::RemoveAll => {
            downloads.remove_all().await;
            println!("Removed all downloads");
        }
        Commands::RemoveConnection { connection } => {
            downloads.remove_connection(&connection).await?;
            println!("Removed downloads of {}", connection);
        }
        Commands::Search { query, item_type } => {
            for item_id in downloads.search(&query, item_type).await? {
                println!("{}", item_id);
            }
        }
        Commands::List => {
            for book in downloads.audiobooks().await? {
                let status = downloads.status(&book.id).await;
                println!("{}  {}  [{}]", book.id, book.name, status);
            }
            for podcast in downloads.podcasts().await? {
                println!("{}  {}", podcast.id, podcast.name);
                for episode in downloads.episodes_of(&podcast.id).await? {
                    let status = downloads.status(&episode.id).await;
                    println!("  {}  {}  [{}]", episode.id, episode.name, status);
                }
            }
        }
        Commands::Run => {
            let mut events = downloads.subscribe();
            downloads.resume_pending().await?;
            let mut remaining = pending_items(&downloads).await?;

            while !remaining.is_empty() {
                if let Ok(DownloadEvent::StatusChanged(Some(change))) = events.recv().await {
                    if change.status != DownloadStatus::Downloading {
                        remaining.retain(|item| item != &change.item_id);
                        println!("{}: {}", change.item_id, change.status);
                    }
                }
            }
        }
    }

    Ok(())
}

async fn pending_items(downloads: &DownloadSubsystem) -> Result<Vec<ItemIdentifier>> {
    let mut pending = Vec::new();
    let ids = downloads
        .audiobooks()
        .await?
        .into_iter()
        .map(|book| book.id)
        .chain(downloads.episodes().await?.into_iter().map(|episode| episode.id));

    for item_id in ids {
        if downloads.status(&item_id).await == DownloadStatus::Downloading {
            pending.push(item_id);
        }
    }
    Ok(pending)
}
