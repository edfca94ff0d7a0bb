//! # wis2files
//!
//! `wis2files` subscribes to an MQTT topic carrying WIS2 notifications and
//! downloads the file behind every canonical link it announces.
//!
//! ## Core Modules
//!
//! - `config`: Loads the immutable settings from defaults, file, environment and CLI.
//! - `notification`: Decodes payloads and selects canonical links.
//! - `fetcher`: Downloads one link atomically into the download directory.
//! - `dispatcher`: Fans a notification out to bounded concurrent fetches.
//! - `session`: Connects, subscribes, reconnects and disconnects from the broker.
//! - `utils`: Error types and logging.

pub mod config;
pub mod dispatcher;
pub mod fetcher;
pub mod notification;
pub mod session;
pub mod utils;

#[cfg(test)]
mod tests;

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use crate::config::Settings;
use crate::dispatcher::Dispatcher;
use crate::fetcher::FileFetcher;
use crate::session::SessionManager;
use crate::utils::error::Result;

/// Wires the fetcher, dispatcher and session together and runs until
/// `shutdown` resolves.
pub async fn run(settings: Settings, shutdown: impl Future<Output = ()>) -> Result<()> {
    settings.validate()?;

    let fetcher = FileFetcher::new(&settings.download)?;
    fetcher.prepare().await?;
    info!(dir = %fetcher.dir().display(), "saving downloads");

    let dispatcher = Dispatcher::new(
        Arc::new(fetcher),
        settings.download.max_concurrent_fetches,
    );
    let manager = SessionManager::new(settings.broker)?;

    manager
        .run(
            Arc::new(dispatcher),
            shutdown,
            settings.download.shutdown_grace(),
        )
        .await?;
    Ok(())
}
