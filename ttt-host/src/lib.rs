//! Host side of ttt-core: configuration, logging and the tick driver an overlay embeds.

pub mod config;
pub mod driver;
pub mod logging;

use std::sync::Arc;

use tracing::info;
use ttt_core::{Directory, ExtensionRegistry, Torrent, TunnelError};

pub use config::{Config, ConfigError};
pub use driver::{event_channel, EventSender, SessionDriver};

/// Build the shared directory (seeded with the configured torrents) and the standard registry.
pub fn bootstrap(config: &Config) -> Result<(ExtensionRegistry, Arc<Directory>), HostError> {
    let settings = config.core()?;
    let directory = Arc::new(Directory::new());
    for info_hash in &config.torrents {
        directory.add_self(Torrent::new(*info_hash));
    }
    info!(torrents = config.torrents.len(), "directory seeded");
    let registry = ExtensionRegistry::standard(&settings, directory.clone())?;
    Ok((registry, directory))
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}
