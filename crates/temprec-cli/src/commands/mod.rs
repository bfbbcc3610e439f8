//! Command implementations for the CLI.

mod config;
mod scan;
mod watch;

pub use config::cmd_config;
pub use scan::{ScanArgs, cmd_scan};
pub use watch::{WatchArgs, cmd_watch};

use std::sync::Arc;

use anyhow::{Context, Result};
use temprec_core::{AllowAll, BtleRadio, Client, ClientConfig, ConnectionConfig, TelemetrySink};

/// Build a client on the system Bluetooth adapter.
async fn connect_client(config: ClientConfig, sink: TelemetrySink) -> Result<Client> {
    tracing::debug!(
        device = %config.target_name,
        scan_secs = config.scan_duration.as_secs(),
        "Opening Bluetooth adapter"
    );
    let radio = BtleRadio::with_config(ConnectionConfig::from(&config))
        .await
        .context("Failed to open Bluetooth adapter")?;
    Client::new(Arc::new(radio), Arc::new(AllowAll), sink, config).context("Invalid configuration")
}
