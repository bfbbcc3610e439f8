use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod format;

use cli::{Cli, Commands};
use commands::{ScanArgs, WatchArgs, cmd_config, cmd_scan, cmd_watch};
use config::{Config, resolve_device, resolve_format, resolve_timeout};
use format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "temprec", &mut io::stdout());
        return Ok(());
    }

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    tracing::debug!("Config file: {}", Config::path().display());
    let opts = FormatOptions::new(cli.no_color || config.no_color, cli.quiet);

    match cli.command {
        Commands::Scan { device, format } => {
            cmd_scan(ScanArgs {
                target: resolve_device(device.device, &config),
                timeout: resolve_timeout(device.timeout, &config),
                format: resolve_format(format, &config),
                opts: &opts,
            })
            .await?;
        }
        Commands::Watch {
            device,
            count,
            format,
        } => {
            cmd_watch(WatchArgs {
                target: resolve_device(device.device, &config),
                timeout: resolve_timeout(device.timeout, &config),
                count,
                format: resolve_format(format, &config),
                opts: &opts,
            })
            .await?;
        }
        Commands::Config { action } => cmd_config(action)?,
        Commands::Completions { .. } => {
            // Already handled above
            unreachable!()
        }
    }

    Ok(())
}
