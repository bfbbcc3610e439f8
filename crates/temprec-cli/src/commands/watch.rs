//! Watch command implementation.
//!
//! Runs the full scan → connect → stream pipeline once. There is no
//! reconnection: when the link drops the command ends.

use std::time::Duration;

use anyhow::{Result, bail};
use tokio_util::sync::CancellationToken;

use temprec_core::{
    ClientConfig, RunOutcome, ScanOutcome, SessionState, TelemetryEvent, TelemetryReceiver,
    telemetry_channel,
};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_event_json, format_event_text};

/// Arguments for the watch command.
pub struct WatchArgs<'a> {
    pub target: String,
    pub timeout: Duration,
    pub count: u32,
    pub format: OutputFormat,
    pub opts: &'a FormatOptions,
}

pub async fn cmd_watch(args: WatchArgs<'_>) -> Result<()> {
    let WatchArgs {
        target,
        timeout,
        count,
        format,
        opts,
    } = args;

    let (sink, mut events) = telemetry_channel();
    let config = ClientConfig::default()
        .target_name(&target)
        .scan_duration(timeout);
    let client = super::connect_client(config, sink).await?;

    if !opts.quiet && format == OutputFormat::Text {
        if count > 0 {
            eprintln!("Watching: {} | Count: {} | Press Ctrl+C to stop", target, count);
        } else {
            eprintln!("Watching: {} | Press Ctrl+C to stop", target);
        }
        eprintln!("{}", "-".repeat(50));
    }

    let close = CancellationToken::new();
    let run = client.run(close.clone());
    tokio::pin!(run);

    let mut readings_taken: u32 = 0;
    let outcome = loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c(), if !close.is_cancelled() => {
                eprintln!("\nShutting down...");
                close.cancel();
            }
            Some(event) = events.recv() => {
                if matches!(event, TelemetryEvent::Reading { .. }) {
                    readings_taken += 1;
                }
                print_event(&event, format, opts)?;
                if count > 0 && readings_taken >= count && !close.is_cancelled() {
                    eprintln!("Completed {} readings.", readings_taken);
                    close.cancel();
                }
            }
            outcome = &mut run => break outcome?,
        }
    };

    drain(&mut events, format, opts)?;
    tracing::debug!(?outcome, readings = readings_taken, "Watch finished");

    match outcome {
        RunOutcome::Closed | RunOutcome::Session(SessionState::Disconnected) => Ok(()),
        RunOutcome::Scan(ScanOutcome::TimedOut) => {
            bail!("No device named {} found", target)
        }
        RunOutcome::Scan(ScanOutcome::Failed(reason)) => bail!("Scan failed: {}", reason),
        RunOutcome::Session(SessionState::Error(reason)) => bail!("{}", reason),
        RunOutcome::Scan(ScanOutcome::Matched(_) | ScanOutcome::Stopped)
        | RunOutcome::Session(_) => Ok(()),
    }
}

/// Print whatever was emitted before the pipeline returned.
fn drain(events: &mut TelemetryReceiver, format: OutputFormat, opts: &FormatOptions) -> Result<()> {
    while let Ok(event) = events.try_recv() {
        print_event(&event, format, opts)?;
    }
    Ok(())
}

fn print_event(event: &TelemetryEvent, format: OutputFormat, opts: &FormatOptions) -> Result<()> {
    match format {
        OutputFormat::Json => print!("{}", format_event_json(event)?),
        OutputFormat::Text => {
            if let Some(line) = format_event_text(event, opts) {
                print!("{}", line);
            }
        }
    }
    Ok(())
}
