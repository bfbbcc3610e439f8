//! Output formatting for text and JSON output.

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;

use temprec_core::{DeviceIdentity, FailureReason, Reading, ScanOutcome, TelemetryEvent};

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Print only readings and errors.
    pub quiet: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool, quiet: bool) -> Self {
        Self { no_color, quiet }
    }
}

/// `HH:MM:SS` of the local receive time.
fn clock(reading: &Reading) -> String {
    let t = reading.received_at;
    format!("{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second())
}

/// Format one reading as a text line.
pub fn format_reading_text(reading: &Reading, opts: &FormatOptions) -> String {
    let value = match reading.celsius() {
        Some(c) => format!("{} °C", c),
        None => reading.text.clone(),
    };
    if opts.no_color {
        format!("[{}] Temperature: {}\n", clock(reading), value)
    } else {
        format!(
            "[{}] Temperature: {}\n",
            clock(reading).dimmed(),
            value.green().bold()
        )
    }
}

/// Format a telemetry event as text, or `None` if it should not be shown.
pub fn format_event_text(event: &TelemetryEvent, opts: &FormatOptions) -> Option<String> {
    let line = match event {
        TelemetryEvent::Reading { reading } => return Some(format_reading_text(reading, opts)),
        TelemetryEvent::Error { reason } => {
            let msg = format!("Error: {}", reason);
            if opts.no_color {
                msg
            } else {
                msg.red().to_string()
            }
        }
        TelemetryEvent::DecodeFailed { .. } => {
            let msg = event.to_string();
            if opts.no_color {
                msg
            } else {
                msg.yellow().to_string()
            }
        }
        _ if opts.quiet => return None,
        other => {
            let msg = other.to_string();
            if opts.no_color {
                msg
            } else {
                msg.dimmed().to_string()
            }
        }
    };
    Some(format!("{}\n", line))
}

/// Format a telemetry event as a JSON line.
pub fn format_event_json(event: &TelemetryEvent) -> Result<String> {
    Ok(format!("{}\n", serde_json::to_string(event)?))
}

/// JSON shape of a scan result.
#[derive(Debug, Serialize)]
struct ScanReport<'a> {
    target: &'a str,
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a DeviceIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<FailureReason>,
}

/// Format a scan outcome as JSON.
pub fn format_scan_json(target: &str, outcome: &ScanOutcome) -> Result<String> {
    let report = ScanReport {
        target,
        found: outcome.device().is_some(),
        device: outcome.device(),
        error: outcome.failure(),
    };
    Ok(format!("{}\n", serde_json::to_string_pretty(&report)?))
}

/// Format a scan outcome as text.
pub fn format_scan_text(target: &str, outcome: &ScanOutcome, opts: &FormatOptions) -> String {
    match outcome {
        ScanOutcome::Matched(device) => {
            let name = device.display_name();
            if opts.no_color {
                format!("Found {} at {}\n", name, device.address)
            } else {
                format!("Found {} at {}\n", name.green(), device.address.cyan())
            }
        }
        ScanOutcome::TimedOut => format!("No device named {} found\n", target),
        ScanOutcome::Stopped => "Scan stopped\n".to_string(),
        ScanOutcome::Failed(reason) => {
            let msg = format!("Scan failed: {}", reason);
            if opts.no_color {
                format!("{}\n", msg)
            } else {
                format!("{}\n", msg.red())
            }
        }
    }
}
