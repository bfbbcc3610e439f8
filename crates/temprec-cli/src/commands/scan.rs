//! Scan command implementation.

use std::future::Future;
use std::time::Duration;

use anyhow::{Result, bail};
use temprec_core::{ClientConfig, ScanHandle, ScanOutcome, TelemetrySink};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_scan_json, format_scan_text};

/// Arguments for the scan command.
pub struct ScanArgs<'a> {
    pub target: String,
    pub timeout: Duration,
    pub format: OutputFormat,
    pub opts: &'a FormatOptions,
}

pub async fn cmd_scan(args: ScanArgs<'_>) -> Result<()> {
    let ScanArgs {
        target,
        timeout,
        format,
        opts,
    } = args;

    if !opts.quiet && format == OutputFormat::Text {
        eprintln!("Scanning for {} ({}s)...", target, timeout.as_secs());
    }

    let config = ClientConfig::default()
        .target_name(&target)
        .scan_duration(timeout);
    let client = super::connect_client(config, TelemetrySink::discard()).await?;
    let handle = client.scan().await?;

    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nStopping scan...");
        } else {
            std::future::pending::<()>().await;
        }
    };
    let outcome = wait_for_scan(handle, interrupt).await?;

    let content = match format {
        OutputFormat::Json => format_scan_json(&target, &outcome)?,
        OutputFormat::Text => format_scan_text(&target, &outcome, opts),
    };
    print!("{}", content);

    if let ScanOutcome::Failed(reason) = outcome {
        bail!("Scan failed: {}", reason);
    }
    Ok(())
}

/// Wait for the scan window, stopping it if `interrupt` completes first.
///
/// The window has always resolved and released the radio on return.
async fn wait_for_scan(
    handle: ScanHandle,
    interrupt: impl Future<Output = ()>,
) -> Result<ScanOutcome> {
    let stop = handle.stop_token();
    let pending = handle.outcome();
    tokio::pin!(pending);

    let outcome = tokio::select! {
        outcome = &mut pending => outcome?,
        _ = interrupt => {
            stop.cancel();
            let outcome = pending.await?;
            tracing::debug!(?outcome, "Scan interrupted");
            outcome
        }
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use temprec_core::{AllowAll, Client, MockRadio, RadioCall};

    fn mock_client(radio: &Arc<MockRadio>, window: Duration) -> Client {
        Client::new(
            radio.clone(),
            Arc::new(AllowAll),
            TelemetrySink::discard(),
            ClientConfig::default().scan_duration(window),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_interrupted_scan_is_stopped_before_return() {
        let radio = Arc::new(MockRadio::builder().build());
        let client = mock_client(&radio, Duration::from_secs(30));

        let handle = client.scan().await.unwrap();
        let outcome = wait_for_scan(handle, async {}).await.unwrap();

        assert_eq!(outcome, ScanOutcome::Stopped);
        assert!(!client.scanner().is_scanning().await);
        assert_eq!(radio.count(RadioCall::StopScan).await, 1);
    }

    #[tokio::test]
    async fn test_uninterrupted_scan_runs_to_its_deadline() {
        let radio = Arc::new(MockRadio::builder().build());
        let client = mock_client(&radio, Duration::from_millis(20));

        let handle = client.scan().await.unwrap();
        let outcome = wait_for_scan(handle, std::future::pending()).await.unwrap();

        assert_eq!(outcome, ScanOutcome::TimedOut);
        assert!(!client.scanner().is_scanning().await);
    }
}
