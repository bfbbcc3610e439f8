//! The scan → connect → stream pipeline.
//!
//! [`Client`] ties a [`Scanner`] to a [`Session`]: one scan window for the
//! configured name, then one session for the matched device. It does not
//! retry; a new attempt is a new call to [`Client::run`] or
//! [`Client::start`].

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use temprec_types::DeviceIdentity;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::events::TelemetrySink;
use crate::gate::CapabilityGate;
use crate::radio::Radio;
use crate::scan::{ScanHandle, ScanOutcome, Scanner};
use crate::session::{Session, SessionState};

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The scan did not produce a device.
    Scan(ScanOutcome),
    /// A session ran and reached this terminal state.
    Session(SessionState),
    /// Closed before the scan matched.
    Closed,
}

/// BLE central client for one named thermometer.
#[derive(Clone)]
pub struct Client {
    radio: Arc<dyn Radio>,
    gate: Arc<dyn CapabilityGate>,
    sink: TelemetrySink,
    config: ClientConfig,
    scanner: Scanner,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client. Fails if `config` does not validate.
    pub fn new(
        radio: Arc<dyn Radio>,
        gate: Arc<dyn CapabilityGate>,
        sink: TelemetrySink,
        config: ClientConfig,
    ) -> Result<Self> {
        config.validate()?;
        let scanner = Scanner::new(radio.clone(), gate.clone(), sink.clone());
        Ok(Self {
            radio,
            gate,
            sink,
            config,
            scanner,
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The scanner, for stopping a window opened by [`Client::scan`].
    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Open one scan window for the configured name.
    pub async fn scan(&self) -> Result<ScanHandle> {
        self.scanner
            .start_scan(&self.config.target_name, self.config.scan_duration)
            .await
    }

    /// An idle session for `device` with the configured profile.
    pub fn session(&self, device: DeviceIdentity) -> Session {
        Session::new(
            self.radio.clone(),
            self.gate.clone(),
            self.sink.clone(),
            self.config.profile,
            device,
        )
    }

    /// Scan, then stream from the matched device until the session ends.
    ///
    /// Cancelling `close` stops the scan or closes the link.
    pub async fn run(&self, close: CancellationToken) -> Result<RunOutcome> {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        self.run_with_state(close, state_tx).await
    }

    async fn run_with_state(
        &self,
        close: CancellationToken,
        state_tx: watch::Sender<SessionState>,
    ) -> Result<RunOutcome> {
        let handle = self.scan().await?;
        let stop = handle.stop_token();

        let pending = handle.outcome();
        tokio::pin!(pending);

        let outcome = tokio::select! {
            outcome = &mut pending => outcome?,
            _ = close.cancelled() => {
                info!("Closed while scanning");
                stop.cancel();
                let stopped = pending.await?;
                debug!(?stopped, "Scan window resolved after close");
                return Ok(RunOutcome::Closed);
            }
        };

        let ScanOutcome::Matched(device) = outcome else {
            return Ok(RunOutcome::Scan(outcome));
        };

        let mut session = self.session(device).with_state_channel(state_tx);
        session.connect().await?;
        let state = session.run(close).await;
        if let Some(reason) = state.failure() {
            warn!("Session ended: {}", reason);
        }
        Ok(RunOutcome::Session(state))
    }

    /// Run the pipeline on a background task.
    pub fn start(&self) -> ClientHandle {
        let close = CancellationToken::new();
        let (state_tx, state) = watch::channel(SessionState::Idle);
        let client = self.clone();
        let token = close.clone();
        let task = tokio::spawn(async move { client.run_with_state(token, state_tx).await });

        ClientHandle { close, state, task }
    }
}

/// Handle to a pipeline running on a background task.
#[derive(Debug)]
pub struct ClientHandle {
    close: CancellationToken,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<Result<RunOutcome>>,
}

impl ClientHandle {
    /// Stop the scan or close the link. Idempotent.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// State of the session, `Idle` while still scanning.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// A receiver for session state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Whether the pipeline finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the pipeline to end.
    pub async fn wait(self) -> Result<RunOutcome> {
        self.task.await.map_err(|_| Error::Cancelled)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use crate::events::{TelemetryEvent, telemetry_channel};
    use crate::gate::PolicyGate;
    use crate::mock::MockRadio;
    use std::time::Duration;

    #[test]
    fn test_invalid_config_is_rejected() {
        let radio = Arc::new(MockRadio::thermometer());
        let result = Client::new(
            radio,
            Arc::new(PolicyGate::default()),
            TelemetrySink::discard(),
            ClientConfig::default().target_name(""),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_scan_timeout() {
        let radio = Arc::new(MockRadio::builder().build());
        let client = Client::new(
            radio,
            Arc::new(PolicyGate::default()),
            TelemetrySink::discard(),
            ClientConfig::default().scan_duration(Duration::from_secs(2)),
        )
        .unwrap();

        let outcome = client.run(CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Scan(ScanOutcome::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_scanning() {
        let radio = Arc::new(MockRadio::builder().build());
        let client = Client::new(
            radio,
            Arc::new(PolicyGate::default()),
            TelemetrySink::discard(),
            ClientConfig::default(),
        )
        .unwrap();

        let handle = client.start();
        tokio::task::yield_now().await;
        handle.close();
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Closed);
        assert!(!client.scanner().is_scanning().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_streams_and_closes() {
        let radio = Arc::new(MockRadio::thermometer());
        let (sink, mut rx) = telemetry_channel();
        let client = Client::new(
            radio.clone(),
            Arc::new(PolicyGate::default()),
            sink,
            ClientConfig::default(),
        )
        .unwrap();

        let handle = client.start();
        radio.wait_for_subscription().await;
        assert!(radio.notify(b"23.5").await);

        let mut state = handle.watch_state();
        state
            .wait_for(|s| *s == SessionState::Streaming)
            .await
            .unwrap();

        loop {
            if let TelemetryEvent::Reading { reading } = rx.recv().await.unwrap() {
                assert_eq!(reading.celsius(), Some(23.5));
                break;
            }
        }

        handle.close();
        assert_eq!(
            handle.wait().await.unwrap(),
            RunOutcome::Session(SessionState::Disconnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_subscribe_ends_in_error() {
        let radio = Arc::new(MockRadio::thermometer());
        let gate = Arc::new(PolicyGate::allow_all().deny(crate::gate::Operation::Subscribe));
        let client = Client::new(
            radio,
            gate,
            TelemetrySink::discard(),
            ClientConfig::default(),
        )
        .unwrap();

        let outcome = client.run(CancellationToken::new()).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Session(SessionState::Error(FailureReason::PermissionDenied(
                crate::gate::Operation::Subscribe
            )))
        );
    }
}
