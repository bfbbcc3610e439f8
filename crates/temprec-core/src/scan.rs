//! Bounded, name-filtered discovery scans.
//!
//! A [`Scanner`] runs at most one scan window at a time. Each window
//! resolves to exactly one [`ScanOutcome`]:
//!
//! - [`ScanOutcome::Matched`] on the first advertisement whose name equals
//!   the target exactly (case-sensitive)
//! - [`ScanOutcome::TimedOut`] when the window expires without a match
//! - [`ScanOutcome::Failed`] when the gate denies the scan or the radio
//!   cannot scan
//! - [`ScanOutcome::Stopped`] when the caller stops the window first
//!
//! Stopping is idempotent. A stopped window halts the radio, resolves at
//! once and frees the scanner for the next window. It emits no event.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use temprec_types::DeviceIdentity;

use crate::error::{Error, FailureReason, Result};
use crate::events::{TelemetryEvent, TelemetrySink};
use crate::gate::{CapabilityGate, Operation};
use crate::radio::{Radio, ScanEvent};

/// How a scan window ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// The target advertised.
    Matched(DeviceIdentity),
    /// The window expired with no match.
    TimedOut,
    /// The scan could not run.
    Failed(FailureReason),
    /// The caller stopped the window before it resolved.
    Stopped,
}

impl ScanOutcome {
    /// The matched device, if any.
    pub fn device(&self) -> Option<&DeviceIdentity> {
        match self {
            ScanOutcome::Matched(device) => Some(device),
            _ => None,
        }
    }

    /// The failure this outcome represents, if it is not a match.
    pub fn failure(&self) -> Option<FailureReason> {
        match self {
            ScanOutcome::Matched(_) | ScanOutcome::Stopped => None,
            ScanOutcome::TimedOut => Some(FailureReason::ScanTimedOut),
            ScanOutcome::Failed(reason) => Some(reason.clone()),
        }
    }
}

/// Exact, case-sensitive name comparison. A missing name never matches.
pub fn name_matches(advertised: Option<&str>, target: &str) -> bool {
    advertised == Some(target)
}

/// Timing and match state of one scan window.
///
/// Owned by the task running the window.
#[derive(Debug)]
pub struct ScanWindow {
    started_at: Instant,
    duration: Duration,
    found: bool,
}

impl ScanWindow {
    /// Open a window starting now.
    pub fn open(duration: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            duration,
            found: false,
        }
    }

    /// When the window expires.
    pub fn deadline(&self) -> Instant {
        self.started_at + self.duration
    }

    /// Record the match. Returns `false` if one was already recorded.
    pub fn mark_found(&mut self) -> bool {
        !std::mem::replace(&mut self.found, true)
    }

    /// Whether the window matched.
    pub fn is_found(&self) -> bool {
        self.found
    }
}

#[derive(Debug)]
struct ActiveScan {
    id: u64,
    stop: CancellationToken,
}

/// Handle to a running (or already resolved) scan window.
#[derive(Debug)]
pub struct ScanHandle {
    stop: CancellationToken,
    outcome: oneshot::Receiver<ScanOutcome>,
}

impl ScanHandle {
    fn resolved(outcome: ScanOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self {
            stop: CancellationToken::new(),
            outcome: rx,
        }
    }

    /// Stop the scan. Safe to call any number of times.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// A token that stops the scan when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Wait for the window to resolve.
    pub async fn outcome(self) -> Result<ScanOutcome> {
        self.outcome.await.map_err(|_| Error::Cancelled)
    }
}

/// Runs scan windows against a radio.
#[derive(Clone)]
pub struct Scanner {
    radio: Arc<dyn Radio>,
    gate: Arc<dyn CapabilityGate>,
    sink: TelemetrySink,
    active: Arc<Mutex<Option<ActiveScan>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner").finish_non_exhaustive()
    }
}

impl Scanner {
    /// Create a scanner.
    pub fn new(
        radio: Arc<dyn Radio>,
        gate: Arc<dyn CapabilityGate>,
        sink: TelemetrySink,
    ) -> Self {
        Self {
            radio,
            gate,
            sink,
            active: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Whether a window is currently open.
    pub async fn is_scanning(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Open a scan window looking for `target`.
    ///
    /// Returns [`Error::ScanInProgress`] if a window is already open. Every
    /// other failure resolves the returned handle with
    /// [`ScanOutcome::Failed`] and emits one error event.
    #[tracing::instrument(level = "info", skip_all, fields(target = %target, duration_ms = duration.as_millis() as u64))]
    pub async fn start_scan(&self, target: &str, duration: Duration) -> Result<ScanHandle> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            warn!("Scan requested while a window is open");
            return Err(Error::ScanInProgress);
        }

        if !self.gate.authorized(Operation::Scan) {
            warn!("Scan not authorized");
            let reason = FailureReason::PermissionDenied(Operation::Scan);
            self.sink.emit(TelemetryEvent::Error {
                reason: reason.clone(),
            });
            return Ok(ScanHandle::resolved(ScanOutcome::Failed(reason)));
        }

        self.sink.emit(TelemetryEvent::Scanning {
            target: target.to_string(),
        });

        let window = ScanWindow::open(duration);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.radio.start_scan(events_tx).await {
            warn!("Radio refused to scan: {}", e);
            let reason = FailureReason::from_scan_error(&e);
            self.sink.emit(TelemetryEvent::Error {
                reason: reason.clone(),
            });
            return Ok(ScanHandle::resolved(ScanOutcome::Failed(reason)));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = CancellationToken::new();
        *active = Some(ActiveScan {
            id,
            stop: stop.clone(),
        });
        drop(active);

        info!("Scan window open");

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let scanner = self.clone();
        let target = target.to_string();
        let token = stop.clone();
        tokio::spawn(async move {
            let outcome = scanner.run_window(&target, window, events_rx, token).await;
            match &outcome {
                ScanOutcome::Matched(device) => {
                    scanner.sink.emit(TelemetryEvent::DeviceFound {
                        device: device.clone(),
                    });
                }
                ScanOutcome::TimedOut => {
                    scanner.sink.emit(TelemetryEvent::Error {
                        reason: FailureReason::ScanTimedOut,
                    });
                }
                ScanOutcome::Failed(reason) => {
                    scanner.sink.emit(TelemetryEvent::Error {
                        reason: reason.clone(),
                    });
                }
                ScanOutcome::Stopped => {}
            }

            {
                let mut active = scanner.active.lock().await;
                if active.as_ref().is_some_and(|a| a.id == id) {
                    *active = None;
                }
            }

            let _ = outcome_tx.send(outcome);
        });

        Ok(ScanHandle {
            stop,
            outcome: outcome_rx,
        })
    }

    /// Stop the open window, if any. Idempotent.
    pub async fn stop_scan(&self) {
        match self.active.lock().await.as_ref() {
            Some(active) => active.stop.cancel(),
            None => trace!("stop_scan with no open window"),
        }
    }

    async fn run_window(
        &self,
        target: &str,
        mut window: ScanWindow,
        mut events: mpsc::UnboundedReceiver<ScanEvent>,
        stop: CancellationToken,
    ) -> ScanOutcome {
        let deadline = window.deadline();
        let mut listening = true;

        loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    debug!("Scan stopped before the window closed");
                    self.halt_radio().await;
                    return ScanOutcome::Stopped;
                }
                event = events.recv(), if listening => match event {
                    Some(ScanEvent::Advertisement { device, name }) => {
                        if name_matches(name.as_deref(), target) {
                            if window.mark_found() {
                                info!(device = %device.id, "Found target device");
                            }
                            self.halt_radio().await;
                            return ScanOutcome::Matched(device.with_name(target));
                        }
                        trace!(device = %device.id, name = ?name, "Ignoring advertisement");
                    }
                    Some(ScanEvent::Failed { status }) => {
                        warn!(status, "Radio reported scan failure");
                        return ScanOutcome::Failed(FailureReason::ScanFailed(status));
                    }
                    None => {
                        debug!("Scan event channel closed");
                        listening = false;
                    }
                },
                _ = sleep_until(deadline) => {
                    self.halt_radio().await;
                    debug_assert!(!window.is_found());
                    info!("Scan window expired without a match");
                    return ScanOutcome::TimedOut;
                }
            }
        }
    }

    async fn halt_radio(&self) {
        if let Err(e) = self.radio.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
    }
}
