//! Connection session: the lifecycle of one GATT link.
//!
//! A [`Session`] is an explicit state machine driven by [`LinkEvent`]s
//! arriving on a single channel consumed by one task. It connects, waits
//! for the link, discovers services, enables notifications on the
//! temperature characteristic and then forwards every value to the
//! telemetry sink until the link goes down or a step fails.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──connected──▶ ServiceDiscovery
//!                       │                           │ discovered
//!                       ▼                           ▼
//!                     Error ◀──────────── EnablingNotifications
//!                                                   │ CCCD written
//!                                                   ▼
//!                  Disconnected ◀──link down── Streaming ⟲ values
//! ```
//!
//! Each privileged step asks the capability gate again right before the
//! radio call. Events for a stage already left, or for a link other than
//! the current one, are logged and dropped.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use temprec_types::uuid::ENABLE_NOTIFICATION_VALUE;
use temprec_types::{DeviceIdentity, GattProfile, Reading};

use crate::error::{Error, FailureReason, Result};
use crate::events::{TelemetryEvent, TelemetrySink};
use crate::gate::{CapabilityGate, Operation};
use crate::radio::{GattService, LinkEvent, LinkHandle, LinkState, Radio, find_service, status};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    ServiceDiscovery,
    EnablingNotifications,
    Streaming,
    Disconnected,
    Error(FailureReason),
}

impl SessionState {
    /// `Disconnected` and `Error` end the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Error(_))
    }

    /// The failure, for the `Error` state.
    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            SessionState::Error(reason) => Some(reason),
            _ => None,
        }
    }

    /// Whether `next` is reachable from this state in one step.
    ///
    /// States only move forward. The way back to `Idle` is an explicit
    /// reset from a terminal state.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Idle, Connecting | Error(_)) => true,
            (Connecting, ServiceDiscovery | Disconnected | Error(_)) => true,
            (ServiceDiscovery, EnablingNotifications | Disconnected | Error(_)) => true,
            (EnablingNotifications, Streaming | Disconnected | Error(_)) => true,
            (Streaming, Disconnected | Error(_)) => true,
            (Disconnected | Error(_), Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::ServiceDiscovery => write!(f, "service discovery"),
            SessionState::EnablingNotifications => write!(f, "enabling notifications"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// One GATT link to one device.
pub struct Session {
    radio: Arc<dyn Radio>,
    gate: Arc<dyn CapabilityGate>,
    sink: TelemetrySink,
    profile: GattProfile,
    device: DeviceIdentity,
    link: Option<LinkHandle>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    closing: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device)
            .field("link", &self.link)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create an idle session for `device`.
    pub fn new(
        radio: Arc<dyn Radio>,
        gate: Arc<dyn CapabilityGate>,
        sink: TelemetrySink,
        profile: GattProfile,
        device: DeviceIdentity,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            radio,
            gate,
            sink,
            profile,
            device,
            link: None,
            state: SessionState::Idle,
            state_tx,
            events: None,
            closing: false,
        }
    }

    /// Publish state changes on an existing watch channel.
    pub(crate) fn with_state_channel(mut self, state_tx: watch::Sender<SessionState>) -> Self {
        state_tx.send_replace(self.state.clone());
        self.state_tx = state_tx;
        self
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The device this session talks to.
    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    /// The current link, once a connect request was accepted.
    pub fn link(&self) -> Option<LinkHandle> {
        self.link
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Request a link to the device.
    ///
    /// Returns once the request is issued. A refused gate or a rejected
    /// request ends the session in `Error` rather than returning `Err`.
    #[tracing::instrument(level = "info", skip_all, fields(device = %self.device.id))]
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::SessionNotIdle {
                state: self.state.to_string(),
            });
        }

        if !self.gate.authorized(Operation::Connect) {
            self.fail(FailureReason::PermissionDenied(Operation::Connect))
                .await;
            return Ok(());
        }

        self.transition(SessionState::Connecting);
        self.sink.emit(TelemetryEvent::Connecting {
            device: self.device.clone(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(rx);
        match self.radio.connect(&self.device, tx).await {
            Ok(link) => {
                debug!(%link, "Connect request issued");
                self.link = Some(link);
            }
            Err(e) => {
                warn!("Connect request rejected: {}", e);
                self.fail(FailureReason::from_link_error(&e)).await;
            }
        }
        Ok(())
    }

    /// Drive the session until it reaches a terminal state.
    ///
    /// Cancelling `close` closes the link; the resulting disconnect ends the
    /// session. Returns immediately for a session that was never connected.
    pub async fn run(&mut self, close: CancellationToken) -> SessionState {
        loop {
            if self.state.is_terminal() || self.state == SessionState::Idle || self.events.is_none()
            {
                return self.state.clone();
            }

            tokio::select! {
                biased;

                _ = close.cancelled(), if !self.closing => {
                    self.close_link().await;
                }
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Link event channel closed");
                        self.events = None;
                        self.on_disconnected(status::GATT_FAILURE).await;
                    }
                },
            }
        }
    }

    /// Apply one link event.
    pub async fn handle_event(&mut self, event: LinkEvent) {
        if self.state.is_terminal() {
            debug!(state = %self.state, ?event, "Ignoring event after session ended");
            return;
        }
        if Some(event.link()) != self.link {
            debug!(link = %event.link(), "Ignoring event for stale link");
            return;
        }

        match event {
            LinkEvent::StateChanged {
                status,
                state: LinkState::Connected,
                ..
            } => self.on_connected(status).await,
            LinkEvent::StateChanged {
                status,
                state: LinkState::Disconnected,
                ..
            } => self.on_disconnected(status).await,
            LinkEvent::ServicesDiscovered {
                status, services, ..
            } => self.on_services_discovered(status, &services).await,
            LinkEvent::ValueChanged {
                characteristic,
                value,
                ..
            } => self.on_value_changed(characteristic, &value),
        }
    }

    /// Return a terminal session to `Idle` so it can connect again.
    pub fn reset(&mut self) -> Result<()> {
        if !self.state.is_terminal() {
            return Err(Error::SessionRunning {
                state: self.state.to_string(),
            });
        }
        self.transition(SessionState::Idle);
        self.link = None;
        self.events = None;
        self.closing = false;
        Ok(())
    }

    /// Connect and run on a background task.
    pub fn spawn(self) -> SessionHandle {
        self.spawn_with(CancellationToken::new())
    }

    /// Connect and run on a background task, closing when `close` is
    /// cancelled.
    pub fn spawn_with(mut self, close: CancellationToken) -> SessionHandle {
        let state = self.subscribe_state();
        let token = close.clone();
        let task = tokio::spawn(async move {
            if self.state == SessionState::Idle
                && let Err(e) = self.connect().await
            {
                warn!("Session could not connect: {}", e);
            }
            self.run(token).await
        });

        SessionHandle { state, close, task }
    }

    async fn on_connected(&mut self, code: i32) {
        if self.state != SessionState::Connecting {
            debug!(state = %self.state, "Ignoring duplicate connected event");
            return;
        }
        if code != status::SUCCESS {
            self.fail(FailureReason::LinkError(code)).await;
            return;
        }
        if !self.gate.authorized(Operation::Connect) {
            self.fail(FailureReason::PermissionDenied(Operation::Connect))
                .await;
            return;
        }

        self.transition(SessionState::ServiceDiscovery);
        self.sink.emit(TelemetryEvent::DiscoveringServices);

        let Some(link) = self.link else { return };
        if let Err(e) = self.radio.discover_services(link).await {
            warn!("Service discovery request rejected: {}", e);
            self.fail(FailureReason::from_link_error(&e)).await;
        }
    }

    async fn on_disconnected(&mut self, code: i32) {
        if self.state == SessionState::Connecting && !self.closing {
            let code = if code == status::SUCCESS {
                status::GATT_FAILURE
            } else {
                code
            };
            self.fail(FailureReason::LinkError(code)).await;
            return;
        }

        if self.transition(SessionState::Disconnected) {
            self.sink.emit(TelemetryEvent::Disconnected);
        }
    }

    async fn on_services_discovered(&mut self, code: i32, services: &[GattService]) {
        if self.state != SessionState::ServiceDiscovery {
            debug!(state = %self.state, "Ignoring discovery result outside discovery");
            return;
        }
        if code != status::SUCCESS {
            self.fail(FailureReason::LinkError(code)).await;
            return;
        }

        let characteristic = find_service(services, self.profile.service)
            .and_then(|service| service.characteristic(self.profile.characteristic));
        let Some(characteristic) = characteristic else {
            warn!(
                service = %self.profile.service,
                characteristic = %self.profile.characteristic,
                "Target service or characteristic missing"
            );
            self.fail(FailureReason::TargetNotFound).await;
            return;
        };
        let has_cccd = characteristic.has_descriptor(self.profile.cccd);

        self.transition(SessionState::EnablingNotifications);
        self.sink.emit(TelemetryEvent::EnablingNotifications);
        self.enable_notifications(has_cccd).await;
    }

    async fn enable_notifications(&mut self, has_cccd: bool) {
        let Some(link) = self.link else { return };
        let characteristic = self.profile.characteristic;

        if !self.gate.authorized(Operation::Subscribe) {
            self.fail(FailureReason::PermissionDenied(Operation::Subscribe))
                .await;
            return;
        }
        if let Err(e) = self
            .radio
            .enable_notification(link, characteristic, true)
            .await
        {
            warn!("Enabling notifications locally failed: {}", e);
            self.fail(FailureReason::NotificationSetupFailed).await;
            return;
        }

        if !has_cccd {
            warn!(cccd = %self.profile.cccd, "Characteristic has no CCCD");
            self.fail(FailureReason::NotificationSetupFailed).await;
            return;
        }

        if !self.gate.authorized(Operation::Subscribe) {
            self.fail(FailureReason::PermissionDenied(Operation::Subscribe))
                .await;
            return;
        }
        if let Err(e) = self
            .radio
            .write_descriptor(
                link,
                characteristic,
                self.profile.cccd,
                &ENABLE_NOTIFICATION_VALUE,
            )
            .await
        {
            warn!("CCCD write failed: {}", e);
            self.fail(FailureReason::NotificationSetupFailed).await;
            return;
        }

        self.transition(SessionState::Streaming);
    }

    fn on_value_changed(&mut self, characteristic: Uuid, value: &[u8]) {
        if self.state != SessionState::Streaming {
            debug!(state = %self.state, "Ignoring value before streaming");
            return;
        }
        if characteristic != self.profile.characteristic {
            trace!(%characteristic, "Ignoring value for other characteristic");
            return;
        }

        match Reading::from_bytes(value) {
            Ok(reading) => self.sink.emit(TelemetryEvent::Reading { reading }),
            Err(error) => {
                warn!(len = value.len(), "Could not decode value: {}", error);
                self.sink.emit(TelemetryEvent::DecodeFailed { error });
            }
        }
    }

    async fn close_link(&mut self) {
        self.closing = true;
        info!(device = %self.device.id, "Closing link");

        match self.link {
            Some(link) => {
                if let Err(e) = self.radio.disconnect(link).await {
                    warn!("Disconnect request failed: {}", e);
                    self.on_disconnected(status::SUCCESS).await;
                }
            }
            None => self.on_disconnected(status::SUCCESS).await,
        }
    }

    /// Move to `Error(reason)`, report it once and release the link.
    async fn fail(&mut self, reason: FailureReason) {
        if !self.transition(SessionState::Error(reason.clone())) {
            return;
        }
        warn!(device = %self.device.id, "Session failed: {}", reason);
        self.sink.emit(TelemetryEvent::Error { reason });

        if let Some(link) = self.link
            && let Err(e) = self.radio.disconnect(link).await
        {
            debug!("Releasing link after failure: {}", e);
        }
    }

    fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(&next) {
            warn!(from = %self.state, to = %next, "Invalid state transition");
            return false;
        }
        info!(from = %self.state, to = %next, "Session state changed");
        self.state = next;
        self.state_tx.send_replace(self.state.clone());
        true
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<LinkEvent>>) -> Option<LinkEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

/// Handle to a session running on a background task.
#[derive(Debug)]
pub struct SessionHandle {
    state: watch::Receiver<SessionState>,
    close: CancellationToken,
    task: JoinHandle<SessionState>,
}

impl SessionHandle {
    /// Ask the session to close its link. Idempotent.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Latest state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// A receiver for state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Whether the session task finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the terminal state.
    pub async fn wait(self) -> Result<SessionState> {
        self.task.await.map_err(|_| Error::Cancelled)
    }
}
