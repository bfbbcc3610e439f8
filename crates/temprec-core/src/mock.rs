//! Scriptable radio for testing.
//!
//! [`MockRadio`] implements [`Radio`] without hardware. It answers each
//! request with the events a real peripheral would produce, records every
//! call for ordering assertions, and lets tests inject events by hand.
//!
//! # Features
//!
//! - **Scripted advertisements**: a list of devices replayed on `start_scan`
//! - **Failure injection**: scan failure, adapter absence, connect status,
//!   discovery status, rejected requests
//! - **Latency simulation**: delay every event to exercise ordering
//! - **Manual mode**: hold back connect or discovery results until the
//!   test releases them

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use temprec_types::{DeviceIdentity, GattProfile};

use crate::error::{Error, Result};
use crate::radio::{
    GattCharacteristic, GattService, LinkEvent, LinkEventSender, LinkHandle, LinkState, Radio,
    ScanEvent, ScanEventSender, status,
};

/// A recorded radio request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioCall {
    StartScan,
    StopScan,
    Connect,
    DiscoverServices,
    EnableNotification,
    WriteDescriptor,
    Disconnect,
}

/// A recorded descriptor write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub characteristic: Uuid,
    pub descriptor: Uuid,
    pub value: Vec<u8>,
}

/// Services exposed by a healthy thermometer for `profile`.
pub fn thermo_services(profile: &GattProfile) -> Vec<GattService> {
    vec![
        GattService::new(uuid::uuid!("00001800-0000-1000-8000-00805f9b34fb")),
        GattService::new(profile.service).with_characteristic(
            GattCharacteristic::new(profile.characteristic).with_descriptor(profile.cccd),
        ),
    ]
}

#[derive(Debug, Clone)]
struct Script {
    advertisements: Vec<(DeviceIdentity, Option<String>)>,
    advertisement_interval: Duration,
    scan_failure: Option<i32>,
    scan_start_error: Option<fn() -> Error>,
    connect_status: Option<i32>,
    connect_error: bool,
    services: Vec<GattService>,
    discovery_status: Option<i32>,
    enable_error: bool,
    write_error: bool,
    latency: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            advertisements: Vec::new(),
            advertisement_interval: Duration::ZERO,
            scan_failure: None,
            scan_start_error: None,
            connect_status: Some(status::SUCCESS),
            connect_error: false,
            services: thermo_services(&GattProfile::default()),
            discovery_status: Some(status::SUCCESS),
            enable_error: false,
            write_error: false,
            latency: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct LinkSlot {
    link: Option<LinkHandle>,
    events: Option<LinkEventSender>,
}

/// A mock radio for testing.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use temprec_core::{Client, ClientConfig, MockRadio, PolicyGate, telemetry_channel};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let radio = Arc::new(MockRadio::thermometer());
///     let (sink, _events) = telemetry_channel();
///     let client = Client::new(radio.clone(), Arc::new(PolicyGate::default()), sink, ClientConfig::default()).unwrap();
///
///     let handle = client.start();
///     radio.wait_for_subscription().await;
///     radio.notify(b"23.5").await;
///     handle.close();
///     handle.wait().await.unwrap();
/// }
/// ```
pub struct MockRadio {
    script: Script,
    calls: RwLock<Vec<RadioCall>>,
    writes: RwLock<Vec<DescriptorWrite>>,
    slot: RwLock<LinkSlot>,
    scanning: AtomicBool,
    scan_task: RwLock<Option<JoinHandle<()>>>,
    subscribed: tokio::sync::Notify,
    notifying: AtomicBool,
    profile: GattProfile,
}

impl std::fmt::Debug for MockRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRadio")
            .field("scanning", &self.scanning.load(Ordering::Relaxed))
            .field("notifying", &self.notifying.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MockRadio {
    /// Create a builder.
    pub fn builder() -> MockRadioBuilder {
        MockRadioBuilder::default()
    }

    /// A radio with one healthy `ESP32-Thermo` in range.
    pub fn thermometer() -> Self {
        Self::builder()
            .advertise(
                DeviceIdentity::new("mock-esp32", "24:0A:C4:00:00:01"),
                Some(crate::config::DEFAULT_DEVICE_NAME),
            )
            .build()
    }

    /// Every request made so far, in order.
    pub async fn calls(&self) -> Vec<RadioCall> {
        self.calls.read().await.clone()
    }

    /// How many times `call` was made.
    pub async fn count(&self, call: RadioCall) -> usize {
        self.calls.read().await.iter().filter(|c| **c == call).count()
    }

    /// Descriptor writes made so far.
    pub async fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        self.writes.read().await.clone()
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// The most recently opened link.
    pub async fn current_link(&self) -> Option<LinkHandle> {
        self.slot.read().await.link
    }

    /// Wait until a CCCD write enabled notifications.
    pub async fn wait_for_subscription(&self) {
        loop {
            let notified = self.subscribed.notified();
            if self.notifying.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    /// Deliver a value on the temperature characteristic of the current link.
    ///
    /// Returns `false` if no link is open.
    pub async fn notify(&self, value: &[u8]) -> bool {
        self.notify_characteristic(self.profile.characteristic, value)
            .await
    }

    /// Deliver a value on any characteristic of the current link.
    pub async fn notify_characteristic(&self, characteristic: Uuid, value: &[u8]) -> bool {
        let slot = self.slot.read().await;
        let (Some(link), Some(events)) = (slot.link, slot.events.as_ref()) else {
            return false;
        };
        events
            .send(LinkEvent::ValueChanged {
                link,
                characteristic,
                value: Bytes::copy_from_slice(value),
            })
            .is_ok()
    }

    /// Drop the current link as if the peripheral went away.
    pub async fn drop_link(&self, code: i32) -> bool {
        let slot = self.slot.read().await;
        let (Some(link), Some(events)) = (slot.link, slot.events.as_ref()) else {
            return false;
        };
        self.notifying.store(false, Ordering::SeqCst);
        events
            .send(LinkEvent::StateChanged {
                link,
                status: code,
                state: LinkState::Disconnected,
            })
            .is_ok()
    }

    /// Release a held-back connect result.
    pub async fn complete_connect(&self, code: i32) -> bool {
        let state = if code == status::SUCCESS {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        };
        let Some(link) = self.current_link().await else {
            return false;
        };
        self.emit_link_event(LinkEvent::StateChanged {
            link,
            status: code,
            state,
        })
        .await
    }

    /// Release a held-back discovery result.
    pub async fn complete_discovery(&self, code: i32) -> bool {
        let Some(link) = self.current_link().await else {
            return false;
        };
        self.emit_link_event(LinkEvent::ServicesDiscovered {
            link,
            status: code,
            services: self.script.services.clone(),
        })
        .await
    }

    /// Send an arbitrary event on the current link's channel.
    pub async fn emit_link_event(&self, event: LinkEvent) -> bool {
        match self.slot.read().await.events.as_ref() {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    async fn record(&self, call: RadioCall) {
        debug!(?call, "mock radio call");
        self.calls.write().await.push(call);
    }

    fn deliver(&self, events: &LinkEventSender, event: LinkEvent) {
        if self.script.latency.is_zero() {
            let _ = events.send(event);
            return;
        }
        let events = events.clone();
        let latency = self.script.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let _ = events.send(event);
        });
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn start_scan(&self, events: ScanEventSender) -> Result<()> {
        if let Some(make_error) = self.script.scan_start_error {
            return Err(make_error());
        }
        self.record(RadioCall::StartScan).await;
        self.scanning.store(true, Ordering::SeqCst);

        if let Some(code) = self.script.scan_failure {
            let _ = events.send(ScanEvent::Failed { status: code });
            return Ok(());
        }

        let delay = self.script.latency + self.script.advertisement_interval;
        if delay.is_zero() {
            for (device, name) in &self.script.advertisements {
                let _ = events.send(ScanEvent::Advertisement {
                    device: device.clone(),
                    name: name.clone(),
                });
            }
            return Ok(());
        }

        let advertisements = self.script.advertisements.clone();
        let task = tokio::spawn(async move {
            for (device, name) in advertisements {
                tokio::time::sleep(delay).await;
                if events
                    .send(ScanEvent::Advertisement { device, name })
                    .is_err()
                {
                    break;
                }
            }
        });
        if let Some(previous) = self.scan_task.write().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(RadioCall::StopScan).await;
        self.scanning.store(false, Ordering::SeqCst);
        if let Some(task) = self.scan_task.write().await.take() {
            task.abort();
        }
        Ok(())
    }

    async fn connect(
        &self,
        device: &DeviceIdentity,
        events: LinkEventSender,
    ) -> Result<LinkHandle> {
        self.record(RadioCall::Connect).await;
        if self.script.connect_error {
            return Err(Error::device_not_found(&device.id));
        }

        let link = LinkHandle::next();
        {
            let mut slot = self.slot.write().await;
            slot.link = Some(link);
            slot.events = Some(events.clone());
        }

        if let Some(code) = self.script.connect_status {
            let state = if code == status::SUCCESS {
                LinkState::Connected
            } else {
                LinkState::Disconnected
            };
            self.deliver(
                &events,
                LinkEvent::StateChanged {
                    link,
                    status: code,
                    state,
                },
            );
        }
        Ok(link)
    }

    async fn discover_services(&self, link: LinkHandle) -> Result<()> {
        self.record(RadioCall::DiscoverServices).await;
        let slot = self.slot.read().await;
        let events = match (slot.link, slot.events.as_ref()) {
            (Some(current), Some(events)) if current == link => events.clone(),
            _ => return Err(Error::UnknownLink(link)),
        };
        drop(slot);

        if let Some(code) = self.script.discovery_status {
            self.deliver(
                &events,
                LinkEvent::ServicesDiscovered {
                    link,
                    status: code,
                    services: self.script.services.clone(),
                },
            );
        }
        Ok(())
    }

    async fn enable_notification(
        &self,
        link: LinkHandle,
        _characteristic: Uuid,
        _enable: bool,
    ) -> Result<()> {
        self.record(RadioCall::EnableNotification).await;
        if self.script.enable_error {
            return Err(Error::radio("enable_notification", "rejected by mock"));
        }
        if self.current_link().await != Some(link) {
            return Err(Error::UnknownLink(link));
        }
        Ok(())
    }

    async fn write_descriptor(
        &self,
        link: LinkHandle,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()> {
        self.record(RadioCall::WriteDescriptor).await;
        if self.script.write_error {
            return Err(Error::radio("write_descriptor", "rejected by mock"));
        }
        if self.current_link().await != Some(link) {
            return Err(Error::UnknownLink(link));
        }

        self.writes.write().await.push(DescriptorWrite {
            characteristic,
            descriptor,
            value: value.to_vec(),
        });
        if descriptor == self.profile.cccd {
            self.notifying
                .store(value.first().is_some_and(|b| *b != 0), Ordering::SeqCst);
            self.subscribed.notify_waiters();
        }
        Ok(())
    }

    async fn disconnect(&self, link: LinkHandle) -> Result<()> {
        self.record(RadioCall::Disconnect).await;
        let mut slot = self.slot.write().await;
        if slot.link != Some(link) {
            return Err(Error::UnknownLink(link));
        }
        self.notifying.store(false, Ordering::SeqCst);
        slot.link = None;
        if let Some(events) = slot.events.take() {
            self.deliver(
                &events,
                LinkEvent::StateChanged {
                    link,
                    status: status::SUCCESS,
                    state: LinkState::Disconnected,
                },
            );
        }
        Ok(())
    }
}

/// Builder for [`MockRadio`].
#[derive(Debug, Default)]
pub struct MockRadioBuilder {
    script: Script,
    profile: GattProfile,
}

impl MockRadioBuilder {
    /// Advertise `device` with `name` when a scan starts.
    #[must_use]
    pub fn advertise(mut self, device: DeviceIdentity, name: Option<&str>) -> Self {
        self.script
            .advertisements
            .push((device, name.map(str::to_string)));
        self
    }

    /// Space advertisements out in time.
    #[must_use]
    pub fn advertisement_interval(mut self, interval: Duration) -> Self {
        self.script.advertisement_interval = interval;
        self
    }

    /// Report a scan failure with `code` right after the scan starts.
    #[must_use]
    pub fn scan_failure(mut self, code: i32) -> Self {
        self.script.scan_failure = Some(code);
        self
    }

    /// Reject `start_scan` as if there were no adapter.
    #[must_use]
    pub fn adapter_unavailable(mut self) -> Self {
        self.script.scan_start_error = Some(|| Error::AdapterUnavailable);
        self
    }

    /// Reject `start_scan` with a generic radio error.
    #[must_use]
    pub fn scan_start_error(mut self) -> Self {
        self.script.scan_start_error = Some(|| Error::radio("start_scan", "rejected by mock"));
        self
    }

    /// Status reported for connect attempts.
    #[must_use]
    pub fn connect_status(mut self, code: i32) -> Self {
        self.script.connect_status = Some(code);
        self
    }

    /// Hold back connect results until [`MockRadio::complete_connect`].
    #[must_use]
    pub fn manual_connect(mut self) -> Self {
        self.script.connect_status = None;
        self
    }

    /// Reject connect requests outright.
    #[must_use]
    pub fn connect_error(mut self) -> Self {
        self.script.connect_error = true;
        self
    }

    /// Services reported by discovery.
    #[must_use]
    pub fn services(mut self, services: Vec<GattService>) -> Self {
        self.script.services = services;
        self
    }

    /// Status reported for discovery.
    #[must_use]
    pub fn discovery_status(mut self, code: i32) -> Self {
        self.script.discovery_status = Some(code);
        self
    }

    /// Hold back discovery results until [`MockRadio::complete_discovery`].
    #[must_use]
    pub fn manual_discovery(mut self) -> Self {
        self.script.discovery_status = None;
        self
    }

    /// Reject `enable_notification`.
    #[must_use]
    pub fn enable_notification_error(mut self) -> Self {
        self.script.enable_error = true;
        self
    }

    /// Reject descriptor writes.
    #[must_use]
    pub fn descriptor_write_error(mut self) -> Self {
        self.script.write_error = true;
        self
    }

    /// Delay every event by `latency`.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.script.latency = latency;
        self
    }

    /// Use a non-default GATT profile.
    #[must_use]
    pub fn profile(mut self, profile: GattProfile) -> Self {
        self.profile = profile;
        self.script.services = thermo_services(&profile);
        self
    }

    /// Build the radio.
    pub fn build(self) -> MockRadio {
        MockRadio {
            script: self.script,
            calls: RwLock::new(Vec::new()),
            writes: RwLock::new(Vec::new()),
            slot: RwLock::new(LinkSlot::default()),
            scanning: AtomicBool::new(false),
            scan_task: RwLock::new(None),
            subscribed: tokio::sync::Notify::new(),
            notifying: AtomicBool::new(false),
            profile: self.profile,
        }
    }
}
