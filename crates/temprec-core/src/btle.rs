//! [`Radio`] implementation on top of btleplug.
//!
//! btleplug exposes blocking-style async calls; this module turns them into
//! the request/event shape the session expects. Connect and discovery run
//! on background tasks with timeouts and report their result as link
//! events. A watcher task per link turns `DeviceDisconnected` central
//! events into [`LinkState::Disconnected`].
//!
//! # Platform notes
//!
//! BlueZ does not allow writing the CCCD directly, so a CCCD write is
//! translated into `subscribe`/`unsubscribe`, which write it on our behalf.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use temprec_types::DeviceIdentity;
use temprec_types::uuid::{CLIENT_CHARACTERISTIC_CONFIG, DISABLE_NOTIFICATION_VALUE};

use crate::config::{ClientConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_DISCOVERY_TIMEOUT};
use crate::error::{Error, Result};
use crate::radio::{
    GattCharacteristic, GattService, LinkEvent, LinkEventSender, LinkHandle, LinkState, Radio,
    ScanEvent, ScanEventSender, status,
};
use crate::util::{display_address, format_peripheral_id};

/// Default timeout for descriptor writes.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeouts applied to btleplug calls.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use temprec_core::btle::ConnectionConfig;
///
/// let config = ConnectionConfig::challenging_environment()
///     .write_timeout(Duration::from_secs(20));
/// assert_eq!(config.connection_timeout, Duration::from_secs(25));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Timeout for establishing a BLE connection.
    pub connection_timeout: Duration,
    /// Timeout for service discovery after connection.
    pub discovery_timeout: Duration,
    /// Timeout for descriptor writes.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Longer timeouts for weak signals or busy RF environments.
    pub fn challenging_environment() -> Self {
        Self {
            connection_timeout: Duration::from_secs(25),
            discovery_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
        }
    }

    /// Shorter timeouts for a device on the desk.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(8),
            discovery_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the descriptor write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

impl From<&ClientConfig> for ConnectionConfig {
    fn from(config: &ClientConfig) -> Self {
        Self::default()
            .connection_timeout(config.connect_timeout)
            .discovery_timeout(config.discovery_timeout)
    }
}

/// Get the first Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().next().ok_or(Error::AdapterUnavailable)
}

struct LinkEntry {
    peripheral: Peripheral,
    events: LinkEventSender,
    tasks: Vec<JoinHandle<()>>,
    notifications: HashMap<Uuid, JoinHandle<()>>,
}

impl LinkEntry {
    fn abort_all(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        for (_, task) in self.notifications.drain() {
            task.abort();
        }
    }
}

/// A radio backed by a btleplug adapter.
pub struct BtleRadio {
    adapter: Adapter,
    config: ConnectionConfig,
    links: Arc<Mutex<HashMap<LinkHandle, LinkEntry>>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BtleRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleRadio")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BtleRadio {
    /// Open the first adapter with default timeouts.
    pub async fn new() -> Result<Self> {
        Self::with_config(ConnectionConfig::default()).await
    }

    /// Open the first adapter with custom timeouts.
    pub async fn with_config(config: ConnectionConfig) -> Result<Self> {
        let adapter = get_adapter().await?;
        if let Ok(info) = adapter.adapter_info().await {
            info!("Using Bluetooth adapter: {}", info);
        }
        Ok(Self::with_adapter(adapter, config))
    }

    /// Wrap an adapter the caller already opened.
    pub fn with_adapter(adapter: Adapter, config: ConnectionConfig) -> Self {
        Self {
            adapter,
            config,
            links: Arc::new(Mutex::new(HashMap::new())),
            scan_task: Mutex::new(None),
        }
    }

    /// The timeouts in use.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn find_peripheral(&self, device: &DeviceIdentity) -> Result<Peripheral> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| format_peripheral_id(&p.id()) == device.id)
            .ok_or_else(|| Error::device_not_found(&device.id))
    }

    async fn peripheral(&self, link: LinkHandle) -> Result<(Peripheral, LinkEventSender)> {
        self.links
            .lock()
            .await
            .get(&link)
            .map(|entry| (entry.peripheral.clone(), entry.events.clone()))
            .ok_or(Error::UnknownLink(link))
    }

    async fn track(&self, link: LinkHandle, task: JoinHandle<()>) {
        match self.links.lock().await.get_mut(&link) {
            Some(entry) => entry.tasks.push(task),
            None => task.abort(),
        }
    }
}

/// Build a scan event from a peripheral's current properties.
async fn advertisement(peripheral: &Peripheral) -> Option<ScanEvent> {
    let properties = peripheral.properties().await.ok()??;
    let id = format_peripheral_id(&peripheral.id());
    let address = display_address(&properties.address.to_string(), &id);

    Some(ScanEvent::Advertisement {
        device: DeviceIdentity::new(id, address),
        name: properties.local_name,
    })
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or_else(|| Error::CharacteristicNotFound {
            uuid: uuid.to_string(),
        })
}

fn map_services(peripheral: &Peripheral) -> Vec<GattService> {
    peripheral
        .services()
        .into_iter()
        .map(|service| GattService {
            uuid: service.uuid,
            characteristics: service
                .characteristics
                .into_iter()
                .map(|c| GattCharacteristic {
                    uuid: c.uuid,
                    descriptors: c.descriptors.into_iter().map(|d| d.uuid).collect(),
                })
                .collect(),
        })
        .collect()
}

#[async_trait]
impl Radio for BtleRadio {
    async fn start_scan(&self, events: ScanEventSender) -> Result<()> {
        let mut central_events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        debug!("BLE scan started");

        let adapter = self.adapter.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                if let Some(event) = advertisement(&peripheral).await
                    && events.send(event).is_err()
                {
                    break;
                }
            }
        });

        if let Some(previous) = self.scan_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let Some(task) = self.scan_task.lock().await.take() else {
            return Ok(());
        };
        task.abort();
        self.adapter.stop_scan().await?;
        debug!("BLE scan stopped");
        Ok(())
    }

    async fn connect(
        &self,
        device: &DeviceIdentity,
        events: LinkEventSender,
    ) -> Result<LinkHandle> {
        let peripheral = self.find_peripheral(device).await?;
        let link = LinkHandle::next();
        let mut tasks = Vec::with_capacity(2);

        let mut central_events = self.adapter.events().await?;
        let peripheral_id = peripheral.id();
        let tx = events.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event
                    && id == peripheral_id
                {
                    let _ = tx.send(LinkEvent::StateChanged {
                        link,
                        status: status::SUCCESS,
                        state: LinkState::Disconnected,
                    });
                    break;
                }
            }
        }));

        let p = peripheral.clone();
        let tx = events.clone();
        let connect_timeout = self.config.connection_timeout;
        tasks.push(tokio::spawn(async move {
            let code = match timeout(connect_timeout, p.connect()).await {
                Ok(Ok(())) => status::SUCCESS,
                Ok(Err(e)) => {
                    warn!("Connection failed: {}", e);
                    status::GATT_FAILURE
                }
                Err(_) => {
                    warn!("Connection timed out after {:?}", connect_timeout);
                    status::CONNECTION_TIMEOUT
                }
            };
            let state = if code == status::SUCCESS {
                LinkState::Connected
            } else {
                LinkState::Disconnected
            };
            let _ = tx.send(LinkEvent::StateChanged {
                link,
                status: code,
                state,
            });
        }));

        self.links.lock().await.insert(
            link,
            LinkEntry {
                peripheral,
                events,
                tasks,
                notifications: HashMap::new(),
            },
        );

        info!(%link, device = %device, "Connecting");
        Ok(link)
    }

    async fn discover_services(&self, link: LinkHandle) -> Result<()> {
        let (peripheral, events) = self.peripheral(link).await?;
        let discovery_timeout = self.config.discovery_timeout;

        let task = tokio::spawn(async move {
            let (code, services) =
                match timeout(discovery_timeout, peripheral.discover_services()).await {
                    Ok(Ok(())) => (status::SUCCESS, map_services(&peripheral)),
                    Ok(Err(e)) => {
                        warn!("Service discovery failed: {}", e);
                        (status::GATT_FAILURE, Vec::new())
                    }
                    Err(_) => {
                        warn!("Service discovery timed out after {:?}", discovery_timeout);
                        (status::GATT_FAILURE, Vec::new())
                    }
                };
            debug!(%link, count = services.len(), "Services discovered");
            let _ = events.send(LinkEvent::ServicesDiscovered {
                link,
                status: code,
                services,
            });
        });

        self.track(link, task).await;
        Ok(())
    }

    async fn enable_notification(
        &self,
        link: LinkHandle,
        characteristic: Uuid,
        enable: bool,
    ) -> Result<()> {
        let (peripheral, events) = self.peripheral(link).await?;

        if !enable {
            if let Some(entry) = self.links.lock().await.get_mut(&link)
                && let Some(task) = entry.notifications.remove(&characteristic)
            {
                task.abort();
            }
            return Ok(());
        }

        let mut stream = peripheral.notifications().await?;
        let task = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                let event = LinkEvent::ValueChanged {
                    link,
                    characteristic,
                    value: Bytes::from(notification.value),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        });

        match self.links.lock().await.get_mut(&link) {
            Some(entry) => {
                if let Some(previous) = entry.notifications.insert(characteristic, task) {
                    previous.abort();
                }
                Ok(())
            }
            None => {
                task.abort();
                Err(Error::UnknownLink(link))
            }
        }
    }

    async fn write_descriptor(
        &self,
        link: LinkHandle,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()> {
        let (peripheral, _) = self.peripheral(link).await?;
        let target = find_characteristic(&peripheral, characteristic)?;
        let write_timeout = self.config.write_timeout;
        let operation = format!("write descriptor {}", descriptor);

        let result = if descriptor == CLIENT_CHARACTERISTIC_CONFIG {
            if value == DISABLE_NOTIFICATION_VALUE {
                timeout(write_timeout, peripheral.unsubscribe(&target)).await
            } else {
                timeout(write_timeout, peripheral.subscribe(&target)).await
            }
        } else {
            let Some(desc) = target.descriptors.iter().find(|d| d.uuid == descriptor) else {
                return Err(Error::radio(
                    operation,
                    format!("descriptor {} not present", descriptor),
                ));
            };
            timeout(write_timeout, peripheral.write_descriptor(desc, value)).await
        };

        result.map_err(|_| Error::timeout(operation, write_timeout))??;
        debug!(%link, %characteristic, %descriptor, "Descriptor written");
        Ok(())
    }

    async fn disconnect(&self, link: LinkHandle) -> Result<()> {
        let mut entry = self
            .links
            .lock()
            .await
            .remove(&link)
            .ok_or(Error::UnknownLink(link))?;
        entry.abort_all();

        info!(%link, "Disconnecting");
        let result = entry.peripheral.disconnect().await;
        let _ = entry.events.send(LinkEvent::StateChanged {
            link,
            status: status::SUCCESS,
            state: LinkState::Disconnected,
        });
        result.map_err(Error::from)
    }
}

impl Drop for BtleRadio {
    fn drop(&mut self) {
        if let Ok(mut task) = self.scan_task.try_lock()
            && let Some(task) = task.take()
        {
            task.abort();
        }

        if let Ok(mut links) = self.links.try_lock()
            && !links.is_empty()
        {
            warn!(
                count = links.len(),
                "Radio dropped with open links - performing best-effort cleanup"
            );
            for (_, mut entry) in links.drain() {
                entry.abort_all();
                let peripheral = entry.peripheral.clone();
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(e) = peripheral.disconnect().await {
                            debug!("Cleanup disconnect failed: {}", e);
                        }
                    });
                }
            }
        }
    }
}
