//! The radio abstraction the scan controller and session drive.
//!
//! A [`Radio`] exposes the handful of BLE central primitives the client
//! needs. Requests are async methods; results that the platform reports
//! asynchronously (advertisements, link state changes, discovery results,
//! characteristic notifications) are delivered as events on an unbounded
//! channel supplied by the caller.
//!
//! Two implementations ship with the crate: [`BtleRadio`](crate::btle::BtleRadio)
//! for real hardware and [`MockRadio`](crate::mock::MockRadio) for tests.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use temprec_types::DeviceIdentity;

use crate::error::Result;

/// Platform status codes carried by link and scan events.
pub mod status {
    /// Operation succeeded.
    pub const SUCCESS: i32 = 0;
    /// Generic GATT failure.
    pub const GATT_FAILURE: i32 = 0x101;
    /// Scan could not start for an internal reason.
    pub const SCAN_FAILED_INTERNAL_ERROR: i32 = 3;
    /// Connection attempt timed out at the link layer.
    pub const CONNECTION_TIMEOUT: i32 = 0x08;
}

/// Opaque handle for one link opened by a radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkHandle(u64);

static NEXT_LINK: AtomicU64 = AtomicU64::new(1);

impl LinkHandle {
    /// Allocate a process-unique handle.
    pub fn next() -> Self {
        Self(NEXT_LINK.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Link-layer state reported in [`LinkEvent::StateChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Events produced while a scan is running.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// An advertisement was seen.
    Advertisement {
        device: DeviceIdentity,
        /// Advertised local name, if any.
        name: Option<String>,
    },
    /// The radio gave up scanning.
    Failed { status: i32 },
}

/// Events produced on an open link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    StateChanged {
        link: LinkHandle,
        status: i32,
        state: LinkState,
    },
    ServicesDiscovered {
        link: LinkHandle,
        status: i32,
        services: Vec<GattService>,
    },
    ValueChanged {
        link: LinkHandle,
        characteristic: Uuid,
        value: Bytes,
    },
}

impl LinkEvent {
    /// The link the event belongs to.
    pub fn link(&self) -> LinkHandle {
        match self {
            LinkEvent::StateChanged { link, .. }
            | LinkEvent::ServicesDiscovered { link, .. }
            | LinkEvent::ValueChanged { link, .. } => *link,
        }
    }
}

/// A discovered GATT service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    /// Create a service with no characteristics.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            characteristics: Vec::new(),
        }
    }

    /// Add a characteristic.
    #[must_use]
    pub fn with_characteristic(mut self, characteristic: GattCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    /// Look up a characteristic by UUID.
    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// A discovered characteristic and the UUIDs of its descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

impl GattCharacteristic {
    /// Create a characteristic with no descriptors.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            descriptors: Vec::new(),
        }
    }

    /// Add a descriptor.
    #[must_use]
    pub fn with_descriptor(mut self, uuid: Uuid) -> Self {
        self.descriptors.push(uuid);
        self
    }

    /// Whether the characteristic carries `descriptor`.
    pub fn has_descriptor(&self, descriptor: Uuid) -> bool {
        self.descriptors.contains(&descriptor)
    }
}

/// Find a service by UUID.
pub fn find_service(services: &[GattService], uuid: Uuid) -> Option<&GattService> {
    services.iter().find(|s| s.uuid == uuid)
}

/// Sender for scan events.
pub type ScanEventSender = mpsc::UnboundedSender<ScanEvent>;

/// Sender for link events.
pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;

/// BLE central primitives.
///
/// Implementations must be safe to share across tasks. Request methods
/// return once the request is accepted; their outcome arrives as events.
/// An `Err` means the request was rejected outright.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Start scanning, delivering advertisements to `events`.
    async fn start_scan(&self, events: ScanEventSender) -> Result<()>;

    /// Stop scanning. Stopping an idle radio is not an error.
    async fn stop_scan(&self) -> Result<()>;

    /// Open a link to `device`.
    ///
    /// The result arrives as [`LinkEvent::StateChanged`] on `events`, which
    /// also receives every later event for the returned link.
    async fn connect(&self, device: &DeviceIdentity, events: LinkEventSender)
    -> Result<LinkHandle>;

    /// Discover services on `link`. Results arrive as
    /// [`LinkEvent::ServicesDiscovered`].
    async fn discover_services(&self, link: LinkHandle) -> Result<()>;

    /// Enable or disable local delivery of notifications for `characteristic`.
    async fn enable_notification(
        &self,
        link: LinkHandle,
        characteristic: Uuid,
        enable: bool,
    ) -> Result<()>;

    /// Write a descriptor of `characteristic`.
    async fn write_descriptor(
        &self,
        link: LinkHandle,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()>;

    /// Close `link`. A [`LinkEvent::StateChanged`] with
    /// [`LinkState::Disconnected`] follows.
    async fn disconnect(&self, link: LinkHandle) -> Result<()>;
}
