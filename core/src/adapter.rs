//! Adapter capability surface and the event bus it feeds
//!
//! The radio driver is a collaborator, not something this crate implements.
//! Platform code implements [`CentralAdapter`] for its stack and forwards the
//! asynchronous callbacks it receives as [`AdapterEvent`]s to the central.
//! All adapter primitives are fire-and-forget: outcomes come back as events.

use crate::availability::AdapterState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Advertisement key for the advertised local name
pub const LOCAL_NAME_KEY: &str = "kCBAdvDataLocalName";
/// Advertisement key for the advertised service UUID list
pub const SERVICE_UUIDS_KEY: &str = "kCBAdvDataServiceUUIDs";
/// Advertisement key for manufacturer specific data
pub const MANUFACTURER_DATA_KEY: &str = "kCBAdvDataManufacturerData";
/// Advertisement key for the advertised TX power level
pub const TX_POWER_KEY: &str = "kCBAdvDataTxPowerLevel";
/// Advertisement key for the connectable flag
pub const IS_CONNECTABLE_KEY: &str = "kCBAdvDataIsConnectable";

/// Identity of a remote device as handed out by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeripheralId(pub Uuid);

impl PeripheralId {
    /// Generate a fresh random identity
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for PeripheralId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A single advertised value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AdvertisementValue {
    Text(String),
    Bytes(Vec<u8>),
    Integer(i64),
    Bool(bool),
    UuidList(Vec<String>),
}

/// Advertised fields keyed by platform advertisement key
pub type Advertisement = BTreeMap<String, AdvertisementValue>;

/// How a characteristic write is acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

/// GATT characteristic property bitset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Error reported by the platform stack
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterError {
    #[error("Platform error {code}: {message}")]
    Platform { code: i32, message: String },
    #[error("Unknown adapter error")]
    Unknown,
}

/// A service as reported by the adapter's service discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredService {
    pub uuid: String,
    pub is_primary: bool,
}

/// A characteristic as reported by the adapter's characteristic discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredCharacteristic {
    pub uuid: String,
    pub properties: CharacteristicProperties,
}

/// Primitives the central issues on the local radio.
///
/// Implementations must not call back into the central synchronously from
/// these methods; results are delivered later as [`AdapterEvent`]s.
#[cfg_attr(test, mockall::automock)]
pub trait CentralAdapter: Send + Sync {
    /// Current power state of the radio
    fn state(&self) -> AdapterState;

    /// Begin discovery, restricted to `service_uuids` when non-empty
    fn start_discovery(&self, service_uuids: &[String], allow_duplicates: bool);

    fn stop_discovery(&self);

    fn connect(&self, peripheral: PeripheralId);

    /// Abort a pending connection attempt
    fn cancel_connection(&self, peripheral: PeripheralId);

    /// Tear down an established link
    fn disconnect(&self, peripheral: PeripheralId);

    /// Discover services; `None` discovers all of them
    fn discover_services(&self, peripheral: PeripheralId, service_uuids: Option<Vec<String>>);

    /// Discover characteristics of `service`; `None` discovers all of them
    fn discover_characteristics(
        &self,
        peripheral: PeripheralId,
        service: &str,
        characteristic_uuids: Option<Vec<String>>,
    );

    fn write_value(
        &self,
        peripheral: PeripheralId,
        characteristic: &str,
        data: &[u8],
        write_type: WriteType,
    );

    fn read_value(&self, peripheral: PeripheralId, characteristic: &str);

    fn set_notify(&self, peripheral: PeripheralId, characteristic: &str, enabled: bool);

    /// Largest payload accepted by a single write of `write_type`
    fn maximum_write_length(&self, peripheral: PeripheralId, write_type: WriteType) -> usize;

    /// Devices among `identifiers` the platform already knows about
    fn retrieve_peripherals(&self, identifiers: &[PeripheralId]) -> Vec<PeripheralId>;

    /// Devices connected to the system (by any app) exposing one of `service_uuids`
    fn retrieve_connected_peripherals(&self, service_uuids: &[String]) -> Vec<PeripheralId>;
}

/// Asynchronous events delivered by the adapter
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    StateChanged(AdapterState),
    Discovered {
        peripheral: PeripheralId,
        advertisement: Advertisement,
        rssi: i32,
    },
    Connected(PeripheralId),
    ConnectFailed {
        peripheral: PeripheralId,
        error: Option<AdapterError>,
    },
    Disconnected {
        peripheral: PeripheralId,
        error: Option<AdapterError>,
    },
    ServicesDiscovered {
        peripheral: PeripheralId,
        services: Vec<DiscoveredService>,
    },
    ServiceDiscoveryFailed {
        peripheral: PeripheralId,
        error: AdapterError,
    },
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: String,
        characteristics: Vec<DiscoveredCharacteristic>,
    },
    CharacteristicDiscoveryFailed {
        peripheral: PeripheralId,
        service: String,
        error: AdapterError,
    },
    ValueUpdated {
        peripheral: PeripheralId,
        characteristic: String,
        value: Vec<u8>,
    },
    ValueUpdateFailed {
        peripheral: PeripheralId,
        characteristic: String,
        error: AdapterError,
    },
    /// The link can take another write-without-response
    ReadyToSend(PeripheralId),
    RssiRead {
        peripheral: PeripheralId,
        rssi: i32,
    },
    ValueWritten {
        peripheral: PeripheralId,
        characteristic: String,
        error: Option<AdapterError>,
    },
    NotificationStateUpdated {
        peripheral: PeripheralId,
        characteristic: String,
        enabled: bool,
        error: Option<AdapterError>,
    },
}

impl fmt::Display for AdapterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterEvent::StateChanged(state) => write!(f, "StateChanged({})", state),
            AdapterEvent::Discovered {
                peripheral, rssi, ..
            } => write!(f, "Discovered {{ peripheral: {}, rssi: {} }}", peripheral, rssi),
            AdapterEvent::Connected(peripheral) => write!(f, "Connected({})", peripheral),
            AdapterEvent::ConnectFailed { peripheral, .. } => {
                write!(f, "ConnectFailed({})", peripheral)
            }
            AdapterEvent::Disconnected { peripheral, .. } => {
                write!(f, "Disconnected({})", peripheral)
            }
            AdapterEvent::ServicesDiscovered {
                peripheral,
                services,
            } => write!(
                f,
                "ServicesDiscovered {{ peripheral: {}, count: {} }}",
                peripheral,
                services.len()
            ),
            AdapterEvent::ServiceDiscoveryFailed { peripheral, error } => {
                write!(f, "ServiceDiscoveryFailed {{ peripheral: {}, error: {} }}", peripheral, error)
            }
            AdapterEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                characteristics,
            } => write!(
                f,
                "CharacteristicsDiscovered {{ peripheral: {}, service: {}, count: {} }}",
                peripheral,
                service,
                characteristics.len()
            ),
            AdapterEvent::CharacteristicDiscoveryFailed {
                peripheral,
                service,
                error,
            } => write!(
                f,
                "CharacteristicDiscoveryFailed {{ peripheral: {}, service: {}, error: {} }}",
                peripheral, service, error
            ),
            AdapterEvent::ValueUpdated {
                peripheral,
                characteristic,
                value,
            } => write!(
                f,
                "ValueUpdated {{ peripheral: {}, characteristic: {}, len: {} }}",
                peripheral,
                characteristic,
                value.len()
            ),
            AdapterEvent::ValueUpdateFailed {
                peripheral,
                characteristic,
                error,
            } => write!(
                f,
                "ValueUpdateFailed {{ peripheral: {}, characteristic: {}, error: {} }}",
                peripheral, characteristic, error
            ),
            AdapterEvent::ReadyToSend(peripheral) => write!(f, "ReadyToSend({})", peripheral),
            AdapterEvent::RssiRead { peripheral, rssi } => {
                write!(f, "RssiRead {{ peripheral: {}, rssi: {} }}", peripheral, rssi)
            }
            AdapterEvent::ValueWritten {
                peripheral,
                characteristic,
                ..
            } => write!(
                f,
                "ValueWritten {{ peripheral: {}, characteristic: {} }}",
                peripheral, characteristic
            ),
            AdapterEvent::NotificationStateUpdated {
                peripheral,
                characteristic,
                enabled,
                ..
            } => write!(
                f,
                "NotificationStateUpdated {{ peripheral: {}, characteristic: {}, enabled: {} }}",
                peripheral, characteristic, enabled
            ),
        }
    }
}
