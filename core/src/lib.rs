// BlueCentral Core: BLE central session layer
#![allow(clippy::empty_line_after_doc_comments)]
//
// Sits between an application and a platform BLE adapter: availability
// tracking, scanning, connection management, GATT data channels and the
// 16-byte device control frame.

pub mod adapter;
pub mod availability;
pub mod central;
pub mod config;
pub mod connection;
pub mod gatt;
pub mod logging;
pub mod observer;
pub mod protocol;
pub mod scanner;
#[cfg(any(test, feature = "test-support"))]
pub mod simulated;
pub mod state;

pub use adapter::{
    AdapterError, AdapterEvent, Advertisement, AdvertisementValue, CentralAdapter,
    CharacteristicProperties, DiscoveredCharacteristic, DiscoveredService, PeripheralId, WriteType,
};
pub use availability::{AdapterState, Availability, UnavailabilityReason};
pub use central::{CentralManager, DataListener};
pub use config::{CentralSettings, SettingsError};
pub use connection::{ConnectionError, ConnectionPool};
pub use gatt::{
    CharacteristicInfo, DataChannelError, LinkState, NotReadyReason, ServiceFilter, ServiceInfo,
    WriteBehavior,
};
pub use logging::{init_tracing, init_tracing_from_settings, init_tracing_json};
pub use observer::ObserverToken;
pub use protocol::{CommandId, Frame, FrameError, MalformedFrame};
pub use scanner::{Discovery, DiscoveryChange, ScanError, ScanFilter, ScanMode, Scanner};
#[cfg(any(test, feature = "test-support"))]
pub use simulated::{AdapterCall, SimulatedAdapter};
pub use state::{CentralStateMachine, Operation, OperationState, TransitionError};
