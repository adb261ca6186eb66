//! GATT client session over a connected device
//!
//! - service: cached ServiceInfo/CharacteristicInfo and discovery filters
//! - channel: per-characteristic fragmenting write queue with readiness flow control
//! - link: per-device discovery state, channels and reads

pub mod channel;
pub mod link;
pub mod service;

pub use channel::{
    DataChannelState, Fragmenter, SendDataChannel, DEFAULT_FALLBACK_WRITE_LENGTH,
    MAX_CHARACTERISTIC_SIZE,
};
pub use link::{
    DataChannelError, Deferred, ErrorHandler, LinkState, NotReadyReason, PendingRead,
    PeripheralLink, ReadErrorHandler, ReadyHandler, ValueHandler,
};
pub use service::{normalize_uuid, CharacteristicInfo, ServiceFilter, ServiceInfo, WriteBehavior};
