//! Adapter power state and the availability view derived from it
//!
//! The platform reports a raw `AdapterState`; everything above the adapter
//! only cares whether the radio can be used and, if not, why.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw power/authorization state reported by the local adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterState {
    /// Radio is on and usable
    PoweredOn,
    /// Radio is switched off
    PoweredOff,
    /// Radio stack is restarting
    Resetting,
    /// The application is not allowed to use the radio
    Unauthorized,
    /// This device has no BLE support
    Unsupported,
    /// Transient state right after start-up or reset
    Unknown,
}

impl AdapterState {
    /// True only when the radio can be driven
    pub fn is_powered_on(&self) -> bool {
        matches!(self, AdapterState::PoweredOn)
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoweredOn => write!(f, "PoweredOn"),
            Self::PoweredOff => write!(f, "PoweredOff"),
            Self::Resetting => write!(f, "Resetting"),
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::Unsupported => write!(f, "Unsupported"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Why the radio cannot be used right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnavailabilityReason {
    PoweredOff,
    Resetting,
    Unauthorized,
    Unsupported,
    Unknown,
}

impl UnavailabilityReason {
    /// Classify a raw adapter state. `None` means the adapter is powered on.
    pub fn from_state(state: AdapterState) -> Option<Self> {
        match state {
            AdapterState::PoweredOn => None,
            AdapterState::PoweredOff => Some(Self::PoweredOff),
            AdapterState::Resetting => Some(Self::Resetting),
            AdapterState::Unauthorized => Some(Self::Unauthorized),
            AdapterState::Unsupported => Some(Self::Unsupported),
            AdapterState::Unknown => Some(Self::Unknown),
        }
    }
}

impl fmt::Display for UnavailabilityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoweredOff => write!(f, "bluetooth is powered off"),
            Self::Resetting => write!(f, "bluetooth is resetting"),
            Self::Unauthorized => write!(f, "bluetooth access is not authorized"),
            Self::Unsupported => write!(f, "bluetooth LE is not supported"),
            Self::Unknown => write!(f, "bluetooth state is unknown"),
        }
    }
}

/// Whether the radio is usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Available,
    Unavailable(UnavailabilityReason),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }

    /// The reason the radio is unusable, if it is
    pub fn reason(&self) -> Option<UnavailabilityReason> {
        match self {
            Availability::Available => None,
            Availability::Unavailable(reason) => Some(*reason),
        }
    }
}

impl From<AdapterState> for Availability {
    fn from(state: AdapterState) -> Self {
        match UnavailabilityReason::from_state(state) {
            None => Availability::Available,
            Some(reason) => Availability::Unavailable(reason),
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Available => write!(f, "available"),
            Availability::Unavailable(reason) => write!(f, "unavailable ({})", reason),
        }
    }
}
