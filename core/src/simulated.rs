//! In-process adapter that records every primitive it is asked to perform
//!
//! Used to drive the central without radio hardware: tests set the power
//! state and link write length, feed [`AdapterEvent`](crate::AdapterEvent)s
//! to the central by hand, and inspect the recorded calls.

use crate::adapter::{CentralAdapter, PeripheralId, WriteType};
use crate::availability::AdapterState;
use crate::gatt::normalize_uuid;
use parking_lot::Mutex;

/// Default single-write payload of a fresh BLE link (ATT MTU 23 minus header)
pub const DEFAULT_SIM_WRITE_LENGTH: usize = 20;

/// A primitive issued on the simulated adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    StartDiscovery {
        service_uuids: Vec<String>,
        allow_duplicates: bool,
    },
    StopDiscovery,
    Connect(PeripheralId),
    CancelConnection(PeripheralId),
    Disconnect(PeripheralId),
    DiscoverServices {
        peripheral: PeripheralId,
        service_uuids: Option<Vec<String>>,
    },
    DiscoverCharacteristics {
        peripheral: PeripheralId,
        service: String,
        characteristic_uuids: Option<Vec<String>>,
    },
    WriteValue {
        peripheral: PeripheralId,
        characteristic: String,
        data: Vec<u8>,
        write_type: WriteType,
    },
    ReadValue {
        peripheral: PeripheralId,
        characteristic: String,
    },
    SetNotify {
        peripheral: PeripheralId,
        characteristic: String,
        enabled: bool,
    },
}

/// Recording adapter with a settable power state
pub struct SimulatedAdapter {
    state: Mutex<AdapterState>,
    write_length: Mutex<usize>,
    calls: Mutex<Vec<AdapterCall>>,
    known: Mutex<Vec<PeripheralId>>,
    system_connected: Mutex<Vec<(PeripheralId, Vec<String>)>>,
}

impl SimulatedAdapter {
    pub fn new(state: AdapterState) -> Self {
        Self {
            state: Mutex::new(state),
            write_length: Mutex::new(DEFAULT_SIM_WRITE_LENGTH),
            calls: Mutex::new(Vec::new()),
            known: Mutex::new(Vec::new()),
            system_connected: Mutex::new(Vec::new()),
        }
    }

    /// A powered-on adapter
    pub fn powered_on() -> Self {
        Self::new(AdapterState::PoweredOn)
    }

    pub fn set_state(&self, state: AdapterState) {
        *self.state.lock() = state;
    }

    pub fn set_maximum_write_length(&self, length: usize) {
        *self.write_length.lock() = length;
    }

    /// Remember `peripheral` as seen by the platform before
    pub fn add_known_peripheral(&self, peripheral: PeripheralId) {
        let mut known = self.known.lock();
        if !known.contains(&peripheral) {
            known.push(peripheral);
        }
    }

    /// Mark `peripheral` as connected to the system with `services`.
    /// System-connected devices are also known.
    pub fn add_system_connected(&self, peripheral: PeripheralId, services: &[&str]) {
        self.add_known_peripheral(peripheral);
        let services = services.iter().map(|uuid| normalize_uuid(uuid)).collect();
        self.system_connected.lock().push((peripheral, services));
    }

    /// Snapshot of every call so far
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().clone()
    }

    /// Drain the recorded calls
    pub fn take_calls(&self) -> Vec<AdapterCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    /// Number of recorded calls matching `predicate`
    pub fn count(&self, predicate: impl Fn(&AdapterCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    /// Payloads written to `characteristic`, in order
    pub fn writes_to(&self, characteristic: &str) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                AdapterCall::WriteValue {
                    characteristic: c,
                    data,
                    ..
                } if c == characteristic => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: AdapterCall) {
        self.calls.lock().push(call);
    }
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::powered_on()
    }
}

impl CentralAdapter for SimulatedAdapter {
    fn state(&self) -> AdapterState {
        *self.state.lock()
    }

    fn start_discovery(&self, service_uuids: &[String], allow_duplicates: bool) {
        self.record(AdapterCall::StartDiscovery {
            service_uuids: service_uuids.to_vec(),
            allow_duplicates,
        });
    }

    fn stop_discovery(&self) {
        self.record(AdapterCall::StopDiscovery);
    }

    fn connect(&self, peripheral: PeripheralId) {
        self.record(AdapterCall::Connect(peripheral));
    }

    fn cancel_connection(&self, peripheral: PeripheralId) {
        self.record(AdapterCall::CancelConnection(peripheral));
    }

    fn disconnect(&self, peripheral: PeripheralId) {
        self.record(AdapterCall::Disconnect(peripheral));
    }

    fn discover_services(&self, peripheral: PeripheralId, service_uuids: Option<Vec<String>>) {
        self.record(AdapterCall::DiscoverServices {
            peripheral,
            service_uuids,
        });
    }

    fn discover_characteristics(
        &self,
        peripheral: PeripheralId,
        service: &str,
        characteristic_uuids: Option<Vec<String>>,
    ) {
        self.record(AdapterCall::DiscoverCharacteristics {
            peripheral,
            service: service.to_string(),
            characteristic_uuids,
        });
    }

    fn write_value(
        &self,
        peripheral: PeripheralId,
        characteristic: &str,
        data: &[u8],
        write_type: WriteType,
    ) {
        self.record(AdapterCall::WriteValue {
            peripheral,
            characteristic: characteristic.to_string(),
            data: data.to_vec(),
            write_type,
        });
    }

    fn read_value(&self, peripheral: PeripheralId, characteristic: &str) {
        self.record(AdapterCall::ReadValue {
            peripheral,
            characteristic: characteristic.to_string(),
        });
    }

    fn set_notify(&self, peripheral: PeripheralId, characteristic: &str, enabled: bool) {
        self.record(AdapterCall::SetNotify {
            peripheral,
            characteristic: characteristic.to_string(),
            enabled,
        });
    }

    fn maximum_write_length(&self, _peripheral: PeripheralId, _write_type: WriteType) -> usize {
        *self.write_length.lock()
    }

    fn retrieve_peripherals(&self, identifiers: &[PeripheralId]) -> Vec<PeripheralId> {
        let known = self.known.lock();
        identifiers
            .iter()
            .filter(|id| known.contains(id))
            .copied()
            .collect()
    }

    fn retrieve_connected_peripherals(&self, service_uuids: &[String]) -> Vec<PeripheralId> {
        let wanted: Vec<String> = service_uuids.iter().map(|uuid| normalize_uuid(uuid)).collect();
        self.system_connected
            .lock()
            .iter()
            .filter(|(_, services)| services.iter().any(|s| wanted.contains(s)))
            .map(|(peripheral, _)| *peripheral)
            .collect()
    }
}
