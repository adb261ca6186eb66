/// Per-device GATT session: service discovery, data channels, reads
///
/// A link walks NotReady -> Preparing -> Ready. Discovery finishes once every
/// discovered service has resolved its characteristics, successfully or not;
/// each failed service is reported on its own. Methods that would invoke user
/// callbacks return them as [`Deferred`] so the owner can release its lock
/// before running them.

use super::channel::{DataChannelState, SendDataChannel};
use super::service::{normalize_uuid, CharacteristicInfo, ServiceFilter, ServiceInfo};
use crate::adapter::{
    AdapterError, CentralAdapter, DiscoveredCharacteristic, DiscoveredService, PeripheralId,
    WriteType,
};
use crate::availability::UnavailabilityReason;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a data operation cannot run yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReadyReason {
    /// The radio is unusable
    Unavailable(UnavailabilityReason),
    /// The device is not connected
    NotConnected,
    /// Service discovery is still running
    Opening,
    /// Services have not been discovered
    NotDiscovered,
}

impl fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReadyReason::Unavailable(reason) => write!(f, "{}", reason),
            NotReadyReason::NotConnected => write!(f, "peripheral is not connected"),
            NotReadyReason::Opening => write!(f, "service discovery in progress"),
            NotReadyReason::NotDiscovered => write!(f, "services not discovered"),
        }
    }
}

/// Errors for discovery and data operations on a link
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataChannelError {
    #[error("Data channel not ready: {0}")]
    NotReady(NotReadyReason),
    #[error("Characteristic not found: {0}")]
    NotFoundCharacteristic(String),
    #[error("Service discovery failed: {0}")]
    ServiceDiscoveryFailed(AdapterError),
    #[error("Characteristic discovery failed for service {service}: {error}")]
    CharacteristicDiscoveryFailed { service: String, error: AdapterError },
    #[error("Read failed: {0}")]
    ReadFailed(AdapterError),
    #[error("Peripheral disconnected")]
    Disconnected,
    #[error("Operation cancelled")]
    Cancelled,
}

/// Discovery state of a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    NotReady,
    Preparing,
    Ready,
    /// Service discovery itself failed
    Failed(AdapterError),
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::NotReady => write!(f, "NotReady"),
            LinkState::Preparing => write!(f, "Preparing"),
            LinkState::Ready => write!(f, "Ready"),
            LinkState::Failed(error) => write!(f, "Failed({})", error),
        }
    }
}

/// Receives the resolved services once discovery completes
pub type ReadyHandler = Box<dyn FnOnce(BTreeMap<String, ServiceInfo>) + Send>;
/// Receives discovery errors; may be called once per failed service
pub type ErrorHandler = Arc<dyn Fn(DataChannelError) + Send + Sync>;
pub type ValueHandler = Box<dyn FnOnce(Vec<u8>) + Send>;
pub type ReadErrorHandler = Box<dyn FnOnce(DataChannelError) + Send>;

/// An outstanding characteristic read
pub struct PendingRead {
    on_value: ValueHandler,
    on_error: ReadErrorHandler,
}

impl PendingRead {
    pub fn new(on_value: ValueHandler, on_error: ReadErrorHandler) -> Self {
        Self { on_value, on_error }
    }

    pub fn complete(self, value: Vec<u8>) {
        (self.on_value)(value);
    }

    pub fn fail(self, error: DataChannelError) {
        (self.on_error)(error);
    }
}

/// Callbacks collected under a lock, to be run after it is released
#[must_use]
#[derive(Default)]
pub struct Deferred(Vec<Box<dyn FnOnce() + Send>>);

impl Deferred {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.0.push(Box::new(callback));
    }

    pub fn extend(&mut self, other: Deferred) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn run(self) {
        for callback in self.0 {
            callback();
        }
    }
}

/// GATT session with one connected device
pub struct PeripheralLink {
    peripheral: PeripheralId,
    state: LinkState,
    fallback_write_length: usize,
    filters: Vec<ServiceFilter>,
    services: BTreeMap<String, ServiceInfo>,
    characteristics: HashMap<String, CharacteristicInfo>,
    channels: HashMap<String, SendDataChannel>,
    notifying: BTreeSet<String>,
    unresolved: BTreeSet<String>,
    on_ready: Option<ReadyHandler>,
    on_error: Option<ErrorHandler>,
    pending_reads: HashMap<String, VecDeque<PendingRead>>,
}

impl PeripheralLink {
    pub fn new(peripheral: PeripheralId, fallback_write_length: usize) -> Self {
        Self {
            peripheral,
            state: LinkState::NotReady,
            fallback_write_length,
            filters: Vec::new(),
            services: BTreeMap::new(),
            characteristics: HashMap::new(),
            channels: HashMap::new(),
            notifying: BTreeSet::new(),
            unresolved: BTreeSet::new(),
            on_ready: None,
            on_error: None,
            pending_reads: HashMap::new(),
        }
    }

    pub fn peripheral(&self) -> PeripheralId {
        self.peripheral
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    /// Resolved services keyed by normalized UUID
    pub fn services(&self) -> BTreeMap<String, ServiceInfo> {
        self.services.clone()
    }

    pub fn characteristic(&self, uuid: &str) -> Option<&CharacteristicInfo> {
        self.characteristics.get(&normalize_uuid(uuid))
    }

    /// Whether notifications were enabled for `uuid`
    pub fn is_notifying(&self, uuid: &str) -> bool {
        self.notifying.contains(&normalize_uuid(uuid))
    }

    pub fn channel_state(&self, uuid: &str) -> Option<DataChannelState> {
        self.channels
            .get(&normalize_uuid(uuid))
            .map(SendDataChannel::state)
    }

    /// Start service discovery, dropping anything cached from a previous run
    pub fn discover_services(
        &mut self,
        adapter: &dyn CentralAdapter,
        filters: Vec<ServiceFilter>,
        on_ready: ReadyHandler,
        on_error: ErrorHandler,
    ) -> Result<Deferred, DataChannelError> {
        if self.state == LinkState::Preparing {
            return Err(DataChannelError::NotReady(NotReadyReason::Opening));
        }

        let deferred = self.teardown(Some(adapter), DataChannelError::Cancelled);

        let service_uuids = ServiceFilter::service_uuids(&filters);
        self.filters = filters;
        self.on_ready = Some(on_ready);
        self.on_error = Some(on_error);
        self.state = LinkState::Preparing;

        info!("Discovering services on {}", self.peripheral);
        adapter.discover_services(self.peripheral, service_uuids);
        Ok(deferred)
    }

    pub fn on_services_discovered(
        &mut self,
        adapter: &dyn CentralAdapter,
        services: &[DiscoveredService],
    ) -> Deferred {
        if self.state != LinkState::Preparing {
            debug!("Ignoring services of {} outside of discovery", self.peripheral);
            return Deferred::new();
        }

        debug!("{} service(s) discovered on {}", services.len(), self.peripheral);
        for discovered in services {
            let service = ServiceInfo::new(discovered);
            let uuid = service.uuid.clone();
            self.services.insert(uuid.clone(), service);
            self.unresolved.insert(uuid.clone());
            adapter.discover_characteristics(
                self.peripheral,
                &uuid,
                ServiceFilter::characteristic_uuids(&self.filters, &uuid),
            );
        }
        self.finish_if_resolved()
    }

    pub fn on_service_discovery_failed(&mut self, error: AdapterError) -> Deferred {
        let mut deferred = Deferred::new();
        if self.state != LinkState::Preparing {
            return deferred;
        }

        warn!("Service discovery failed on {}: {}", self.peripheral, error);
        self.state = LinkState::Failed(error.clone());
        self.on_ready = None;
        if let Some(on_error) = self.on_error.take() {
            deferred.push(move || on_error(DataChannelError::ServiceDiscoveryFailed(error)));
        }
        deferred
    }

    pub fn on_characteristics_discovered(
        &mut self,
        adapter: &dyn CentralAdapter,
        service: &str,
        characteristics: &[DiscoveredCharacteristic],
    ) -> Deferred {
        let service = normalize_uuid(service);
        if self.state != LinkState::Preparing || !self.unresolved.contains(&service) {
            debug!("Ignoring characteristics of {} on {}", service, self.peripheral);
            return Deferred::new();
        }
        let Some(current) = self.services.get(&service) else {
            return Deferred::new();
        };

        let infos: Vec<CharacteristicInfo> = characteristics
            .iter()
            .map(|discovered| CharacteristicInfo::new(&service, discovered))
            .collect();
        let updated = current.with_characteristics(&infos);
        self.services.insert(service.clone(), updated);

        for info in infos {
            if let Some(channel) =
                SendDataChannel::new(self.peripheral, &info, self.fallback_write_length)
            {
                self.channels.insert(info.uuid.clone(), channel);
            }
            if info.can_notify() {
                adapter.set_notify(self.peripheral, &info.uuid, true);
                self.notifying.insert(info.uuid.clone());
            }
            self.characteristics.insert(info.uuid.clone(), info);
        }

        self.unresolved.remove(&service);
        self.finish_if_resolved()
    }

    pub fn on_characteristic_discovery_failed(
        &mut self,
        service: &str,
        error: AdapterError,
    ) -> Deferred {
        let service = normalize_uuid(service);
        let mut deferred = Deferred::new();
        if self.state != LinkState::Preparing || !self.unresolved.remove(&service) {
            return deferred;
        }

        warn!(
            "Characteristic discovery failed for {} on {}: {}",
            service, self.peripheral, error
        );
        if let Some(on_error) = self.on_error.clone() {
            deferred.push(move || {
                on_error(DataChannelError::CharacteristicDiscoveryFailed { service, error })
            });
        }
        deferred.extend(self.finish_if_resolved());
        deferred
    }

    /// Queue `data` on the channel of `characteristic`
    pub fn send_data(
        &mut self,
        adapter: &dyn CentralAdapter,
        characteristic: &str,
        data: &[u8],
    ) -> Result<(), DataChannelError> {
        self.ensure_ready()?;
        let uuid = normalize_uuid(characteristic);
        let channel = self
            .channels
            .get_mut(&uuid)
            .ok_or(DataChannelError::NotFoundCharacteristic(uuid))?;
        channel.send(adapter, data);
        Ok(())
    }

    /// Readiness signal: every write-without-response channel releases its
    /// next chunk. With-response channels wait for `on_value_written`.
    pub fn on_ready_to_send(&mut self, adapter: &dyn CentralAdapter) {
        for channel in self.channels.values_mut() {
            if channel.write_type() == WriteType::WithoutResponse {
                channel.on_ready(adapter);
            }
        }
    }

    /// A write-with-response was acknowledged
    pub fn on_value_written(
        &mut self,
        adapter: &dyn CentralAdapter,
        characteristic: &str,
        error: Option<AdapterError>,
    ) {
        let uuid = normalize_uuid(characteristic);
        if let Some(error) = error {
            warn!("Write to {} on {} failed: {}", uuid, self.peripheral, error);
        }
        if let Some(channel) = self.channels.get_mut(&uuid) {
            if channel.write_type() == WriteType::WithResponse {
                channel.on_ready(adapter);
            }
        }
    }

    /// Issue a read; the value or error reaches `read` later
    pub fn read_data(
        &mut self,
        adapter: &dyn CentralAdapter,
        characteristic: &str,
        read: PendingRead,
    ) -> Deferred {
        let mut deferred = Deferred::new();
        let uuid = normalize_uuid(characteristic);

        if let Err(error) = self.ensure_ready() {
            deferred.push(move || read.fail(error));
            return deferred;
        }
        if !self.characteristics.contains_key(&uuid) {
            deferred.push(move || read.fail(DataChannelError::NotFoundCharacteristic(uuid)));
            return deferred;
        }

        self.pending_reads
            .entry(uuid.clone())
            .or_default()
            .push_back(read);
        adapter.read_value(self.peripheral, &uuid);
        deferred
    }

    /// A value arrived from a read or a notification. Pending reads complete
    /// even when the value is empty.
    pub fn on_value_updated(&mut self, characteristic: &str, value: &[u8]) -> Deferred {
        let mut deferred = Deferred::new();
        let uuid = normalize_uuid(characteristic);
        if let Some(reads) = self.pending_reads.remove(&uuid) {
            for read in reads {
                let value = value.to_vec();
                deferred.push(move || read.complete(value));
            }
        }
        deferred
    }

    pub fn on_value_update_failed(&mut self, characteristic: &str, error: AdapterError) -> Deferred {
        let mut deferred = Deferred::new();
        let uuid = normalize_uuid(characteristic);
        warn!("Value update of {} on {} failed: {}", uuid, self.peripheral, error);
        if let Some(reads) = self.pending_reads.remove(&uuid) {
            for read in reads {
                let error = DataChannelError::ReadFailed(error.clone());
                deferred.push(move || read.fail(error));
            }
        }
        deferred
    }

    /// Drop every cached service. Not allowed while discovery runs.
    pub fn invalidate(&mut self, adapter: &dyn CentralAdapter) -> Result<Deferred, DataChannelError> {
        if self.state == LinkState::Preparing {
            return Err(DataChannelError::NotReady(NotReadyReason::Opening));
        }
        info!("Invalidating services of {}", self.peripheral);
        Ok(self.teardown(Some(adapter), DataChannelError::Cancelled))
    }

    /// The device went away: everything pending fails with `Disconnected`
    pub fn on_disconnected(&mut self) -> Deferred {
        debug!("Tearing down link to {}", self.peripheral);
        self.teardown(None, DataChannelError::Disconnected)
    }

    fn ensure_ready(&self) -> Result<(), DataChannelError> {
        match self.state {
            LinkState::Ready => Ok(()),
            LinkState::Preparing => Err(DataChannelError::NotReady(NotReadyReason::Opening)),
            LinkState::NotReady | LinkState::Failed(_) => {
                Err(DataChannelError::NotReady(NotReadyReason::NotDiscovered))
            }
        }
    }

    fn finish_if_resolved(&mut self) -> Deferred {
        let mut deferred = Deferred::new();
        if !self.unresolved.is_empty() {
            return deferred;
        }

        info!(
            "Link to {} ready with {} service(s)",
            self.peripheral,
            self.services.len()
        );
        self.state = LinkState::Ready;
        self.on_error = None;
        if let Some(on_ready) = self.on_ready.take() {
            let services = self.services.clone();
            deferred.push(move || on_ready(services));
        }
        deferred
    }

    /// Cancel sends, unsubscribe (when `adapter` is given) and clear caches
    fn clear_caches(&mut self, adapter: Option<&dyn CentralAdapter>) {
        for channel in self.channels.values_mut() {
            channel.cancel_all();
        }
        self.channels.clear();

        let notifying = std::mem::take(&mut self.notifying);
        if let Some(adapter) = adapter {
            for uuid in &notifying {
                adapter.set_notify(self.peripheral, uuid, false);
            }
        }

        self.services.clear();
        self.characteristics.clear();
        self.unresolved.clear();
        self.filters.clear();
    }

    fn teardown(&mut self, adapter: Option<&dyn CentralAdapter>, reason: DataChannelError) -> Deferred {
        self.clear_caches(adapter);
        let mut deferred = Deferred::new();

        for (_, reads) in self.pending_reads.drain() {
            for read in reads {
                let error = reason.clone();
                deferred.push(move || read.fail(error));
            }
        }

        self.on_ready = None;
        if let Some(on_error) = self.on_error.take() {
            if self.state == LinkState::Preparing {
                let error = reason.clone();
                deferred.push(move || on_error(error));
            }
        }
        self.state = LinkState::NotReady;
        deferred
    }
}

impl fmt::Debug for PeripheralLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeripheralLink")
            .field("peripheral", &self.peripheral)
            .field("state", &self.state)
            .field("services", &self.services.len())
            .field("channels", &self.channels.len())
            .finish()
    }
}
