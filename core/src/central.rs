/// Central facade: one entry point over scanner, pool and per-device links
///
/// Owns the adapter handle and routes every [`AdapterEvent`] to the subsystem
/// it concerns. Subsystems never talk to each other; cross-cutting reactions
/// (radio loss, disconnects) are sequenced here.

use crate::adapter::{AdapterEvent, CentralAdapter, PeripheralId};
use crate::availability::{AdapterState, Availability, UnavailabilityReason};
use crate::config::{CentralSettings, SettingsError};
use crate::connection::{ConnectionError, ConnectionPool};
use crate::gatt::{
    normalize_uuid, DataChannelError, Deferred, LinkState, NotReadyReason, PendingRead,
    PeripheralLink, ServiceFilter, ServiceInfo,
};
use crate::observer::{ObserverRegistry, ObserverToken};
use crate::scanner::{
    CompletionHandler, Discovery, ProgressHandler, ScanError, ScanFilter, ScanMode, Scanner,
};
use crate::state::{CentralStateMachine, Operation, OperationState, TransitionError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Receives every non-empty value pushed by a connected device
pub type DataListener = Arc<dyn Fn(PeripheralId, &str, &[u8]) + Send + Sync>;

type Links = Arc<Mutex<HashMap<PeripheralId, PeripheralLink>>>;

/// BLE central session.
///
/// Must be created inside a tokio runtime: scan and connect timers are
/// spawned tasks.
pub struct CentralManager {
    adapter: Arc<dyn CentralAdapter>,
    settings: CentralSettings,
    state: Arc<Mutex<CentralStateMachine>>,
    scanner: Scanner,
    pool: ConnectionPool,
    links: Links,
    availability_observers: ObserverRegistry<Availability>,
    disconnect_observers: Arc<ObserverRegistry<PeripheralId>>,
    data_listener: Mutex<Option<DataListener>>,
}

impl CentralManager {
    pub fn new(
        adapter: Arc<dyn CentralAdapter>,
        settings: CentralSettings,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;
        Ok(Self::build(adapter, settings))
    }

    pub fn with_default_settings(adapter: Arc<dyn CentralAdapter>) -> Self {
        Self::build(adapter, CentralSettings::default())
    }

    fn build(adapter: Arc<dyn CentralAdapter>, settings: CentralSettings) -> Self {
        let mut machine = CentralStateMachine::new();
        let initial = adapter.state();
        if initial != AdapterState::Unknown {
            machine.validate(availability_operation(initial)).ok();
        }

        let links: Links = Arc::new(Mutex::new(HashMap::new()));
        let disconnect_observers = Arc::new(ObserverRegistry::new());

        let pool = ConnectionPool::new(Arc::clone(&adapter));
        let handler_links = Arc::clone(&links);
        let handler_observers = Arc::clone(&disconnect_observers);
        pool.set_disconnect_handler(Arc::new(move |peripheral: PeripheralId| {
            let link = handler_links.lock().remove(&peripheral);
            if let Some(mut link) = link {
                link.on_disconnected().run();
            }
            handler_observers.notify(&peripheral);
        }));

        info!("Central created, adapter {}", initial);
        Self {
            scanner: Scanner::with_min_duration(Arc::clone(&adapter), settings.min_scan_duration()),
            pool,
            adapter,
            settings,
            state: Arc::new(Mutex::new(machine)),
            links,
            availability_observers: ObserverRegistry::new(),
            disconnect_observers,
            data_listener: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &CentralSettings {
        &self.settings
    }

    // ========================================================================
    // STATE
    // ========================================================================

    pub fn availability(&self) -> Availability {
        Availability::from(self.adapter.state())
    }

    pub fn operation_state(&self) -> OperationState {
        self.state.lock().state()
    }

    // ========================================================================
    // SCANNING
    // ========================================================================

    /// Start a scan session; the completion handler gets the full buffer.
    pub fn start_scan(
        &self,
        mode: ScanMode,
        filter: ScanFilter,
        on_progress: Option<ProgressHandler>,
        on_completion: CompletionHandler,
    ) -> Result<(), ScanError> {
        self.state
            .lock()
            .validate(Operation::Scan)
            .map_err(|err| scan_error(&err))?;

        let state = Arc::clone(&self.state);
        let on_completion: CompletionHandler = Box::new(move |discoveries: Vec<Discovery>| {
            state.lock().validate(Operation::StopScan).ok();
            on_completion(discoveries);
        });

        if let Err(err) = self.scanner.start(mode, filter, on_progress, on_completion) {
            self.state.lock().validate(Operation::StopScan).ok();
            return Err(err);
        }
        Ok(())
    }

    /// Scan for the configured default duration
    pub fn start_default_scan(
        &self,
        filter: ScanFilter,
        on_progress: Option<ProgressHandler>,
        on_completion: CompletionHandler,
    ) -> Result<(), ScanError> {
        self.start_scan(
            ScanMode::FixedDuration(self.settings.scan_duration()),
            filter,
            on_progress,
            on_completion,
        )
    }

    /// End the running scan. Returns false when none was running.
    pub fn stop_scan(&self) -> bool {
        self.scanner.stop()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    // ========================================================================
    // CONNECTIONS
    // ========================================================================

    /// Connect with a timeout. Every outcome, including an immediate
    /// rejection, reaches exactly one of the two handlers.
    pub fn connect(
        &self,
        timeout: Duration,
        peripheral: PeripheralId,
        on_success: impl FnOnce(PeripheralId) + Send + 'static,
        on_failure: impl FnOnce(PeripheralId, ConnectionError) + Send + 'static,
    ) {
        let gate = self.state.lock().validate(Operation::Connect);
        if let Err(err) = gate {
            let reason = match err.current {
                OperationState::Unavailable(reason) => reason,
                _ => UnavailabilityReason::Unknown,
            };
            on_failure(peripheral, ConnectionError::BluetoothUnavailable(reason));
            return;
        }
        self.pool
            .connect(timeout, peripheral, Box::new(on_success), Box::new(on_failure));
    }

    pub fn connect_with_default_timeout(
        &self,
        peripheral: PeripheralId,
        on_success: impl FnOnce(PeripheralId) + Send + 'static,
        on_failure: impl FnOnce(PeripheralId, ConnectionError) + Send + 'static,
    ) {
        self.connect(self.settings.connect_timeout(), peripheral, on_success, on_failure);
    }

    /// Returns false when the device is not connected
    pub fn disconnect(&self, peripheral: PeripheralId) -> bool {
        self.pool.disconnect(peripheral)
    }

    pub fn connected_peripherals(&self) -> Vec<PeripheralId> {
        self.pool.connected_peripherals()
    }

    pub fn is_connected(&self, peripheral: PeripheralId) -> bool {
        self.pool.is_connected(peripheral)
    }

    /// Devices among `identifiers` the platform already knows
    pub fn retrieve_peripherals(&self, identifiers: &[PeripheralId]) -> Vec<PeripheralId> {
        self.adapter.retrieve_peripherals(identifiers)
    }

    pub fn retrieve_peripheral(&self, identifier: PeripheralId) -> Option<PeripheralId> {
        self.retrieve_peripherals(&[identifier]).into_iter().next()
    }

    /// Devices connected to the system, including through other apps, that
    /// expose any of `service_uuids`
    pub fn retrieve_connected_peripherals(&self, service_uuids: &[&str]) -> Vec<PeripheralId> {
        let uuids: Vec<String> = service_uuids.iter().map(|uuid| normalize_uuid(uuid)).collect();
        self.adapter.retrieve_connected_peripherals(&uuids)
    }

    // ========================================================================
    // SERVICES AND DATA
    // ========================================================================

    /// Discover services of a connected device. `on_ready` fires once every
    /// discovered service has resolved; `on_error` may fire once per failed
    /// service.
    pub fn discover_services(
        &self,
        peripheral: PeripheralId,
        filters: Vec<ServiceFilter>,
        on_ready: impl FnOnce(BTreeMap<String, ServiceInfo>) + Send + 'static,
        on_error: impl Fn(DataChannelError) + Send + Sync + 'static,
    ) -> Result<(), DataChannelError> {
        self.ensure_connected(peripheral)?;
        let deferred = {
            let mut links = self.links.lock();
            let fallback = self.settings.fallback_write_length;
            let link = links
                .entry(peripheral)
                .or_insert_with(|| PeripheralLink::new(peripheral, fallback));
            link.discover_services(
                self.adapter.as_ref(),
                filters,
                Box::new(on_ready),
                Arc::new(on_error),
            )?
        };
        deferred.run();
        Ok(())
    }

    /// Queue `data` for the writable characteristic `characteristic`
    pub fn send_data(
        &self,
        peripheral: PeripheralId,
        characteristic: &str,
        data: &[u8],
    ) -> Result<(), DataChannelError> {
        self.ensure_connected(peripheral)?;
        let mut links = self.links.lock();
        let link = links
            .get_mut(&peripheral)
            .ok_or(DataChannelError::NotReady(NotReadyReason::NotDiscovered))?;
        link.send_data(self.adapter.as_ref(), characteristic, data)
    }

    /// Read a characteristic; the value or error reaches one of the handlers
    pub fn read_data(
        &self,
        peripheral: PeripheralId,
        characteristic: &str,
        on_value: impl FnOnce(Vec<u8>) + Send + 'static,
        on_error: impl FnOnce(DataChannelError) + Send + 'static,
    ) {
        let read = PendingRead::new(Box::new(on_value), Box::new(on_error));
        if let Err(err) = self.ensure_connected(peripheral) {
            read.fail(err);
            return;
        }

        let deferred = {
            let mut links = self.links.lock();
            match links.get_mut(&peripheral) {
                Some(link) => link.read_data(self.adapter.as_ref(), characteristic, read),
                None => {
                    let mut deferred = Deferred::new();
                    deferred.push(move || {
                        read.fail(DataChannelError::NotReady(NotReadyReason::NotDiscovered))
                    });
                    deferred
                }
            }
        };
        deferred.run();
    }

    /// Drop the cached services of a device. Fails while discovery runs.
    pub fn invalidate_services(&self, peripheral: PeripheralId) -> Result<(), DataChannelError> {
        let deferred = {
            let mut links = self.links.lock();
            match links.get_mut(&peripheral) {
                Some(link) => link.invalidate(self.adapter.as_ref())?,
                None => return Ok(()),
            }
        };
        deferred.run();
        Ok(())
    }

    /// Resolved services of a device; empty when none are cached
    pub fn services(&self, peripheral: PeripheralId) -> BTreeMap<String, ServiceInfo> {
        self.links
            .lock()
            .get(&peripheral)
            .map(PeripheralLink::services)
            .unwrap_or_default()
    }

    pub fn link_state(&self, peripheral: PeripheralId) -> LinkState {
        self.links
            .lock()
            .get(&peripheral)
            .map(|link| link.state().clone())
            .unwrap_or(LinkState::NotReady)
    }

    pub fn set_data_listener(
        &self,
        listener: impl Fn(PeripheralId, &str, &[u8]) + Send + Sync + 'static,
    ) {
        *self.data_listener.lock() = Some(Arc::new(listener));
    }

    pub fn clear_data_listener(&self) {
        *self.data_listener.lock() = None;
    }

    // ========================================================================
    // OBSERVERS
    // ========================================================================

    pub fn add_availability_observer(
        &self,
        observer: impl Fn(&Availability) + Send + Sync + 'static,
    ) -> ObserverToken {
        self.availability_observers.add(observer)
    }

    pub fn remove_availability_observer(&self, token: ObserverToken) -> bool {
        self.availability_observers.remove(token)
    }

    pub fn remove_all_availability_observers(&self) {
        self.availability_observers.clear();
    }

    pub fn add_disconnect_observer(
        &self,
        observer: impl Fn(&PeripheralId) + Send + Sync + 'static,
    ) -> ObserverToken {
        self.disconnect_observers.add(observer)
    }

    pub fn remove_disconnect_observer(&self, token: ObserverToken) -> bool {
        self.disconnect_observers.remove(token)
    }

    pub fn remove_all_disconnect_observers(&self) {
        self.disconnect_observers.clear();
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    /// Route one adapter event
    pub fn handle_event(&self, event: AdapterEvent) {
        debug!("Adapter event: {}", event);
        match event {
            AdapterEvent::StateChanged(state) => self.on_state_changed(state),
            AdapterEvent::Discovered {
                peripheral,
                advertisement,
                rssi,
            } => self.scanner.on_discovered(peripheral, advertisement, rssi),
            AdapterEvent::Connected(peripheral) => self.pool.did_connect(peripheral),
            AdapterEvent::ConnectFailed { peripheral, error } => {
                self.pool.did_fail_to_connect(peripheral, error)
            }
            AdapterEvent::Disconnected { peripheral, error } => {
                if let Some(error) = error {
                    warn!("{} disconnected with error: {}", peripheral, error);
                }
                self.pool.did_disconnect(peripheral);
            }
            AdapterEvent::ServicesDiscovered {
                peripheral,
                services,
            } => self.with_link(peripheral, |link, adapter| {
                link.on_services_discovered(adapter, &services)
            }),
            AdapterEvent::ServiceDiscoveryFailed { peripheral, error } => {
                self.with_link(peripheral, |link, _| link.on_service_discovery_failed(error))
            }
            AdapterEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                characteristics,
            } => self.with_link(peripheral, |link, adapter| {
                link.on_characteristics_discovered(adapter, &service, &characteristics)
            }),
            AdapterEvent::CharacteristicDiscoveryFailed {
                peripheral,
                service,
                error,
            } => self.with_link(peripheral, |link, _| {
                link.on_characteristic_discovery_failed(&service, error)
            }),
            AdapterEvent::ValueUpdated {
                peripheral,
                characteristic,
                value,
            } => self.on_value_updated(peripheral, &characteristic, &value),
            AdapterEvent::ValueUpdateFailed {
                peripheral,
                characteristic,
                error,
            } => self.with_link(peripheral, |link, _| {
                link.on_value_update_failed(&characteristic, error)
            }),
            AdapterEvent::ReadyToSend(peripheral) => self.with_link(peripheral, |link, adapter| {
                link.on_ready_to_send(adapter);
                Deferred::new()
            }),
            AdapterEvent::RssiRead { peripheral, rssi } => {
                debug!("RSSI of {}: {}", peripheral, rssi)
            }
            AdapterEvent::ValueWritten {
                peripheral,
                characteristic,
                error,
            } => self.with_link(peripheral, |link, adapter| {
                link.on_value_written(adapter, &characteristic, error);
                Deferred::new()
            }),
            AdapterEvent::NotificationStateUpdated {
                peripheral,
                characteristic,
                enabled,
                error,
            } => match error {
                Some(error) => warn!(
                    "Notification update for {} on {} failed: {}",
                    characteristic, peripheral, error
                ),
                None => debug!(
                    "Notifications for {} on {} {}",
                    characteristic,
                    peripheral,
                    if enabled { "enabled" } else { "disabled" }
                ),
            },
        }
    }

    /// Drain `events` into `handle_event` until every sender is dropped
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<AdapterEvent>) {
        info!("Central event loop started");
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        info!("Central event loop stopped: event channel closed");
    }

    fn on_state_changed(&self, state: AdapterState) {
        let availability = Availability::from(state);
        match availability {
            Availability::Available => {
                let mut machine = self.state.lock();
                if matches!(
                    machine.state(),
                    OperationState::Initialized | OperationState::Unavailable(_)
                ) {
                    machine.validate(Operation::SetAvailable).ok();
                }
                info!("Bluetooth available");
            }
            Availability::Unavailable(reason) => {
                warn!("Bluetooth unavailable: {}", reason);
                self.scanner.stop();
                self.state
                    .lock()
                    .validate(Operation::SetUnavailable(reason))
                    .ok();
                self.pool.reset();

                let orphans: Vec<PeripheralLink> =
                    self.links.lock().drain().map(|(_, link)| link).collect();
                for mut link in orphans {
                    link.on_disconnected().run();
                }
            }
        }
        self.availability_observers.notify(&availability);
    }

    fn on_value_updated(&self, peripheral: PeripheralId, characteristic: &str, value: &[u8]) {
        self.with_link(peripheral, |link, _| link.on_value_updated(characteristic, value));

        if value.is_empty() {
            debug!("Empty value for {} on {} not forwarded", characteristic, peripheral);
            return;
        }
        let listener = self.data_listener.lock().clone();
        if let Some(listener) = listener {
            listener(peripheral, characteristic, value);
        }
    }

    fn with_link(
        &self,
        peripheral: PeripheralId,
        f: impl FnOnce(&mut PeripheralLink, &dyn CentralAdapter) -> Deferred,
    ) {
        let deferred = {
            let mut links = self.links.lock();
            match links.get_mut(&peripheral) {
                Some(link) => f(link, self.adapter.as_ref()),
                None => {
                    debug!("No link for {}", peripheral);
                    return;
                }
            }
        };
        deferred.run();
    }

    fn ensure_connected(&self, peripheral: PeripheralId) -> Result<(), DataChannelError> {
        if let Some(reason) = UnavailabilityReason::from_state(self.adapter.state()) {
            return Err(DataChannelError::NotReady(NotReadyReason::Unavailable(reason)));
        }
        if !self.pool.is_connected(peripheral) {
            return Err(DataChannelError::NotReady(NotReadyReason::NotConnected));
        }
        Ok(())
    }
}

fn availability_operation(state: AdapterState) -> Operation {
    match UnavailabilityReason::from_state(state) {
        None => Operation::SetAvailable,
        Some(reason) => Operation::SetUnavailable(reason),
    }
}

fn scan_error(err: &TransitionError) -> ScanError {
    match err.current {
        OperationState::Scanning => ScanError::Busy,
        OperationState::Unavailable(reason) => ScanError::BluetoothUnavailable(reason),
        OperationState::Initialized | OperationState::Available => {
            ScanError::BluetoothUnavailable(UnavailabilityReason::Unknown)
        }
    }
}
