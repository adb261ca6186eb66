/// Connection pool: outstanding attempts and connected devices
///
/// Both collections live behind a single lock so that "is this device
/// connected or connecting" is always answered consistently. Whichever path
/// removes an attempt from the map is the one that resolves it; timers are
/// keyed by attempt id so an old timer can never fail a newer attempt.

use super::attempt::{ConnectionAttempt, FailureHandler, SuccessHandler};
use crate::adapter::{AdapterError, CentralAdapter, PeripheralId};
use crate::availability::UnavailabilityReason;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors for connection attempts
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Bluetooth unavailable: {0}")]
    BluetoothUnavailable(UnavailabilityReason),
    #[error("Connection attempt already in progress")]
    Connecting,
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Connection attempt timed out")]
    Timeout,
    #[error("Connection attempt cancelled")]
    Cancelled,
    #[error("Connection failed: {0}")]
    Failed(AdapterError),
}

/// Notified whenever a connected device leaves the connected set
pub type DisconnectHandler = Arc<dyn Fn(PeripheralId) + Send + Sync>;

#[derive(Default)]
struct PoolState {
    next_attempt_id: u64,
    attempts: HashMap<PeripheralId, ConnectionAttempt>,
    connected: Vec<PeripheralId>,
}

/// Tracks in-flight attempts and the connected set
pub struct ConnectionPool {
    adapter: Arc<dyn CentralAdapter>,
    state: Arc<Mutex<PoolState>>,
    on_disconnect: Mutex<Option<DisconnectHandler>>,
}

impl ConnectionPool {
    pub fn new(adapter: Arc<dyn CentralAdapter>) -> Self {
        Self {
            adapter,
            state: Arc::new(Mutex::new(PoolState::default())),
            on_disconnect: Mutex::new(None),
        }
    }

    /// Install the handler told about every device leaving the connected set
    pub fn set_disconnect_handler(&self, handler: DisconnectHandler) {
        *self.on_disconnect.lock() = Some(handler);
    }

    /// Start a time-boxed attempt. Rejections go to `on_failure` right away.
    pub fn connect(
        &self,
        timeout: Duration,
        peripheral: PeripheralId,
        on_success: SuccessHandler,
        on_failure: FailureHandler,
    ) {
        let mut state = self.state.lock();

        let rejection = if state.connected.contains(&peripheral) {
            Some(ConnectionError::AlreadyConnected)
        } else if state.attempts.contains_key(&peripheral) {
            Some(ConnectionError::Connecting)
        } else {
            UnavailabilityReason::from_state(self.adapter.state())
                .map(ConnectionError::BluetoothUnavailable)
        };
        if let Some(error) = rejection {
            drop(state);
            debug!("Connect to {} rejected: {}", peripheral, error);
            on_failure(peripheral, error);
            return;
        }

        state.next_attempt_id += 1;
        let attempt_id = state.next_attempt_id;
        let mut attempt = ConnectionAttempt::new(attempt_id, peripheral, on_success, on_failure);
        attempt.set_timer(self.arm_timer(peripheral, attempt_id, timeout));
        state.attempts.insert(peripheral, attempt);
        drop(state);

        info!(
            "Connecting to {} (attempt {}, timeout {:?})",
            peripheral, attempt_id, timeout
        );
        self.adapter.connect(peripheral);
    }

    pub fn did_connect(&self, peripheral: PeripheralId) {
        let attempt = {
            let mut state = self.state.lock();
            let attempt = state.attempts.remove(&peripheral);
            if attempt.is_some() && !state.connected.contains(&peripheral) {
                state.connected.push(peripheral);
            }
            attempt
        };

        match attempt {
            Some(attempt) => {
                info!("Connected to {}", peripheral);
                attempt.succeed();
            }
            None => debug!("Ignoring connect event for {} without an attempt", peripheral),
        }
    }

    pub fn did_fail_to_connect(&self, peripheral: PeripheralId, error: Option<AdapterError>) {
        let attempt = self.state.lock().attempts.remove(&peripheral);
        let Some(attempt) = attempt else {
            debug!("Ignoring connect failure for {} without an attempt", peripheral);
            return;
        };

        let error = error.unwrap_or(AdapterError::Unknown);
        warn!("Failed to connect to {}: {}", peripheral, error);
        self.adapter.cancel_connection(peripheral);
        attempt.fail(ConnectionError::Failed(error));
    }

    /// Ask the adapter to disconnect. Returns false when not connected; the
    /// device leaves the connected set on `did_disconnect`.
    pub fn disconnect(&self, peripheral: PeripheralId) -> bool {
        if !self.is_connected(peripheral) {
            return false;
        }
        debug!("Disconnecting {}", peripheral);
        self.adapter.disconnect(peripheral);
        true
    }

    /// Remove a device from the connected set. Returns whether it was there.
    pub fn did_disconnect(&self, peripheral: PeripheralId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let before = state.connected.len();
            state.connected.retain(|p| *p != peripheral);
            state.connected.len() != before
        };

        if removed {
            info!("Disconnected from {}", peripheral);
            self.notify_disconnect(peripheral);
        } else {
            debug!("Ignoring disconnect of unknown device {}", peripheral);
        }
        removed
    }

    /// Cancel every attempt and drop every connection.
    ///
    /// Attempts fail with `Cancelled`; every connected device gets a
    /// disconnect notification. Returns the devices that were connected.
    pub fn reset(&self) -> Vec<PeripheralId> {
        let (attempts, connected) = {
            let mut state = self.state.lock();
            let attempts: Vec<ConnectionAttempt> =
                state.attempts.drain().map(|(_, attempt)| attempt).collect();
            (attempts, std::mem::take(&mut state.connected))
        };

        info!(
            "Resetting connection pool ({} attempt(s), {} connection(s))",
            attempts.len(),
            connected.len()
        );
        for attempt in attempts {
            self.adapter.cancel_connection(attempt.peripheral());
            attempt.fail(ConnectionError::Cancelled);
        }
        for peripheral in &connected {
            self.notify_disconnect(*peripheral);
        }
        connected
    }

    /// Connected devices in connection order
    pub fn connected_peripherals(&self) -> Vec<PeripheralId> {
        self.state.lock().connected.clone()
    }

    pub fn is_connected(&self, peripheral: PeripheralId) -> bool {
        self.state.lock().connected.contains(&peripheral)
    }

    pub fn is_connecting(&self, peripheral: PeripheralId) -> bool {
        self.state.lock().attempts.contains_key(&peripheral)
    }

    /// Number of outstanding attempts
    pub fn pending_count(&self) -> usize {
        self.state.lock().attempts.len()
    }

    fn notify_disconnect(&self, peripheral: PeripheralId) {
        let handler = self.on_disconnect.lock().clone();
        if let Some(handler) = handler {
            handler(peripheral);
        }
    }

    fn arm_timer(
        &self,
        peripheral: PeripheralId,
        attempt_id: u64,
        timeout: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let state = Arc::downgrade(&self.state);
        let adapter = Arc::clone(&self.adapter);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(state) = state.upgrade() else {
                return;
            };

            let attempt = {
                let mut state = state.lock();
                let current = state.attempts.get(&peripheral).map(ConnectionAttempt::id);
                if current == Some(attempt_id) {
                    state.attempts.remove(&peripheral)
                } else {
                    None
                }
            };
            if let Some(attempt) = attempt {
                warn!("Connection attempt {} to {} timed out", attempt_id, peripheral);
                adapter.cancel_connection(peripheral);
                attempt.fail(ConnectionError::Timeout);
            }
        })
    }
}
