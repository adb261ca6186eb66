/// A single outstanding connection attempt
///
/// The attempt owns its timeout timer and both result handlers. Resolving it
/// consumes it, so a handler can never run twice.

use super::pool::ConnectionError;
use crate::adapter::PeripheralId;
use tokio::task::JoinHandle;

/// Called once when the device connects
pub type SuccessHandler = Box<dyn FnOnce(PeripheralId) + Send>;
/// Called once when the attempt fails, times out or is cancelled
pub type FailureHandler = Box<dyn FnOnce(PeripheralId, ConnectionError) + Send>;

pub struct ConnectionAttempt {
    id: u64,
    peripheral: PeripheralId,
    timer: Option<JoinHandle<()>>,
    on_success: SuccessHandler,
    on_failure: FailureHandler,
}

impl ConnectionAttempt {
    pub fn new(
        id: u64,
        peripheral: PeripheralId,
        on_success: SuccessHandler,
        on_failure: FailureHandler,
    ) -> Self {
        Self {
            id,
            peripheral,
            timer: None,
            on_success,
            on_failure,
        }
    }

    /// Unique id distinguishing this attempt from later ones to the same device
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peripheral(&self) -> PeripheralId {
        self.peripheral
    }

    pub(crate) fn set_timer(&mut self, timer: JoinHandle<()>) {
        self.timer = Some(timer);
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    pub fn succeed(mut self) {
        self.cancel_timer();
        (self.on_success)(self.peripheral);
    }

    pub fn fail(mut self, error: ConnectionError) {
        self.cancel_timer();
        (self.on_failure)(self.peripheral, error);
    }
}

impl std::fmt::Debug for ConnectionAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionAttempt")
            .field("id", &self.id)
            .field("peripheral", &self.peripheral)
            .field("timer_armed", &self.timer.is_some())
            .finish()
    }
}
