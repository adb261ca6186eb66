/// Time-boxed discovery engine
///
/// A scan session collects advertisements into a buffer with stable indices:
/// a device seen again replaces its entry in place, a new device is appended.
/// Sessions end on `stop`, or when a fixed-duration timer expires, and always
/// hand the full buffer to the completion handler exactly once.

use crate::adapter::{Advertisement, AdvertisementValue, CentralAdapter, PeripheralId, LOCAL_NAME_KEY};
use crate::availability::UnavailabilityReason;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Default threshold at or below which a fixed-duration scan arms no timer
pub const MIN_SCAN_DURATION: Duration = Duration::from_millis(1);

/// How long a scan session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Until explicitly stopped
    Infinitely,
    /// Until stopped or the duration elapses
    FixedDuration(Duration),
}

/// Predicate applied to every discovery; `false` drops it
pub type DiscoveryPredicate = Arc<dyn Fn(&Discovery) -> bool + Send + Sync>;
/// Receives every buffer change while a session runs. Shared so concurrent
/// discoveries can each call it outside the scanner lock.
pub type ProgressHandler = Arc<dyn Fn(DiscoveryChange) + Send + Sync>;
/// Receives the full buffer when a session ends
pub type CompletionHandler = Box<dyn FnOnce(Vec<Discovery>) + Send>;

/// Scan restrictions
#[derive(Clone, Default)]
pub struct ScanFilter {
    /// Only devices advertising one of these services; empty means any
    pub service_uuids: Vec<String>,
    /// Report repeated advertisements of the same device
    pub allow_duplicates: bool,
    pub custom_filter: Option<DiscoveryPredicate>,
}

impl ScanFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_services<I, S>(mut self, uuids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.service_uuids = uuids.into_iter().map(Into::into).collect();
        self
    }

    pub fn allowing_duplicates(mut self) -> Self {
        self.allow_duplicates = true;
        self
    }

    pub fn with_custom_filter(
        mut self,
        filter: impl Fn(&Discovery) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.custom_filter = Some(Arc::new(filter));
        self
    }
}

impl fmt::Debug for ScanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanFilter")
            .field("service_uuids", &self.service_uuids)
            .field("allow_duplicates", &self.allow_duplicates)
            .field("custom_filter", &self.custom_filter.is_some())
            .finish()
    }
}

/// A device seen during a scan. Two discoveries are equal when they refer to
/// the same device.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub advertisement: Advertisement,
    pub peripheral: PeripheralId,
    pub rssi: i32,
}

impl Discovery {
    /// Advertised local name, if present
    pub fn local_name(&self) -> Option<&str> {
        match self.advertisement.get(LOCAL_NAME_KEY) {
            Some(AdvertisementValue::Text(name)) => Some(name.as_str()),
            _ => None,
        }
    }
}

impl PartialEq for Discovery {
    fn eq(&self, other: &Self) -> bool {
        self.peripheral == other.peripheral
    }
}

impl Eq for Discovery {}

/// A change to the discovery buffer
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryChange {
    /// A known device was seen again; its entry at `index` was replaced
    Updated { discovery: Discovery, index: usize },
    /// A device was seen for the first time and appended
    New(Discovery),
}

impl DiscoveryChange {
    pub fn discovery(&self) -> &Discovery {
        match self {
            DiscoveryChange::Updated { discovery, .. } => discovery,
            DiscoveryChange::New(discovery) => discovery,
        }
    }
}

/// Errors for scan requests
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ScanError {
    #[error("Bluetooth unavailable: {0}")]
    BluetoothUnavailable(UnavailabilityReason),
    #[error("Scan already in progress")]
    Busy,
}

/// Scanner state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScannerState {
    /// Idle, not scanning
    Idle,
    /// Actively scanning
    Scanning,
}

struct ScanSession {
    id: u64,
    filter: ScanFilter,
    discoveries: Vec<Discovery>,
    on_progress: Option<ProgressHandler>,
    on_completion: Option<CompletionHandler>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ScannerInner {
    next_session: u64,
    session: Option<ScanSession>,
}

/// Discovery engine driving the adapter's scan primitives
pub struct Scanner {
    adapter: Arc<dyn CentralAdapter>,
    inner: Arc<Mutex<ScannerInner>>,
    min_duration: Duration,
}

impl Scanner {
    pub fn new(adapter: Arc<dyn CentralAdapter>) -> Self {
        Self::with_min_duration(adapter, MIN_SCAN_DURATION)
    }

    /// Scanner whose fixed-duration sessions arm a timer only above `min_duration`
    pub fn with_min_duration(adapter: Arc<dyn CentralAdapter>, min_duration: Duration) -> Self {
        Self {
            adapter,
            inner: Arc::new(Mutex::new(ScannerInner::default())),
            min_duration,
        }
    }

    /// Begin a scan session.
    ///
    /// Fails without touching any state when a session is already running or
    /// the adapter is not powered on. A fixed-duration session spawns its
    /// timer on the current tokio runtime.
    pub fn start(
        &self,
        mode: ScanMode,
        filter: ScanFilter,
        on_progress: Option<ProgressHandler>,
        on_completion: CompletionHandler,
    ) -> Result<(), ScanError> {
        let mut inner = self.inner.lock();
        if inner.session.is_some() {
            debug!("Scan rejected: already scanning");
            return Err(ScanError::Busy);
        }
        if let Some(reason) = UnavailabilityReason::from_state(self.adapter.state()) {
            debug!("Scan rejected: {}", reason);
            return Err(ScanError::BluetoothUnavailable(reason));
        }

        inner.next_session += 1;
        let id = inner.next_session;

        let timer = match mode {
            ScanMode::FixedDuration(duration) if duration > self.min_duration => {
                Some(self.arm_timer(id, duration))
            }
            _ => None,
        };

        self.adapter
            .start_discovery(&filter.service_uuids, filter.allow_duplicates);
        info!(
            "Scan session {} started ({:?}, {} service filter(s))",
            id,
            mode,
            filter.service_uuids.len()
        );

        inner.session = Some(ScanSession {
            id,
            filter,
            discoveries: Vec::new(),
            on_progress,
            on_completion: Some(on_completion),
            timer,
        });
        Ok(())
    }

    /// End the running session. Returns false when nothing was running.
    pub fn stop(&self) -> bool {
        finish_session(&self.inner, self.adapter.as_ref(), None)
    }

    /// Feed an advertisement into the running session
    pub fn on_discovered(&self, peripheral: PeripheralId, advertisement: Advertisement, rssi: i32) {
        let (session_id, predicate) = {
            let inner = self.inner.lock();
            match &inner.session {
                Some(session) => (session.id, session.filter.custom_filter.clone()),
                None => {
                    trace!("Ignoring discovery of {} while idle", peripheral);
                    return;
                }
            }
        };

        let discovery = Discovery {
            advertisement,
            peripheral,
            rssi,
        };
        if let Some(predicate) = predicate {
            if !predicate(&discovery) {
                trace!("Discovery of {} dropped by custom filter", peripheral);
                return;
            }
        }

        let (change, progress) = {
            let mut inner = self.inner.lock();
            let Some(session) = inner.session.as_mut().filter(|s| s.id == session_id) else {
                return;
            };
            let change = match session
                .discoveries
                .iter()
                .position(|d| d.peripheral == peripheral)
            {
                Some(index) => {
                    session.discoveries[index] = discovery.clone();
                    DiscoveryChange::Updated { discovery, index }
                }
                None => {
                    session.discoveries.push(discovery.clone());
                    DiscoveryChange::New(discovery)
                }
            };
            (change, session.on_progress.clone())
        };

        if let Some(progress) = progress {
            progress(change);
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.lock().session.is_some()
    }

    pub fn state(&self) -> ScannerState {
        if self.is_scanning() {
            ScannerState::Scanning
        } else {
            ScannerState::Idle
        }
    }

    /// Snapshot of the running session's buffer
    pub fn discoveries(&self) -> Vec<Discovery> {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|session| session.discoveries.clone())
            .unwrap_or_default()
    }

    fn arm_timer(&self, session: u64, duration: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let adapter = Arc::clone(&self.adapter);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = inner.upgrade() {
                debug!("Scan session {} reached its duration", session);
                finish_session(&inner, adapter.as_ref(), Some(session));
            }
        })
    }
}

/// Stop discovery and deliver the buffer. With `expected` set, only that
/// session may be ended.
fn finish_session(
    inner: &Mutex<ScannerInner>,
    adapter: &dyn CentralAdapter,
    expected: Option<u64>,
) -> bool {
    let session = {
        let mut guard = inner.lock();
        match (&guard.session, expected) {
            (None, _) => return false,
            (Some(session), Some(id)) if session.id != id => {
                debug!("Ignoring stale timer of scan session {}", id);
                return false;
            }
            _ => {}
        }
        adapter.stop_discovery();
        guard.session.take()
    };

    let Some(mut session) = session else {
        return false;
    };
    if let Some(timer) = session.timer.take() {
        timer.abort();
    }

    info!(
        "Scan session {} finished with {} discovery(ies)",
        session.id,
        session.discoveries.len()
    );
    if let Some(on_completion) = session.on_completion.take() {
        on_completion(std::mem::take(&mut session.discoveries));
    }
    true
}
