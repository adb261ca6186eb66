//! Token-based observer registries
//!
//! Registering hands back an [`ObserverToken`]; the observer stays registered
//! until that token is passed to `remove` or the registry is cleared.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObserverToken(u64);

impl ObserverToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Observers notified in registration order
pub struct ObserverRegistry<T> {
    next_id: AtomicU64,
    observers: Mutex<BTreeMap<ObserverToken, Observer<T>>>,
}

impl<T> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            observers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn add(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> ObserverToken {
        let token = ObserverToken(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().insert(token, Arc::new(observer));
        token
    }

    /// Returns false for an unknown or already removed token
    pub fn remove(&self, token: ObserverToken) -> bool {
        self.observers.lock().remove(&token).is_some()
    }

    pub fn clear(&self) {
        self.observers.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.lock().is_empty()
    }

    /// Call every observer with `value`. Observers may add or remove
    /// registrations while being notified.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Observer<T>> = self.observers.lock().values().cloned().collect();
        for observer in snapshot {
            observer(value);
        }
    }
}

impl<T> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
