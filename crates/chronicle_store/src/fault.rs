use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Named fault-injection sites, fed from the `failpoints` config list.
/// Shared between the recorder handle and the persistence worker so
/// tests can release a held site while the worker is running.
#[derive(Clone, Default)]
pub(crate) struct Faults(Arc<Mutex<HashSet<String>>>);

impl Faults {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self(Arc::new(Mutex::new(keys.into_iter().collect())))
    }

    pub fn contains(&self, key: &str) -> bool {
        match self.0.lock() {
            Ok(guard) => guard.contains(key),
            Err(_) => false,
        }
    }

    /// One-shot check: returns true at most once per configured key.
    pub fn take(&self, key: &str) -> bool {
        match self.0.lock() {
            Ok(mut guard) => guard.remove(key),
            Err(_) => false,
        }
    }

    pub fn clear(&self, key: &str) {
        if let Ok(mut guard) = self.0.lock() {
            guard.remove(key);
        }
    }
}
