//! In-process dedup store for tests and dry runs

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::DedupStore;
use crate::error::{IngestError, Result};
use crate::models::DedupKey;

/// `HashSet`-backed store with switches for simulating outages
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    keys: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
    fail_marks: AtomicBool,
    mark_calls: AtomicUsize,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with already processed keys.
    pub fn with_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let store = Self::default();
        if let Ok(mut set) = store.keys.lock() {
            set.extend(keys.into_iter().map(Into::into));
        }
        store
    }

    /// Make every call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only `mark_processed` fail, leaving lookups working.
    pub fn set_fail_marks(&self, fail: bool) {
        self.fail_marks.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.lock().map(|set| set.contains(key)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().map(|set| set.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful `mark_processed` calls.
    pub fn mark_calls(&self) -> usize {
        self.mark_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IngestError::StoreUnavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn is_processed(&self, key: &DedupKey) -> Result<bool> {
        self.check_available()?;
        let set = self
            .keys
            .lock()
            .map_err(|_| IngestError::StoreUnavailable("store lock poisoned".to_string()))?;
        Ok(set.contains(key.as_str()))
    }

    async fn mark_processed(&self, key: &DedupKey) -> Result<()> {
        self.check_available()?;
        if self.fail_marks.load(Ordering::SeqCst) {
            return Err(IngestError::StoreUnavailable("write rejected".to_string()));
        }
        let mut set = self
            .keys
            .lock()
            .map_err(|_| IngestError::StoreUnavailable("store lock poisoned".to_string()))?;
        set.insert(key.as_str().to_string());
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
