//! In-memory request store.
//!
//! BTreeMap-backed, ordered by key. Not durable; used by tests and by
//! embedders that run without persistence. Availability can be switched off
//! to exercise the storage-fault paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use spin::RwLock;

use super::{QueuedRequest, RequestStore};
use crate::error::StorageFault;

pub struct MemoryRequestStore {
    /// `None` until the schema is opened (or the first write creates it).
    records: RwLock<Option<BTreeMap<u64, QueuedRequest>>>,
    available: AtomicBool,
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(None),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store becoming (un)available.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether the schema has been created.
    pub fn is_open(&self) -> bool {
        self.records.read().is_some()
    }

    /// Keys currently stored, ascending.
    pub fn keys(&self) -> Vec<u64> {
        self.records
            .read()
            .as_ref()
            .map(|r| r.keys().copied().collect())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), StorageFault> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageFault::Unavailable(String::from("memory store offline")))
        }
    }
}

impl Default for MemoryRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn open(&self) -> Result<(), StorageFault> {
        self.check_available()?;
        self.records.write().get_or_insert_with(BTreeMap::new);
        Ok(())
    }

    async fn add(&self, record: QueuedRequest) -> Result<(), StorageFault> {
        self.check_available()?;
        let mut guard = self.records.write();
        let records = guard.get_or_insert_with(BTreeMap::new);
        if records.contains_key(&record.timestamp) {
            return Err(StorageFault::AlreadyExists {
                key: record.timestamp,
            });
        }
        records.insert(record.timestamp, record);
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<QueuedRequest>, StorageFault> {
        self.check_available()?;
        Ok(self
            .records
            .read()
            .as_ref()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, key: u64) -> Result<(), StorageFault> {
        self.check_available()?;
        if let Some(records) = self.records.write().as_mut() {
            records.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Method, RequestCredentials, RequestMode};
    use futures::executor::block_on;

    fn record(key: u64) -> QueuedRequest {
        QueuedRequest {
            timestamp: key,
            url: format!("/items/{}", key),
            method: Method::Post,
            body: None,
            headers: BTreeMap::new(),
            mode: RequestMode::Cors,
            credentials: RequestCredentials::SameOrigin,
        }
    }

    #[test]
    fn open_creates_schema() {
        let store = MemoryRequestStore::new();
        assert!(!store.is_open());
        block_on(store.open()).unwrap();
        block_on(store.open()).unwrap();
        assert!(store.is_open());
    }

    #[test]
    fn duplicate_key_rejected() {
        let store = MemoryRequestStore::new();
        block_on(store.add(record(1))).unwrap();
        let err = block_on(store.add(record(1))).unwrap_err();
        assert!(matches!(err, StorageFault::AlreadyExists { key: 1 }));
    }

    #[test]
    fn delete_missing_key_is_noop() {
        let store = MemoryRequestStore::new();
        block_on(store.delete(42)).unwrap();
        block_on(store.add(record(1))).unwrap();
        block_on(store.delete(42)).unwrap();
        assert_eq!(store.keys(), vec![1]);
    }

    #[test]
    fn get_all_is_key_ordered() {
        let store = MemoryRequestStore::new();
        for key in [3, 1, 2] {
            block_on(store.add(record(key))).unwrap();
        }
        let keys: Vec<u64> = block_on(store.get_all())
            .unwrap()
            .iter()
            .map(QueuedRequest::key)
            .collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn unavailable_store_faults() {
        let store = MemoryRequestStore::new();
        store.set_available(false);
        assert!(matches!(
            block_on(store.get_all()),
            Err(StorageFault::Unavailable(_))
        ));
        assert!(block_on(store.open()).is_err());
    }
}
