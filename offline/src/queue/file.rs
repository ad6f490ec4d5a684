//! File-backed request store.
//!
//! All records live in one JSON document under the configured directory:
//!
//! - `requests.json`: array of [`QueuedRequest`], ascending by key
//!
//! Every mutation rewrites the document through a temporary file and a
//! rename, so a crash leaves either the old or the new document intact.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{QueuedRequest, RequestStore};
use crate::error::StorageFault;

/// Name of the record document inside the store directory.
pub const STORE_FILE: &str = "requests.json";

pub struct FileRequestStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles within this process. A blocking
    /// lock: contenders park instead of spinning through disk I/O.
    lock: Mutex<()>,
}

impl FileRequestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    /// Directory holding the record document.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path to `requests.json`.
    pub fn path(&self) -> PathBuf {
        self.dir.join(STORE_FILE)
    }

    /// Take the document lock. A panic in another holder leaves the file
    /// itself consistent, so poisoning is ignored.
    fn locked(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the document. A missing file is an empty store.
    fn read_records(&self) -> Result<BTreeMap<u64, QueuedRequest>, StorageFault> {
        let path = self.path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&path)?;
        let records: Vec<QueuedRequest> =
            serde_json::from_str(&contents).map_err(|source| StorageFault::Corrupt {
                path: path.clone(),
                source,
            })?;
        Ok(records.into_iter().map(|r| (r.timestamp, r)).collect())
    }

    /// Write the document atomically.
    fn write_records(&self, records: &BTreeMap<u64, QueuedRequest>) -> Result<(), StorageFault> {
        fs::create_dir_all(&self.dir)?;
        let tmp_path = self.dir.join(format!("{}.tmp", STORE_FILE));
        let list: Vec<&QueuedRequest> = records.values().collect();
        let json = serde_json::to_string_pretty(&list)?;
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, self.path())?;
        Ok(())
    }
}

#[async_trait]
impl RequestStore for FileRequestStore {
    async fn open(&self) -> Result<(), StorageFault> {
        let _guard = self.locked();
        if self.path().exists() {
            // Validate the existing document.
            self.read_records()?;
            return Ok(());
        }
        self.write_records(&BTreeMap::new())?;
        log::debug!("[KPIO Offline] created request store at {}", self.path().display());
        Ok(())
    }

    async fn add(&self, record: QueuedRequest) -> Result<(), StorageFault> {
        let _guard = self.locked();
        let mut records = self.read_records()?;
        if records.contains_key(&record.timestamp) {
            return Err(StorageFault::AlreadyExists {
                key: record.timestamp,
            });
        }
        records.insert(record.timestamp, record);
        self.write_records(&records)
    }

    async fn get_all(&self) -> Result<Vec<QueuedRequest>, StorageFault> {
        let _guard = self.locked();
        Ok(self.read_records()?.into_values().collect())
    }

    async fn delete(&self, key: u64) -> Result<(), StorageFault> {
        let _guard = self.locked();
        let mut records = self.read_records()?;
        if records.remove(&key).is_some() {
            self.write_records(&records)?;
        }
        Ok(())
    }
}
