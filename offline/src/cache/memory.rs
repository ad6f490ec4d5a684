//! In-memory blob cache.
//!
//! Snapshots keep creation order and entries keep insertion order, so
//! `keys()` and `entries()` are deterministic. Storage is bounded by a byte
//! quota; bulk writes check the quota up front and either land completely or
//! not at all.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use spin::RwLock;

use super::{CacheEntry, CacheStorage, MatchOptions};
use crate::error::CacheError;
use crate::request::{Request, Response};

// ── Constants ───────────────────────────────────────────────

/// Default quota across all snapshots (25 MB).
pub const DEFAULT_QUOTA: usize = 25 * 1024 * 1024;

/// Estimated per-entry overhead on top of the body.
const ENTRY_OVERHEAD: usize = 256;

// ── Types ───────────────────────────────────────────────────

/// A named snapshot.
#[derive(Debug, Clone)]
struct Snapshot {
    name: String,
    entries: Vec<CacheEntry>,
}

impl Snapshot {
    fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            entries: Vec::new(),
        }
    }

    /// Insert or replace by URL. Returns the size delta.
    fn put(&mut self, entry: CacheEntry) -> isize {
        let added = entry_size(&entry) as isize;
        match self.entries.iter_mut().find(|e| e.url == entry.url) {
            Some(existing) => {
                let removed = entry_size(existing) as isize;
                *existing = entry;
                added - removed
            }
            None => {
                self.entries.push(entry);
                added
            }
        }
    }

    fn size(&self) -> usize {
        self.entries.iter().map(entry_size).sum()
    }
}

fn entry_size(entry: &CacheEntry) -> usize {
    entry.response.body.len() + ENTRY_OVERHEAD
}

pub struct MemoryCacheStorage {
    snapshots: RwLock<Vec<Snapshot>>,
    quota: usize,
    available: AtomicBool,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA)
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            snapshots: RwLock::new(Vec::new()),
            quota,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the cache host becoming (un)available.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// URLs stored in `name`, in insertion order.
    pub fn urls(&self, name: &str) -> Vec<String> {
        self.snapshots
            .read()
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.entries.iter().map(|e| e.url.clone()).collect())
            .unwrap_or_default()
    }

    /// Bytes used across every snapshot.
    pub fn total_size(&self) -> usize {
        self.snapshots.read().iter().map(Snapshot::size).sum()
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable(String::from("memory cache offline")))
        }
    }

    /// Write `entries` into `name` if the result fits in the quota.
    fn write(&self, name: &str, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        self.check_available()?;
        let mut snapshots = self.snapshots.write();

        // Stage the write on a copy so a quota failure leaves nothing behind.
        let mut staged = snapshots
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .unwrap_or_else(|| Snapshot::new(name));
        let mut delta = 0isize;
        for entry in entries {
            delta += staged.put(entry);
        }

        let used: usize = snapshots.iter().map(Snapshot::size).sum();
        if (used as isize + delta) as usize > self.quota {
            return Err(CacheError::QuotaExceeded);
        }

        match snapshots.iter_mut().find(|s| s.name == name) {
            Some(existing) => *existing = staged,
            None => snapshots.push(staged),
        }
        Ok(())
    }
}

impl Default for MemoryCacheStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.check_available()?;
        Ok(self.snapshots.read().iter().map(|s| s.name.clone()).collect())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        self.check_available()?;
        Ok(self.snapshots.read().iter().any(|s| s.name == name))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        self.check_available()?;
        let mut snapshots = self.snapshots.write();
        let before = snapshots.len();
        snapshots.retain(|s| s.name != name);
        Ok(snapshots.len() != before)
    }

    async fn match_in(
        &self,
        name: &str,
        request: &Request,
        options: MatchOptions,
    ) -> Result<Option<Response>, CacheError> {
        self.check_available()?;
        Ok(self
            .snapshots
            .read()
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.entries.iter().find(|e| e.matches(request, &options)))
            .map(|e| e.response.clone()))
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.write(name, vec![entry])
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        self.write(name, entries)
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, CacheError> {
        self.check_available()?;
        Ok(self
            .snapshots
            .read()
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.entries.clone())
            .unwrap_or_default())
    }
}
