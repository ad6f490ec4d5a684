//! Durable Request Store
//!
//! Requests that cannot reach the network are captured as [`QueuedRequest`]
//! records keyed by their capture timestamp. Records survive process
//! termination and are pruned only after a successful replay.
//!
//! - [`RequestStore`] is the host's record-store contract
//!   (`open` / `add` / `get_all` / `delete`).
//! - [`RequestQueue`] wraps a store with key issuing, body buffering and
//!   deferred-trigger registration.

mod file;
mod memory;

pub use file::{FileRequestStore, STORE_FILE};
pub use memory::MemoryRequestStore;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostics, Stage};
use crate::error::StorageFault;
use crate::platform::{Clock, DeferredSync};
use crate::request::{
    Body, Headers, Method, Request, RequestCache, RequestCredentials, RequestMode,
};

// ── Record ──────────────────────────────────────────────────

/// A captured request awaiting replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Capture time in milliseconds; unique record key.
    pub timestamp: u64,
    pub url: String,
    pub method: Method,
    /// Fully buffered body bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
    /// Flattened headers (lower-cased names, repeated values comma-joined).
    pub headers: BTreeMap<String, String>,
    pub mode: RequestMode,
    pub credentials: RequestCredentials,
}

impl QueuedRequest {
    /// Record key.
    pub fn key(&self) -> u64 {
        self.timestamp
    }

    /// Rebuild a replayable request. Replays never touch HTTP caches.
    pub fn to_request(&self) -> Request {
        let body = match &self.body {
            Some(bytes) => Body::Bytes(bytes.clone()),
            None => Body::Empty,
        };
        Request {
            url: self.url.clone(),
            method: self.method,
            headers: Headers::from_map(&self.headers),
            body,
            mode: self.mode,
            credentials: self.credentials,
            cache: RequestCache::NoStore,
        }
    }
}

// ── Host contract ───────────────────────────────────────────

/// Durable key-value record store provided by the host.
///
/// Implementations must be durable per operation: a completed `add` or
/// `delete` survives process termination.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Create the underlying schema if absent. Idempotent.
    async fn open(&self) -> Result<(), StorageFault>;

    /// Persist a record. Fails with [`StorageFault::AlreadyExists`] if the
    /// key is taken.
    async fn add(&self, record: QueuedRequest) -> Result<(), StorageFault>;

    /// Every stored record, in a stable order for a single read.
    async fn get_all(&self) -> Result<Vec<QueuedRequest>, StorageFault>;

    /// Delete by key. A missing key is not an error.
    async fn delete(&self, key: u64) -> Result<(), StorageFault>;
}

// ── Queue ───────────────────────────────────────────────────

/// Append-only view over a [`RequestStore`].
pub struct RequestQueue {
    store: Arc<dyn RequestStore>,
    sync: Arc<dyn DeferredSync>,
    clock: Arc<dyn Clock>,
    sync_tag: String,
    /// Receives rejected trigger registrations when attached.
    diagnostics: Option<Arc<Diagnostics>>,
    /// Last key issued by this instance.
    last_key: AtomicU64,
}

impl RequestQueue {
    pub fn new(
        store: Arc<dyn RequestStore>,
        sync: Arc<dyn DeferredSync>,
        clock: Arc<dyn Clock>,
        sync_tag: impl Into<String>,
    ) -> Self {
        Self {
            store,
            sync,
            clock,
            sync_tag: sync_tag.into(),
            diagnostics: None,
            last_key: AtomicU64::new(0),
        }
    }

    /// Report rejected trigger registrations to `diagnostics`.
    pub fn with_diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Underlying store handle.
    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    /// Capture `request` as a new record and return its key.
    ///
    /// A streaming body is read to the end first; the request keeps a
    /// buffered copy so it stays usable. On success the deferred retry
    /// trigger is registered when the host supports it.
    pub async fn append(&self, request: &mut Request) -> Result<u64, StorageFault> {
        let body = request.body.buffer().await.map_err(StorageFault::Body)?;
        let key = self.next_key();

        let record = QueuedRequest {
            timestamp: key,
            url: request.url.clone(),
            method: request.method,
            body,
            headers: request.headers.to_map(),
            mode: request.mode,
            credentials: request.credentials,
        };
        self.store.add(record).await?;
        log::debug!(
            "[KPIO Offline] queued {} {} (key {})",
            request.method,
            request.url,
            key
        );

        self.register_trigger().await;
        Ok(key)
    }

    /// Every queued record.
    pub async fn list_all(&self) -> Result<Vec<QueuedRequest>, StorageFault> {
        self.store.get_all().await
    }

    /// Remove a record by key; missing keys are ignored.
    pub async fn remove(&self, key: u64) -> Result<(), StorageFault> {
        self.store.delete(key).await
    }

    /// Number of queued records.
    pub async fn len(&self) -> Result<usize, StorageFault> {
        Ok(self.store.get_all().await?.len())
    }

    async fn register_trigger(&self) {
        if !self.sync.is_supported() {
            log::debug!("[KPIO Offline] deferred triggers unsupported; waiting for retry message");
            return;
        }
        let Err(e) = self.sync.register(&self.sync_tag).await else {
            return;
        };
        match &self.diagnostics {
            Some(diagnostics) => diagnostics.report(Stage::SyncRegistration, &e),
            None => log::warn!(
                "[KPIO Offline] failed to register sync tag {}: {}",
                self.sync_tag,
                e
            ),
        }
    }

    /// Strictly increasing key: the clock, bumped past the last issued key.
    fn next_key(&self) -> u64 {
        let now = self.clock.now_millis();
        let mut last = self.last_key.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last_key
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}
