//! Offline worker façade.
//!
//! Wires every component to one set of host handles and exposes the event
//! entry points the host drives: install, activate, fetch, message, sync.

use std::sync::Arc;

use crate::cache::{CacheStorage, MemoryCacheStorage, SnapshotManager};
use crate::config::OfflineConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{MessageError, OfflineError};
use crate::events::{MessageEvent, SyncEvent};
use crate::interceptor::{FetchInterceptor, Intercepted};
use crate::lifecycle::{LifecycleController, MessageOutcome, WorkerState};
use crate::message::ControlMessage;
use crate::platform::{Clients, Clock, Connectivity, DeferredSync, Network, NoDeferredSync, SystemClock};
use crate::queue::{FileRequestStore, MemoryRequestStore, RequestQueue, RequestStore};
use crate::request::Request;
use crate::retry::{DrainReport, RetryEngine};

/// Host-provided services.
#[derive(Clone)]
pub struct HostServices {
    pub network: Arc<dyn Network>,
    pub connectivity: Arc<dyn Connectivity>,
    pub clients: Arc<dyn Clients>,
    pub sync: Arc<dyn DeferredSync>,
    pub clock: Arc<dyn Clock>,
    pub request_store: Arc<dyn RequestStore>,
    pub cache_storage: Arc<dyn CacheStorage>,
}

impl HostServices {
    /// Host with the three required services and default storage.
    ///
    /// Queued requests go to a [`FileRequestStore`] when `store_dir` is
    /// configured and to memory otherwise. Blobs are kept in memory, there
    /// are no deferred triggers and the clock is the system clock.
    pub fn new(
        config: &OfflineConfig,
        network: Arc<dyn Network>,
        connectivity: Arc<dyn Connectivity>,
        clients: Arc<dyn Clients>,
    ) -> Self {
        let request_store: Arc<dyn RequestStore> = match &config.store_dir {
            Some(dir) => Arc::new(FileRequestStore::new(dir.clone())),
            None => Arc::new(MemoryRequestStore::new()),
        };
        Self {
            network,
            connectivity,
            clients,
            sync: Arc::new(NoDeferredSync),
            clock: Arc::new(SystemClock),
            request_store,
            cache_storage: Arc::new(MemoryCacheStorage::new()),
        }
    }

    pub fn with_sync(mut self, sync: Arc<dyn DeferredSync>) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_request_store(mut self, store: Arc<dyn RequestStore>) -> Self {
        self.request_store = store;
        self
    }

    pub fn with_cache_storage(mut self, storage: Arc<dyn CacheStorage>) -> Self {
        self.cache_storage = storage;
        self
    }
}

pub struct OfflineWorker {
    config: OfflineConfig,
    diagnostics: Arc<Diagnostics>,
    snapshots: Arc<SnapshotManager>,
    queue: Arc<RequestQueue>,
    retry: Arc<RetryEngine>,
    interceptor: FetchInterceptor,
    lifecycle: LifecycleController,
}

impl OfflineWorker {
    pub fn new(config: OfflineConfig, host: HostServices) -> Result<Self, OfflineError> {
        config.validate()?;

        let diagnostics = Arc::new(Diagnostics::default());
        let snapshots = Arc::new(SnapshotManager::new(
            host.cache_storage,
            Arc::clone(&host.network),
            &config,
        ));
        let queue = Arc::new(
            RequestQueue::new(
                host.request_store,
                host.sync,
                host.clock,
                config.sync_tag.clone(),
            )
            .with_diagnostics(Arc::clone(&diagnostics)),
        );
        let retry = Arc::new(RetryEngine::new(
            Arc::clone(&queue),
            Arc::clone(&host.network),
            Arc::clone(&diagnostics),
        ));
        let interceptor = FetchInterceptor::new(
            Arc::clone(&snapshots),
            Arc::clone(&queue),
            host.network,
            host.connectivity,
            &config,
            Arc::clone(&diagnostics),
        );
        let lifecycle = LifecycleController::new(
            &config,
            Arc::clone(&snapshots),
            Arc::clone(&queue),
            Arc::clone(&retry),
            host.clients,
            Arc::clone(&diagnostics),
        );

        log::info!(
            "[KPIO Offline] worker created for snapshot {}",
            snapshots.current_name()
        );
        Ok(Self {
            config,
            diagnostics,
            snapshots,
            queue,
            retry,
            interceptor,
            lifecycle,
        })
    }

    // ── Events ──────────────────────────────────────────────

    pub async fn install(&self) -> Result<WorkerState, OfflineError> {
        self.lifecycle.install().await
    }

    pub async fn activate(&self) -> Result<(), OfflineError> {
        self.lifecycle.activate().await
    }

    pub async fn fetch(&self, request: Request) -> Intercepted {
        self.interceptor.intercept(request).await
    }

    /// Decode and run a posted control message. Malformed or unknown
    /// messages are logged and returned as errors; nothing else happens.
    pub async fn on_message(&self, event: &MessageEvent) -> Result<MessageOutcome, MessageError> {
        let message = match ControlMessage::parse(event.data()) {
            Ok(message) => message,
            Err(e) => {
                log::debug!(
                    "[KPIO Offline] ignoring message from {}: {}",
                    event.source().unwrap_or("unknown client"),
                    e
                );
                return Err(e);
            }
        };
        Ok(self.lifecycle.handle_message(message).await)
    }

    pub fn on_sync(&self, event: &mut SyncEvent) -> bool {
        self.lifecycle.handle_sync(event)
    }

    /// Replay the queue now.
    pub async fn drain(&self) -> DrainReport {
        self.retry.drain().await
    }

    // ── Accessors ───────────────────────────────────────────

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }
}
