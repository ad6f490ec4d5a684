//! Scripted host doubles.
//!
//! In-process implementations of the [`crate::platform`] traits whose
//! behavior is set up front and whose calls are recorded. The engine's own
//! tests use them, and embedders can use them to exercise their wiring
//! without a real host.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use spin::Mutex;

use crate::error::{NetworkFault, PlatformError};
use crate::platform::{Clients, Clock, Connectivity, DeferredSync, Network};
use crate::request::{Method, Request, RequestCache, RequestCredentials, RequestMode, Response};

// ── Network ─────────────────────────────────────────────────

/// A request as the fake network saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub mode: RequestMode,
    pub credentials: RequestCredentials,
    pub cache: RequestCache,
}

/// Scripted [`Network`]. Unscripted URLs answer `404 Not Found`.
#[derive(Default)]
pub struct FakeNetwork {
    routes: Mutex<BTreeMap<String, Result<Response, NetworkFault>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    offline: AtomicBool,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `response`.
    pub fn respond(&self, url: &str, response: Response) {
        self.routes.lock().insert(String::from(url), Ok(response));
    }

    /// Fail every fetch of `url`.
    pub fn fail(&self, url: &str, fault: NetworkFault) {
        self.routes.lock().insert(String::from(url), Err(fault));
    }

    /// While offline every fetch fails with `Unreachable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, mut request: Request) -> Result<Response, NetworkFault> {
        let body = request
            .body
            .buffer()
            .await
            .map_err(|e| NetworkFault::Unreachable(e.to_string()))?;
        self.requests.lock().push(RecordedRequest {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.to_map(),
            body,
            mode: request.mode,
            credentials: request.credentials,
            cache: request.cache,
        });

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkFault::Unreachable(String::from("offline")));
        }

        let scripted = self.routes.lock().get(&request.url).cloned();
        let response = match scripted {
            Some(result) => result?,
            None => Response::new(404),
        };
        if response.url.is_empty() {
            Ok(response.with_url(request.url))
        } else {
            Ok(response)
        }
    }
}

// ── Connectivity ────────────────────────────────────────────

/// Switchable [`Connectivity`].
#[derive(Debug)]
pub struct FakeConnectivity {
    online: AtomicBool,
}

impl FakeConnectivity {
    pub fn online() -> Self {
        Self {
            online: AtomicBool::new(true),
        }
    }

    pub fn offline() -> Self {
        Self {
            online: AtomicBool::new(false),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Connectivity for FakeConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

// ── Deferred sync ───────────────────────────────────────────

/// Recording [`DeferredSync`].
#[derive(Debug, Default)]
pub struct FakeSync {
    supported: bool,
    reject: bool,
    registrations: Mutex<Vec<String>>,
}

impl FakeSync {
    pub fn supported() -> Self {
        Self {
            supported: true,
            ..Self::default()
        }
    }

    pub fn unsupported() -> Self {
        Self::default()
    }

    /// Claims support but rejects every registration.
    pub fn rejecting() -> Self {
        Self {
            supported: true,
            reject: true,
            ..Self::default()
        }
    }

    /// Tags successfully registered, in order.
    pub fn registrations(&self) -> Vec<String> {
        self.registrations.lock().clone()
    }
}

#[async_trait]
impl DeferredSync for FakeSync {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn register(&self, tag: &str) -> Result<(), PlatformError> {
        if !self.supported {
            return Err(PlatformError::Unsupported);
        }
        if self.reject {
            return Err(PlatformError::Rejected(String::from("quota")));
        }
        self.registrations.lock().push(String::from(tag));
        Ok(())
    }
}

// ── Clients ─────────────────────────────────────────────────

/// [`Clients`] with a settable controlled-client count.
#[derive(Debug, Default)]
pub struct FakeClients {
    count: AtomicUsize,
    skip_waiting_calls: AtomicUsize,
    claim_calls: AtomicUsize,
}

impl FakeClients {
    pub fn new(count: usize) -> Self {
        Self {
            count: AtomicUsize::new(count),
            ..Self::default()
        }
    }

    pub fn set_count(&self, count: usize) {
        self.count.store(count, Ordering::SeqCst);
    }

    pub fn skip_waiting_calls(&self) -> usize {
        self.skip_waiting_calls.load(Ordering::SeqCst)
    }

    pub fn claim_calls(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clients for FakeClients {
    async fn controlled_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn skip_waiting(&self) {
        self.skip_waiting_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn claim(&self) {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Clock ───────────────────────────────────────────────────

/// [`Clock`] that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: u64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
