//! Versioned Blob Cache Manager
//!
//! Static content lives in named snapshots. The snapshot named after the
//! running build's version tag (`<prefix>-<version>`) is *current*; every
//! other snapshot is *outdated* and is garbage-collected at activation.
//!
//! Between an update's install and its activation the previous worker may
//! still be serving from an outdated snapshot. [`SnapshotManager::migrate_forward`]
//! copies current content into those snapshots so that window serves fresh
//! content.

mod memory;

pub use memory::MemoryCacheStorage;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::config::OfflineConfig;
use crate::error::{CacheError, PopulateFault};
use crate::platform::Network;
use crate::request::{Headers, Method, Request, RequestCache, Response};

// ── Matching ────────────────────────────────────────────────

/// Cache query options
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// Ignore search (query string)
    pub ignore_search: bool,
    /// Ignore method
    pub ignore_method: bool,
    /// Ignore vary header
    pub ignore_vary: bool,
}

impl MatchOptions {
    /// Options used for every lookup the interceptor performs.
    pub const LENIENT: Self = Self {
        ignore_search: true,
        ignore_method: false,
        ignore_vary: true,
    };
}

/// A stored request/response pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Cache key: request URL with query string and fragment removed.
    pub url: String,
    /// Headers of the request that produced the response (for `Vary`).
    pub request_headers: Headers,
    pub response: Response,
}

impl CacheEntry {
    pub fn new(url: &str, request_headers: Headers, response: Response) -> Self {
        Self {
            url: String::from(strip_search(url)),
            request_headers,
            response,
        }
    }

    /// Whether this entry answers `request` under `options`.
    pub fn matches(&self, request: &Request, options: &MatchOptions) -> bool {
        if !options.ignore_method && !matches!(request.method, Method::Get | Method::Head) {
            return false;
        }

        let wanted = if options.ignore_search {
            strip_search(&request.url)
        } else {
            strip_fragment(&request.url)
        };
        if wanted != self.url {
            return false;
        }

        options.ignore_vary || self.vary_matches(&request.headers)
    }

    fn vary_matches(&self, headers: &Headers) -> bool {
        let Some(vary) = self.response.headers.get("vary") else {
            return true;
        };
        vary.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .all(|name| name != "*" && self.request_headers.get(name) == headers.get(name))
    }
}

/// URL without fragment.
fn strip_fragment(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}

/// URL without query string or fragment.
pub fn strip_search(url: &str) -> &str {
    let url = strip_fragment(url);
    url.split('?').next().unwrap_or(url)
}

// ── Host contract ───────────────────────────────────────────

/// Named blob cache provided by the host.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Snapshot names in creation order.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Delete a snapshot. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// First entry of snapshot `name` answering `request`.
    async fn match_in(
        &self,
        name: &str,
        request: &Request,
        options: MatchOptions,
    ) -> Result<Option<Response>, CacheError>;

    /// Store one entry, creating the snapshot if needed and replacing any
    /// entry with the same URL.
    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError>;

    /// Store every entry or none of them.
    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<(), CacheError>;

    /// Every entry of snapshot `name` (empty if it does not exist).
    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, CacheError>;
}

// ── Manager ─────────────────────────────────────────────────

/// Snapshot names classified against the running version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotNames {
    pub current: Option<String>,
    pub outdated: Vec<String>,
}

pub struct SnapshotManager {
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    current_name: String,
}

impl SnapshotManager {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        config: &OfflineConfig,
    ) -> Self {
        Self {
            storage,
            network,
            current_name: config.current_cache_name(),
        }
    }

    /// Name of the snapshot this build installs into.
    pub fn current_name(&self) -> &str {
        &self.current_name
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Fetch every URL from the origin and store all responses in `name`.
    ///
    /// Fetches bypass intermediate caches and run concurrently. A transport
    /// failure or a non-2xx status fails the call before anything is
    /// written. Returns the number of entries stored.
    pub async fn populate(&self, name: &str, urls: &[String]) -> Result<usize, PopulateFault> {
        let fetches = urls.iter().map(|url| {
            let network = Arc::clone(&self.network);
            async move {
                let request = Request::get(url.as_str()).with_cache(RequestCache::Reload);
                let request_headers = request.headers.clone();
                let response = network
                    .fetch(request)
                    .await
                    .map_err(|source| PopulateFault::Fetch {
                        url: url.clone(),
                        source,
                    })?;
                if !response.is_ok() {
                    return Err(PopulateFault::BadStatus {
                        url: url.clone(),
                        status: response.status,
                    });
                }
                Ok(CacheEntry::new(url, request_headers, response))
            }
        });
        let entries = try_join_all(fetches).await?;
        let count = entries.len();

        self.storage.put_all(name, entries).await?;
        log::info!("[KPIO Offline] populated {} with {} entries", name, count);
        Ok(count)
    }

    /// Find a cached response for `request`, ignoring the query string and
    /// `Vary`. The current snapshot is searched first.
    pub async fn lookup(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        let names = self.storage.keys().await?;
        let ordered = names
            .iter()
            .filter(|n| **n == self.current_name)
            .chain(names.iter().filter(|n| **n != self.current_name));

        for name in ordered {
            if let Some(response) = self
                .storage
                .match_in(name, request, MatchOptions::LENIENT)
                .await?
            {
                log::debug!("[KPIO Offline] cache hit for {} in {}", request.url, name);
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Split snapshot names into this build's snapshot and everything else.
    ///
    /// Only the exact `<prefix>-<version>` name is current; a name that merely
    /// contains the tag (`v1` inside `v10`) is outdated like any other.
    pub async fn list_snapshot_names(&self) -> Result<SnapshotNames, CacheError> {
        let mut names = SnapshotNames::default();
        for name in self.storage.keys().await? {
            if name == self.current_name {
                names.current = Some(name);
            } else {
                names.outdated.push(name);
            }
        }
        Ok(names)
    }

    /// Copy every current entry into every outdated snapshot, overwriting
    /// entries with the same key. Returns the number of entries written.
    pub async fn migrate_forward(&self) -> Result<usize, CacheError> {
        let names = self.list_snapshot_names().await?;
        let Some(current) = names.current else {
            log::debug!("[KPIO Offline] no current snapshot; nothing to migrate");
            return Ok(0);
        };
        if names.outdated.is_empty() {
            return Ok(0);
        }

        let entries = self.storage.entries(&current).await?;
        let mut written = 0;
        for name in &names.outdated {
            self.storage.put_all(name, entries.clone()).await?;
            written += entries.len();
        }
        log::info!(
            "[KPIO Offline] migrated {} entries from {} into {} outdated snapshot(s)",
            entries.len(),
            current,
            names.outdated.len()
        );
        Ok(written)
    }

    /// Delete every outdated snapshot. Returns the names deleted.
    pub async fn delete_outdated(&self) -> Result<Vec<String>, CacheError> {
        let names = self.list_snapshot_names().await?;
        let mut deleted = Vec::new();
        for name in names.outdated {
            if self.storage.delete(&name).await? {
                deleted.push(name);
            }
        }
        if !deleted.is_empty() {
            log::info!("[KPIO Offline] deleted outdated snapshots: {:?}", deleted);
        }
        Ok(deleted)
    }
}
