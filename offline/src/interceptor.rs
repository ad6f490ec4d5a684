//! Request Classifier & Interceptor
//!
//! Routes every intercepted request to exactly one source:
//!
//! 1. offline and retry-eligible: queue it, answer with the fallback document
//! 2. cached: answer from the snapshots (redirects sanitized)
//! 3. otherwise: live network fetch, returned verbatim
//! 4. network failure: the fallback document
//!
//! The end user never sees a raw network error for an intercepted request.

use std::sync::Arc;

use crate::cache::{strip_search, SnapshotManager};
use crate::config::OfflineConfig;
use crate::diagnostics::{Diagnostics, Stage};
use crate::platform::{Connectivity, Network};
use crate::queue::RequestQueue;
use crate::request::{Method, Request, Response};

// ── Classification ──────────────────────────────────────────

/// Which requests are queued while offline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Explicit allow-list, matched against the full URL or its path.
    urls: Vec<String>,
}

impl RetryPolicy {
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls }
    }

    pub fn from_config(config: &OfflineConfig) -> Self {
        Self::new(config.retry_urls.clone())
    }

    /// POST, PUT and DELETE always qualify; anything else only through the
    /// allow-list.
    pub fn is_eligible(&self, url: &str, method: Method) -> bool {
        if method.is_mutating() {
            return true;
        }
        let path = url_path(url);
        self.urls.iter().any(|allowed| allowed == url || allowed == path)
    }
}

/// Path component of an absolute or origin-relative URL, without query.
fn url_path(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(scheme_end) => {
            let after = &url[scheme_end + 3..];
            match after.find('/') {
                Some(slash) => &after[slash..],
                None => "/",
            }
        }
        None => url,
    };
    strip_search(rest)
}

// ── Results ─────────────────────────────────────────────────

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// From a cache snapshot.
    Cache,
    /// From the network.
    Network,
    /// The offline fallback document, after a network failure.
    Fallback,
    /// The offline fallback document, after the request was queued.
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intercepted {
    pub response: Response,
    pub source: ResponseSource,
}

impl Intercepted {
    fn new(response: Response, source: ResponseSource) -> Self {
        Self { response, source }
    }
}

/// Copy of `response` with the redirected flag cleared.
///
/// Body, headers, status and status text are kept as they are. A response
/// without the flag is returned unchanged.
pub fn sanitize_redirect(response: Response) -> Response {
    if !response.redirected {
        return response;
    }
    Response {
        redirected: false,
        ..response
    }
}

/// Response served when no cached fallback document exists.
pub fn synthesized_fallback() -> Response {
    Response::new(503)
        .with_header("Content-Type", "text/html; charset=utf-8")
        .with_body(
            "<!DOCTYPE html><html><head><title>Offline</title></head>\
             <body><h1>You are offline</h1>\
             <p>This page is not available offline. Changes you made will be sent when the connection returns.</p>\
             </body></html>",
        )
}

// ── Interceptor ─────────────────────────────────────────────

pub struct FetchInterceptor {
    snapshots: Arc<SnapshotManager>,
    queue: Arc<RequestQueue>,
    network: Arc<dyn Network>,
    connectivity: Arc<dyn Connectivity>,
    policy: RetryPolicy,
    fallback_url: String,
    diagnostics: Arc<Diagnostics>,
}

impl FetchInterceptor {
    pub fn new(
        snapshots: Arc<SnapshotManager>,
        queue: Arc<RequestQueue>,
        network: Arc<dyn Network>,
        connectivity: Arc<dyn Connectivity>,
        config: &OfflineConfig,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            snapshots,
            queue,
            network,
            connectivity,
            policy: RetryPolicy::from_config(config),
            fallback_url: config.fallback_url.clone(),
            diagnostics,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide and produce the response for one request.
    pub async fn intercept(&self, mut request: Request) -> Intercepted {
        if !self.connectivity.is_online() && self.policy.is_eligible(&request.url, request.method) {
            return match self.queue.append(&mut request).await {
                Ok(key) => {
                    log::info!(
                        "[KPIO Offline] offline: queued {} {} as {}",
                        request.method,
                        request.url,
                        key
                    );
                    Intercepted::new(self.fallback().await, ResponseSource::Queued)
                }
                Err(e) => {
                    self.diagnostics.report(Stage::Enqueue, &e);
                    Intercepted::new(self.fallback().await, ResponseSource::Fallback)
                }
            };
        }

        match self.snapshots.lookup(&request).await {
            Ok(Some(cached)) => {
                return Intercepted::new(sanitize_redirect(cached), ResponseSource::Cache);
            }
            Ok(None) => {}
            Err(e) => self.diagnostics.report(Stage::Lookup, &e),
        }

        let url = request.url.clone();
        match self.network.fetch(request).await {
            Ok(response) => Intercepted::new(response, ResponseSource::Network),
            Err(e) => {
                log::debug!("[KPIO Offline] fetch of {} failed: {}; serving fallback", url, e);
                Intercepted::new(self.fallback().await, ResponseSource::Fallback)
            }
        }
    }

    /// The offline fallback document: the cached copy when there is one,
    /// otherwise a synthesized `503`.
    pub async fn fallback(&self) -> Response {
        match self.snapshots.lookup(&Request::get(self.fallback_url.as_str())).await {
            Ok(Some(cached)) => sanitize_redirect(cached),
            Ok(None) => synthesized_fallback(),
            Err(e) => {
                self.diagnostics.report(Stage::Lookup, &e);
                synthesized_fallback()
            }
        }
    }
}
