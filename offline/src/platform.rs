//! Host Platform Interfaces
//!
//! Services the hosting runtime provides to the offline engine. Every I/O
//! boundary is an `async` method so the engine suspends cooperatively at
//! each one; the host supplies its own serialization and fetch timeouts.
//!
//! The two storage contracts live next to their managers:
//! [`crate::queue::RequestStore`] and [`crate::cache::CacheStorage`].

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::{NetworkFault, PlatformError};
use crate::request::{Request, Response};

/// Network fetch primitive.
#[async_trait]
pub trait Network: Send + Sync {
    /// Issue a request. A response with any status is `Ok`; only a transport
    /// failure (or no response at all) is a [`NetworkFault`].
    async fn fetch(&self, request: Request) -> Result<Response, NetworkFault>;
}

/// Connectivity status query.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Deferred-execution triggers ("background sync").
#[async_trait]
pub trait DeferredSync: Send + Sync {
    /// Whether the host can deliver tagged sync events at all.
    fn is_supported(&self) -> bool;

    /// Ask the host to deliver a sync event tagged `tag` once connectivity
    /// resumes. Registering an already-registered tag is not an error.
    async fn register(&self, tag: &str) -> Result<(), PlatformError>;
}

/// Clients controlled by this worker and the control-handoff primitives.
#[async_trait]
pub trait Clients: Send + Sync {
    /// Number of open clients (tabs) currently controlled.
    async fn controlled_count(&self) -> usize;

    /// Activate immediately instead of waiting for old clients to close.
    async fn skip_waiting(&self);

    /// Take control of every open client in scope.
    async fn claim(&self);
}

/// Wall clock in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// [`DeferredSync`] for hosts without deferred triggers.
///
/// Queued requests then wait for an explicit `retry-requests` message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDeferredSync;

#[async_trait]
impl DeferredSync for NoDeferredSync {
    fn is_supported(&self) -> bool {
        false
    }

    async fn register(&self, _tag: &str) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn no_deferred_sync_rejects_registration() {
        let sync = NoDeferredSync;
        assert!(!sync.is_supported());
        let result = futures::executor::block_on(sync.register("retry-requests"));
        assert_eq!(result, Err(PlatformError::Unsupported));
    }
}
