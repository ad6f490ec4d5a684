//! Worker Events
//!
//! Events the host delivers to the worker. Handlers that start asynchronous
//! work attach it to the event with `wait_until`; the host must await
//! [`ExtendableEvent::settle`] before it is allowed to terminate the process.

use futures::future::{join_all, BoxFuture, FutureExt};
use std::future::Future;

/// Event type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Install event
    Install,
    /// Activate event
    Activate,
    /// Fetch event
    Fetch,
    /// Message event
    Message,
    /// Sync event
    Sync,
}

/// Lifetime extension shared by every extendable event.
#[derive(Default)]
pub struct ExtendableEvent {
    pending: Vec<BoxFuture<'static, ()>>,
}

impl ExtendableEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the process alive until `work` completes.
    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.push(work.boxed());
    }

    /// Check if wait_until was called
    pub fn has_wait_until(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Resolve once every extension has completed.
    pub async fn settle(self) {
        join_all(self.pending).await;
    }
}

impl std::fmt::Debug for ExtendableEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendableEvent")
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Deferred-trigger (background sync) event.
#[derive(Debug)]
pub struct SyncEvent {
    /// Registration tag
    pub tag: String,
    /// Whether the host will stop retrying this tag after this attempt
    pub last_chance: bool,
    extendable: ExtendableEvent,
}

impl SyncEvent {
    pub fn new(tag: impl Into<String>, last_chance: bool) -> Self {
        Self {
            tag: tag.into(),
            last_chance,
            extendable: ExtendableEvent::new(),
        }
    }

    pub fn event_type(&self) -> EventType {
        EventType::Sync
    }

    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.extendable.wait_until(work);
    }

    pub fn has_wait_until(&self) -> bool {
        self.extendable.has_wait_until()
    }

    /// Hand the lifetime extension to the host.
    pub fn into_extendable(self) -> ExtendableEvent {
        self.extendable
    }
}

/// Control message posted by a client.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Message data (serialized)
    data: Vec<u8>,
    /// Source client ID
    source: Option<String>,
}

impl MessageEvent {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn event_type(&self) -> EventType {
        EventType::Message
    }

    /// Get data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get source
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}
