//! KPIO Offline Support
//!
//! Offline resilience for web apps: intercepts requests, serves cached
//! content when the network is gone, and durably queues mutating requests
//! for replay once connectivity returns.
//!
//! - [`queue`]: durable request store, keyed by capture time
//! - [`cache`]: versioned snapshots (populate, lookup, migrate, GC)
//! - [`interceptor`]: cache / network / queue decision per request
//! - [`retry`]: replay and prune of queued requests
//! - [`lifecycle`] and [`message`]: install / activate / handoff and the
//!   client control protocol
//! - [`worker`]: façade wiring everything to the host's services
//!
//! Host services (network, connectivity, deferred triggers, clients and both
//! storage backends) are traits injected as `Arc<dyn ...>` handles.

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod fixtures;
pub mod interceptor;
pub mod lifecycle;
pub mod message;
pub mod platform;
pub mod queue;
pub mod request;
pub mod retry;
pub mod worker;

pub use config::OfflineConfig;
pub use error::OfflineError;
pub use interceptor::{Intercepted, ResponseSource};
pub use lifecycle::{HandoffDecision, MessageOutcome, WorkerState};
pub use message::ControlMessage;
pub use request::{Method, Request, Response};
pub use retry::DrainReport;
pub use worker::{HostServices, OfflineWorker};
