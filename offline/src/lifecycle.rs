//! Worker Lifecycle
//!
//! ```text
//! Parsed ─▶ Installing ─▶ Waiting ─▶ Activating ─▶ Active
//!               │  └──────(skip)──────▲    │          │
//!               └────────────┴────────▶ Redundant ◀───┘
//! ```
//!
//! Install populates the current snapshot and opens the request store.
//! Activation garbage-collects outdated snapshots. Neither ever fails the
//! worker: faults are swallowed into [`Diagnostics`] and the worker keeps
//! going with network-only behavior for whatever is not cached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spin::Mutex;

use crate::cache::SnapshotManager;
use crate::config::OfflineConfig;
use crate::diagnostics::{Diagnostics, Stage};
use crate::error::OfflineError;
use crate::events::SyncEvent;
use crate::message::ControlMessage;
use crate::platform::Clients;
use crate::queue::RequestQueue;
use crate::retry::{DrainReport, RetryEngine};

// ── States ──────────────────────────────────────────────────

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    /// Loaded, not yet installing
    #[default]
    Parsed,
    /// Install work running
    Installing,
    /// Installed; older worker still controls clients
    Waiting,
    /// Activation work running
    Activating,
    /// Controlling clients
    Active,
    /// Replaced or discarded
    Redundant,
}

impl WorkerState {
    /// Check if a state transition is valid
    pub fn can_transition_to(self, to: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, to),
            (Parsed, Installing)
                | (Installing, Waiting)
                | (Installing, Activating) // skip waiting during install
                | (Installing, Redundant)
                | (Waiting, Activating)
                | (Waiting, Redundant)
                | (Activating, Active)
                | (Activating, Redundant)
                | (Active, Redundant)
        )
    }

    pub fn is_active(self) -> bool {
        self == WorkerState::Active
    }
}

// ── Events ──────────────────────────────────────────────────

/// Lifecycle event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// State change
    StateChange { old: WorkerState, new: WorkerState },
    /// This worker claimed the open clients
    ControllerChange,
    /// Install could not populate the current snapshot
    InstallDegraded,
    /// Outdated snapshots removed at activation
    SnapshotsDeleted(Vec<String>),
    /// Current content copied into outdated snapshots
    CachesMigrated { entries: usize },
}

/// Result of a control-handoff request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffDecision {
    Granted,
    /// More than one client is open; forcing activation could split them
    /// across two versions.
    Refused { clients: usize },
}

/// What a control message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Handoff(HandoffDecision),
    Migrated { entries: usize },
    Drained(DrainReport),
}

// ── Controller ──────────────────────────────────────────────

pub struct LifecycleController {
    state: Mutex<WorkerState>,
    events: Mutex<Vec<LifecycleEvent>>,
    /// Handoff granted while still installing.
    skip_waiting: AtomicBool,
    snapshots: Arc<SnapshotManager>,
    queue: Arc<RequestQueue>,
    retry: Arc<RetryEngine>,
    clients: Arc<dyn Clients>,
    diagnostics: Arc<Diagnostics>,
    precache_urls: Vec<String>,
    sync_tag: String,
}

impl LifecycleController {
    pub fn new(
        config: &OfflineConfig,
        snapshots: Arc<SnapshotManager>,
        queue: Arc<RequestQueue>,
        retry: Arc<RetryEngine>,
        clients: Arc<dyn Clients>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            state: Mutex::new(WorkerState::Parsed),
            events: Mutex::new(Vec::new()),
            skip_waiting: AtomicBool::new(false),
            snapshots,
            queue,
            retry,
            clients,
            diagnostics,
            precache_urls: config.precache_urls(),
            sync_tag: config.sync_tag.clone(),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    /// Events recorded since the last [`clear_pending`](Self::clear_pending).
    pub fn pending_events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    pub fn clear_pending(&self) {
        self.events.lock().clear();
    }

    fn dispatch(&self, event: LifecycleEvent) {
        self.events.lock().push(event);
    }

    /// Move to `to`, rejecting transitions the state machine does not allow.
    fn transition(&self, to: WorkerState) -> Result<(), OfflineError> {
        let mut state = self.state.lock();
        let from = *state;
        if !from.can_transition_to(to) {
            return Err(OfflineError::InvalidStateTransition { from, to });
        }
        *state = to;
        drop(state);

        log::info!("[KPIO Offline] worker state {:?} -> {:?}", from, to);
        self.dispatch(LifecycleEvent::StateChange { old: from, new: to });
        Ok(())
    }

    /// Run install work and return the state reached.
    ///
    /// Only a call outside `Parsed` is an error. Population and store faults
    /// are reported to diagnostics; the worker still reaches `Waiting`, or
    /// `Activating` when a handoff was granted during install.
    pub async fn install(&self) -> Result<WorkerState, OfflineError> {
        self.transition(WorkerState::Installing)?;

        if let Err(e) = self.run_install().await {
            self.diagnostics.report(Stage::Install, &e);
            self.dispatch(LifecycleEvent::InstallDegraded);
        }

        let next = if self.skip_waiting.load(Ordering::SeqCst) {
            WorkerState::Activating
        } else {
            WorkerState::Waiting
        };
        self.transition(next)?;
        Ok(next)
    }

    async fn run_install(&self) -> Result<(), OfflineError> {
        let name = self.snapshots.current_name().to_string();
        self.snapshots.populate(&name, &self.precache_urls).await?;
        self.queue.store().open().await?;
        Ok(())
    }

    /// Garbage-collect outdated snapshots and become `Active`.
    ///
    /// Accepted from `Waiting` (old clients closed) or `Activating` (handoff
    /// granted). A deletion fault is reported and does not block activation.
    pub async fn activate(&self) -> Result<(), OfflineError> {
        if self.state() == WorkerState::Waiting {
            self.transition(WorkerState::Activating)?;
        }
        if self.state() != WorkerState::Activating {
            return Err(OfflineError::InvalidStateTransition {
                from: self.state(),
                to: WorkerState::Active,
            });
        }

        match self.snapshots.delete_outdated().await {
            Ok(deleted) if !deleted.is_empty() => {
                self.dispatch(LifecycleEvent::SnapshotsDeleted(deleted));
            }
            Ok(_) => {}
            Err(e) => self.diagnostics.report(Stage::Activate, &e),
        }

        self.transition(WorkerState::Active)
    }

    /// Mark this worker as replaced.
    pub fn retire(&self) -> Result<(), OfflineError> {
        self.transition(WorkerState::Redundant)
    }

    /// Take control of open clients, unless more than one is open.
    pub async fn request_handoff(&self) -> HandoffDecision {
        let clients = self.clients.controlled_count().await;
        if clients > 1 {
            log::warn!(
                "[KPIO Offline] handoff refused: {} clients still controlled",
                clients
            );
            return HandoffDecision::Refused { clients };
        }

        self.clients.skip_waiting().await;
        self.clients.claim().await;
        self.dispatch(LifecycleEvent::ControllerChange);

        match self.state() {
            WorkerState::Installing => self.skip_waiting.store(true, Ordering::SeqCst),
            WorkerState::Waiting => {
                if let Err(e) = self.transition(WorkerState::Activating) {
                    log::warn!("[KPIO Offline] handoff transition failed: {}", e);
                }
            }
            _ => {}
        }
        HandoffDecision::Granted
    }

    /// Copy current content into outdated snapshots ahead of an update.
    /// Returns the number of entries written.
    pub async fn prepare_for_update(&self) -> usize {
        match self.snapshots.migrate_forward().await {
            Ok(entries) => {
                self.dispatch(LifecycleEvent::CachesMigrated { entries });
                entries
            }
            Err(e) => {
                self.diagnostics.report(Stage::Migrate, &e);
                0
            }
        }
    }

    pub async fn handle_message(&self, message: ControlMessage) -> MessageOutcome {
        log::debug!("[KPIO Offline] control message {}", message);
        match message {
            ControlMessage::SkipWaiting => MessageOutcome::Handoff(self.request_handoff().await),
            ControlMessage::PrepareCachesForUpdate => MessageOutcome::Migrated {
                entries: self.prepare_for_update().await,
            },
            ControlMessage::RetryRequests => MessageOutcome::Drained(self.retry.drain().await),
        }
    }

    /// Attach a drain to a sync event carrying the retry tag.
    ///
    /// Returns whether the event was claimed. The host must settle the
    /// event before it terminates the process.
    pub fn handle_sync(&self, event: &mut SyncEvent) -> bool {
        if event.tag != self.sync_tag {
            log::debug!("[KPIO Offline] ignoring sync event {:?}", event.tag);
            return false;
        }
        if event.last_chance {
            log::warn!("[KPIO Offline] last sync attempt for {}", event.tag);
        }

        let retry = Arc::clone(&self.retry);
        event.wait_until(async move {
            retry.drain().await;
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEntry, CacheStorage, MemoryCacheStorage};
    use crate::fixtures::{FakeClients, FakeNetwork, FakeSync, ManualClock};
    use crate::queue::MemoryRequestStore;
    use crate::request::{Headers, Method, Request, Response};
    use futures::executor::block_on;

    struct Harness {
        storage: Arc<MemoryCacheStorage>,
        store: Arc<MemoryRequestStore>,
        network: Arc<FakeNetwork>,
        clients: Arc<FakeClients>,
        queue: Arc<RequestQueue>,
        diagnostics: Arc<Diagnostics>,
        controller: LifecycleController,
    }

    fn harness(clients: usize) -> Harness {
        let config = OfflineConfig {
            version: String::from("v2"),
            static_assets: vec![String::from("/app.js")],
            routes: vec![String::from("/notes")],
            ..OfflineConfig::default()
        };
        let storage = Arc::new(MemoryCacheStorage::new());
        let store = Arc::new(MemoryRequestStore::new());
        let network = Arc::new(FakeNetwork::new());
        network.respond("/app.js", Response::ok("js"));
        network.respond("/notes", Response::ok("notes"));
        let clients = Arc::new(FakeClients::new(clients));
        let diagnostics = Arc::new(Diagnostics::default());

        let snapshots = Arc::new(SnapshotManager::new(storage.clone(), network.clone(), &config));
        let queue = Arc::new(RequestQueue::new(
            store.clone(),
            Arc::new(FakeSync::supported()),
            Arc::new(ManualClock::new(1)),
            config.sync_tag.clone(),
        ));
        let retry = Arc::new(RetryEngine::new(queue.clone(), network.clone(), diagnostics.clone()));
        let controller = LifecycleController::new(
            &config,
            snapshots,
            queue.clone(),
            retry,
            clients.clone(),
            diagnostics.clone(),
        );
        Harness {
            storage,
            store,
            network,
            clients,
            queue,
            diagnostics,
            controller,
        }
    }

    #[test]
    fn transition_table() {
        use WorkerState::*;
        assert!(Parsed.can_transition_to(Installing));
        assert!(Installing.can_transition_to(Activating));
        assert!(!Parsed.can_transition_to(Active));
        assert!(!Active.can_transition_to(Waiting));
        assert!(!Redundant.can_transition_to(Installing));
    }

    #[test]
    fn install_populates_and_opens_store() {
        let h = harness(1);
        let state = block_on(h.controller.install()).unwrap();
        assert_eq!(state, WorkerState::Waiting);
        assert_eq!(h.storage.urls("kpio-offline-v2"), vec!["/app.js", "/notes"]);
        assert!(h.store.is_open());
        assert!(h.diagnostics.is_empty());
    }

    #[test]
    fn install_fault_is_swallowed() {
        let h = harness(1);
        h.network.respond("/notes", Response::new(500));

        let state = block_on(h.controller.install()).unwrap();
        assert_eq!(state, WorkerState::Waiting);
        assert!(h.diagnostics.has_stage(Stage::Install));
        assert!(!block_on(h.storage.has("kpio-offline-v2")).unwrap());
        // Remaining install work is skipped.
        assert!(!h.store.is_open());
        assert!(h
            .controller
            .pending_events()
            .contains(&LifecycleEvent::InstallDegraded));
    }

    #[test]
    fn install_twice_is_rejected() {
        let h = harness(1);
        block_on(h.controller.install()).unwrap();
        assert!(matches!(
            block_on(h.controller.install()),
            Err(OfflineError::InvalidStateTransition {
                from: WorkerState::Waiting,
                to: WorkerState::Installing
            })
        ));
    }

    #[test]
    fn activate_deletes_outdated_snapshots() {
        let h = harness(1);
        block_on(h.storage.put(
            "kpio-offline-v1",
            CacheEntry::new("/app.js", Headers::new(), Response::ok("old")),
        ))
        .unwrap();
        block_on(h.controller.install()).unwrap();
        block_on(h.controller.activate()).unwrap();

        assert_eq!(h.controller.state(), WorkerState::Active);
        assert_eq!(block_on(h.storage.keys()).unwrap(), vec!["kpio-offline-v2"]);
    }

    #[test]
    fn activate_fault_does_not_block() {
        let h = harness(1);
        block_on(h.controller.install()).unwrap();
        h.storage.set_available(false);
        block_on(h.controller.activate()).unwrap();
        assert_eq!(h.controller.state(), WorkerState::Active);
        assert!(h.diagnostics.has_stage(Stage::Activate));
    }

    #[test]
    fn activate_before_install_is_rejected() {
        let h = harness(1);
        assert!(block_on(h.controller.activate()).is_err());
    }

    #[test]
    fn handoff_refused_with_two_clients() {
        let h = harness(2);
        block_on(h.controller.install()).unwrap();

        let outcome = block_on(h.controller.handle_message(ControlMessage::SkipWaiting));
        assert_eq!(
            outcome,
            MessageOutcome::Handoff(HandoffDecision::Refused { clients: 2 })
        );
        assert_eq!(h.controller.state(), WorkerState::Waiting);
        assert_eq!(h.clients.skip_waiting_calls(), 0);
        assert_eq!(h.clients.claim_calls(), 0);
    }

    #[test]
    fn handoff_granted_with_one_client() {
        let h = harness(1);
        block_on(h.controller.install()).unwrap();

        assert_eq!(block_on(h.controller.request_handoff()), HandoffDecision::Granted);
        assert_eq!(h.controller.state(), WorkerState::Activating);
        assert_eq!(h.clients.skip_waiting_calls(), 1);
        assert_eq!(h.clients.claim_calls(), 1);
        assert!(h
            .controller
            .pending_events()
            .contains(&LifecycleEvent::ControllerChange));
    }

    #[test]
    fn prepare_for_update_migrates() {
        let h = harness(1);
        block_on(h.controller.install()).unwrap();
        block_on(h.storage.put(
            "kpio-offline-v1",
            CacheEntry::new("/legacy", Headers::new(), Response::ok("c")),
        ))
        .unwrap();

        let outcome = block_on(h.controller.handle_message(ControlMessage::PrepareCachesForUpdate));
        assert_eq!(outcome, MessageOutcome::Migrated { entries: 2 });
        assert_eq!(
            h.storage.urls("kpio-offline-v1"),
            vec!["/legacy", "/app.js", "/notes"]
        );
    }

    #[test]
    fn retry_message_drains_queue() {
        let h = harness(1);
        block_on(h.queue.append(&mut Request::new(Method::Post, "/submit"))).unwrap();
        h.network.respond("/submit", Response::new(204));

        let outcome = block_on(h.controller.handle_message(ControlMessage::RetryRequests));
        match outcome {
            MessageOutcome::Drained(report) => assert_eq!(report.replayed.len(), 1),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(h.store.keys().is_empty());
    }

    #[test]
    fn sync_event_drains_inside_lifetime_extension() {
        let h = harness(1);
        block_on(h.queue.append(&mut Request::new(Method::Post, "/submit"))).unwrap();

        let mut event = SyncEvent::new("retry-requests", false);
        assert!(h.controller.handle_sync(&mut event));
        assert!(event.has_wait_until());
        // Nothing runs until the host settles the event.
        assert_eq!(h.store.keys().len(), 1);

        block_on(event.into_extendable().settle());
        assert!(h.store.keys().is_empty());
    }

    #[test]
    fn foreign_sync_tag_is_ignored() {
        let h = harness(1);
        let mut event = SyncEvent::new("periodic-refresh", false);
        assert!(!h.controller.handle_sync(&mut event));
        assert!(!event.has_wait_until());
    }
}
