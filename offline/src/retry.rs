//! Retry Engine
//!
//! Replays every queued request and prunes the ones that got a response.
//! Any response counts as delivered, whatever its status; only a transport
//! failure leaves a record queued for the next trigger. There is no backoff
//! and no attempt limit.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;

use crate::diagnostics::{Diagnostics, Stage};
use crate::platform::Network;
use crate::queue::RequestQueue;

/// Outcome of one [`RetryEngine::drain`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Distinct records read from the store.
    pub attempted: usize,
    /// Keys replayed and deleted.
    pub replayed: Vec<u64>,
    /// Keys whose replay failed; still queued.
    pub failed: Vec<u64>,
    /// Keys replayed but not deleted because the store refused; still queued.
    pub unpruned: Vec<u64>,
}

impl DrainReport {
    /// Whether every attempted record was replayed and pruned.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.unpruned.is_empty()
    }
}

pub struct RetryEngine {
    queue: Arc<RequestQueue>,
    network: Arc<dyn Network>,
    diagnostics: Arc<Diagnostics>,
    /// Set while a drain is running.
    draining: AtomicBool,
    /// Set by every drain request; the running drain rescans while it is set.
    rescan: AtomicBool,
}

impl RetryEngine {
    pub fn new(
        queue: Arc<RequestQueue>,
        network: Arc<dyn Network>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            queue,
            network,
            diagnostics,
            draining: AtomicBool::new(false),
            rescan: AtomicBool::new(false),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Replay every queued request concurrently and delete the delivered ones.
    ///
    /// A drain requested while another is running returns an empty report
    /// and makes the running drain read the queue again before it finishes,
    /// so records appended in the meantime are not left for a later trigger.
    /// Within one drain each record is replayed at most once.
    pub async fn drain(&self) -> DrainReport {
        self.rescan.store(true, Ordering::SeqCst);
        let Some(mut running) = DrainGuard::acquire(&self.draining) else {
            log::debug!("[KPIO Offline] drain already running; rescan requested");
            return DrainReport::default();
        };

        let mut report = DrainReport::default();
        let mut seen = BTreeSet::new();
        loop {
            self.rescan.store(false, Ordering::SeqCst);
            if !self.replay_pass(&mut seen, &mut report).await {
                break;
            }
            if self.rescan.load(Ordering::SeqCst) {
                continue;
            }
            running.release();
            // A request that arrived between the check and the release found
            // the flag still set and returned; pick its work up here.
            if !self.rescan.load(Ordering::SeqCst) || !running.reacquire() {
                break;
            }
        }

        if report.failed.is_empty() {
            log::info!(
                "[KPIO Offline] drain: {} of {} replayed",
                report.replayed.len(),
                report.attempted
            );
        } else {
            log::warn!(
                "[KPIO Offline] drain: {} of {} replayed, {} still queued",
                report.replayed.len(),
                report.attempted,
                report.failed.len()
            );
        }
        report
    }

    /// Replay the records not yet seen by this drain. Returns `false` when
    /// the store could not be read.
    async fn replay_pass(&self, seen: &mut BTreeSet<u64>, report: &mut DrainReport) -> bool {
        let records = match self.queue.list_all().await {
            Ok(records) => records,
            Err(e) => {
                self.diagnostics.report(Stage::Drain, &e);
                return false;
            }
        };
        let records: Vec<_> = records
            .into_iter()
            .filter(|record| seen.insert(record.key()))
            .collect();
        report.attempted += records.len();

        let replays = records.iter().map(|record| {
            let network = Arc::clone(&self.network);
            let request = record.to_request();
            let key = record.key();
            async move { (key, network.fetch(request).await) }
        });

        for (key, outcome) in join_all(replays).await {
            match outcome {
                Ok(response) => {
                    log::debug!("[KPIO Offline] replayed {} -> {}", key, response.status);
                    match self.queue.remove(key).await {
                        Ok(()) => report.replayed.push(key),
                        Err(e) => {
                            self.diagnostics.report(Stage::Drain, &e);
                            report.unpruned.push(key);
                        }
                    }
                }
                Err(e) => {
                    log::debug!("[KPIO Offline] replay of {} failed: {}", key, e);
                    report.failed.push(key);
                }
            }
        }
        true
    }
}

/// Holds the draining flag; clears it when dropped while held.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
    held: bool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        let mut guard = Self { flag, held: false };
        guard.reacquire().then_some(guard)
    }

    fn reacquire(&mut self) -> bool {
        self.held = self
            .flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        self.held
    }

    fn release(&mut self) {
        if self.held {
            self.flag.store(false, Ordering::SeqCst);
            self.held = false;
        }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
