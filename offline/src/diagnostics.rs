//! Diagnostics channel for swallowed faults.
//!
//! Install-time and storage faults never reach the caller; the engine
//! degrades to network-only behavior instead. Each such fault is logged and
//! kept here in a bounded ring so embedders can still observe it.

use std::collections::VecDeque;
use std::fmt;

use spin::Mutex;

/// Default number of faults retained.
pub const DEFAULT_CAPACITY: usize = 64;

/// Where a swallowed fault happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Install,
    Activate,
    Enqueue,
    SyncRegistration,
    Lookup,
    Drain,
    Migrate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Install => "install",
            Stage::Activate => "activate",
            Stage::Enqueue => "enqueue",
            Stage::SyncRegistration => "sync-registration",
            Stage::Lookup => "lookup",
            Stage::Drain => "drain",
            Stage::Migrate => "migrate",
        };
        f.write_str(name)
    }
}

/// A recorded fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub stage: Stage,
    pub message: String,
}

pub struct Diagnostics {
    faults: Mutex<VecDeque<Fault>>,
    capacity: usize,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        Self {
            faults: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Log and record a fault, evicting the oldest one when full.
    pub fn report(&self, stage: Stage, error: &dyn fmt::Display) {
        let message = error.to_string();
        log::warn!("[KPIO Offline] {} fault swallowed: {}", stage, message);

        let mut faults = self.faults.lock();
        if faults.len() == self.capacity {
            faults.pop_front();
        }
        faults.push_back(Fault { stage, message });
    }

    /// Copy of the recorded faults, oldest first.
    pub fn snapshot(&self) -> Vec<Fault> {
        self.faults.lock().iter().cloned().collect()
    }

    /// Take every recorded fault.
    pub fn drain(&self) -> Vec<Fault> {
        self.faults.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.faults.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any recorded fault happened at `stage`.
    pub fn has_stage(&self, stage: Stage) -> bool {
        self.faults.lock().iter().any(|f| f.stage == stage)
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("faults", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
