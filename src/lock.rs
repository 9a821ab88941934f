//! Advisory mutual-exclusion locks keyed by run id.
//!
//! Locks are try-semantics, not queue semantics: a busy lock means the same
//! run was submitted twice, and waiting on it would only mask that bug. The
//! table is an in-process, best-effort safety net; cross-process race safety
//! belongs to the external status provider, which is the source of truth.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::run::RunId;

/// Who holds a lock and since when. Kept for diagnostics only.
#[derive(Debug, Clone)]
struct LockHolder {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// Non-blocking lock table guarding exclusive executor access per run.
#[derive(Debug, Default)]
pub struct ExecutorLockManager {
    table: Mutex<HashMap<RunId, LockHolder>>,
}

impl ExecutorLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to claim the lock for `run_id`. Returns false immediately if
    /// it is already held (locks are never reentrant).
    pub fn try_acquire_lock(&self, run_id: &str) -> bool {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if table.contains_key(run_id) {
            return false;
        }
        table.insert(
            run_id.to_string(),
            LockHolder {
                holder: format!("pid-{}", std::process::id()),
                acquired_at: Utc::now(),
            },
        );
        true
    }

    /// Release the lock for `run_id`. Releasing an unheld lock is a no-op.
    /// Returns true when a lock was actually released.
    pub fn release_lock(&self, run_id: &str) -> bool {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.remove(run_id).is_some()
    }

    /// True if the run is currently claimed.
    pub fn is_locked(&self, run_id: &str) -> bool {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.contains_key(run_id)
    }

    /// Point-in-time snapshot of all claimed runs, for observability and
    /// admin tooling.
    pub fn get_locked_runs(&self) -> Vec<RunId> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let mut runs: Vec<RunId> = table.keys().cloned().collect();
        runs.sort();
        runs
    }

    /// Age of the lock for `run_id`, when held.
    pub fn held_since(&self, run_id: &str) -> Option<DateTime<Utc>> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.get(run_id).map(|h| h.acquired_at)
    }

    /// Diagnostic label of the current holder, when held.
    pub fn holder_of(&self, run_id: &str) -> Option<String> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.get(run_id).map(|h| h.holder.clone())
    }
}
