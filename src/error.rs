//! Error types for the orchestration core.
//!
//! None of these errors escape the public scheduling operations: the
//! orchestrator folds them into [`RunResult`](crate::run::RunResult) values
//! and the stale-phase handler logs and retries on the next cycle. The types
//! exist so internal boundaries stay explicit and diagnostics stay readable.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Boxed error type used at the executor and status-provider seams, where the
/// caller's failure payload is opaque to the core.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while leasing or tearing down an isolated workspace.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    /// `git worktree add` failed (dirty state, path collision, disk full).
    #[error("git worktree add failed: {0}")]
    WorktreeAdd(String),

    /// `git worktree remove` failed for a path that still exists.
    #[error("git worktree remove failed: {0}")]
    WorktreeRemove(String),

    /// The git executable could not be found or run.
    #[error("git executable not found or not runnable")]
    GitNotAvailable,

    /// A live lease already exists for this run id.
    #[error("workspace lease already held for run '{0}'")]
    LeaseHeld(String),

    /// Filesystem error outside of git itself.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Failures of one executor invocation, as seen by the orchestrator.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// The executor callback returned an error.
    #[error("{0}")]
    Failed(String),

    /// The executor exceeded the configured run timeout and was cancelled.
    #[error("executor timed out after {0:?}")]
    TimedOut(Duration),

    /// The executor task panicked.
    #[error("executor panicked: {0}")]
    Panicked(String),
}

/// Failures inside one stale-phase reset attempt.
#[derive(Error, Debug)]
pub enum StaleResetError {
    /// Re-fetching the authoritative run status failed.
    #[error("status fetch failed: {0}")]
    Fetch(String),

    /// The status-update call itself failed; the phase stays a candidate and
    /// is retried on the next detection cycle.
    #[error("status update failed for phase '{phase_id}': {message}")]
    Update { phase_id: String, message: String },
}
