//! Concurrent run orchestration for long-lived autonomous build jobs.
//!
//! runloom schedules many independent runs in parallel, giving each one an
//! isolated git-worktree workspace and an exclusive executor claim, and
//! recovers automatically when a phase silently stalls:
//!
//! - [`workspace::WorkspaceManager`] leases a disposable worktree per run.
//! - [`lock::ExecutorLockManager`] is a try-based lock table keyed by run id.
//! - [`orchestrator::ParallelRunOrchestrator`] fans runs out under a
//!   concurrency bound with guaranteed cleanup on every exit path.
//! - [`stale::StalePhaseHandler`] resets phases stuck in EXECUTING using a
//!   race-safe double-checked protocol.
//!
//! What a run actually does is opaque: callers supply a [`RunExecutor`] and
//! the core only schedules, isolates, and recovers.
//!
//! ```ignore
//! use std::sync::Arc;
//! use runloom::{execute_parallel_runs, FnExecutor};
//!
//! let executor = Arc::new(FnExecutor::new(|run_id, workspace| async move {
//!     tokio::fs::write(workspace.join("built-by.txt"), run_id).await?;
//!     Ok(())
//! }));
//! let results = execute_parallel_runs(
//!     &["run-1".into(), "run-2".into()],
//!     executor,
//!     4,
//!     "/srv/source-repo",
//!     "/srv/worktrees",
//! )
//! .await;
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod executor;
pub mod lock;
pub mod orchestrator;
pub mod run;
pub mod stale;
pub mod workspace;

use std::path::Path;
use std::sync::Arc;

pub use audit::{AuditRecord, AuditWriter, StaleResetAudit};
pub use config::ParallelRunConfig;
pub use error::{BoxError, ExecutorError, StaleResetError, WorkspaceError};
pub use executor::{BlockingExecutor, FnExecutor, RunExecutor};
pub use lock::ExecutorLockManager;
pub use orchestrator::ParallelRunOrchestrator;
pub use run::{RunId, RunResult};
pub use stale::{
    PhaseState, PhaseStatus, RunStatusSnapshot, StalePhaseHandler, StatusProvider, TierStatus,
};
pub use workspace::{WorkspaceLease, WorkspaceManager, WorkspaceProvider};

/// Execute a batch of runs with a short-lived orchestrator.
///
/// Thin constructor for callers that do not need a long-lived instance;
/// workspaces are worktrees of `source_repo` under `worktree_base` and are
/// cleaned up as each run finishes.
pub async fn execute_parallel_runs(
    run_ids: &[RunId],
    executor: Arc<dyn RunExecutor>,
    max_concurrent: usize,
    source_repo: impl AsRef<Path>,
    worktree_base: impl AsRef<Path>,
) -> Vec<RunResult> {
    let config = ParallelRunConfig::new(
        source_repo.as_ref().to_path_buf(),
        worktree_base.as_ref().to_path_buf(),
    )
    .with_max_concurrent_runs(max_concurrent);
    ParallelRunOrchestrator::new(config)
        .execute_parallel(run_ids, executor)
        .await
}

/// Execute one run with a short-lived orchestrator.
pub async fn execute_single_run(
    run_id: &str,
    executor: Arc<dyn RunExecutor>,
    source_repo: impl AsRef<Path>,
    worktree_base: impl AsRef<Path>,
) -> RunResult {
    let config = ParallelRunConfig::new(
        source_repo.as_ref().to_path_buf(),
        worktree_base.as_ref().to_path_buf(),
    );
    ParallelRunOrchestrator::new(config)
        .execute_single(run_id, executor)
        .await
}
