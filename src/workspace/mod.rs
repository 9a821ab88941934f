//! Per-run workspace leases backed by git worktrees.
//!
//! Each run gets an isolated, disposable checkout of the source repository
//! under `worktree_base/<run_id>`, so concurrent runs never share mutable
//! file state. The manager tracks live leases in-process and enforces at most
//! one live lease per run id; exclusivity of *use* (who may execute inside
//! the workspace) is the orchestrator's job, not the manager's.

mod git;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::WorkspaceError;
use crate::run::RunId;

pub use git::GitWorktreeCli;

/// An exclusive, disposable checkout bound to one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLease {
    /// Run this lease belongs to.
    pub run_id: RunId,
    /// Root of the materialized worktree.
    pub workspace_path: PathBuf,
    /// When the lease was granted.
    pub created_at: DateTime<Utc>,
}

/// The seam the orchestrator acquires workspaces through. Production code
/// uses [`WorkspaceManager`]; tests substitute lightweight providers.
#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    /// Lease an isolated workspace for the run. Fails if a lease for this
    /// run id is already live or the checkout cannot be materialized.
    async fn acquire_workspace(&self, run_id: &str) -> Result<WorkspaceLease, WorkspaceError>;

    /// Drop the lease and dispose of the workspace. Idempotent.
    async fn release_workspace(&self, run_id: &str) -> Result<(), WorkspaceError>;
}

/// Leases git worktrees under a base directory, one per run id.
pub struct WorkspaceManager {
    source_repo: PathBuf,
    worktree_base: PathBuf,
    cli: GitWorktreeCli,
    leases: Mutex<HashMap<RunId, WorkspaceLease>>,
}

impl WorkspaceManager {
    pub fn new(source_repo: impl Into<PathBuf>, worktree_base: impl Into<PathBuf>) -> Self {
        Self {
            source_repo: source_repo.into(),
            worktree_base: worktree_base.into(),
            cli: GitWorktreeCli::new(),
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Path a run's worktree lives at, whether or not it exists yet.
    pub fn worktree_path(&self, run_id: &str) -> PathBuf {
        self.worktree_base.join(run_id)
    }

    /// Materialize an isolated checkout of the source repository for this
    /// run. Does not touch the lease table; prefer
    /// [`acquire_workspace`](WorkspaceProvider::acquire_workspace) unless you
    /// are managing lease lifetimes yourself.
    ///
    /// Git runs on the blocking pool so slow VCS operations never stall the
    /// scheduler.
    pub async fn create_worktree(&self, run_id: &str) -> Result<PathBuf, WorkspaceError> {
        let path = self.worktree_path(run_id);
        let source_repo = self.source_repo.clone();
        let cli = self.cli.clone();
        let base = self.worktree_base.clone();

        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&base)?;
            cli.worktree_add_detached(&source_repo, &path)?;
            Ok(path)
        })
        .await
        .map_err(|e| WorkspaceError::WorktreeAdd(format!("worktree task failed: {e}")))?
    }

    /// Remove a run's worktree. Idempotent: removing an already-removed or
    /// never-created path is a no-op, never an error.
    pub async fn remove_worktree(&self, run_id: &str) -> Result<(), WorkspaceError> {
        let path = self.worktree_path(run_id);
        let source_repo = self.source_repo.clone();
        let cli = self.cli.clone();

        tokio::task::spawn_blocking(move || {
            if !path.exists() {
                // Nothing on disk; clear any stale metadata and move on.
                let _ = cli.worktree_prune(&source_repo);
                return Ok(());
            }
            if let Err(err) = cli.worktree_remove(&source_repo, &path, true) {
                // Fall back to a plain delete; the directory may not be a
                // registered worktree (e.g. partial creation).
                debug!(path = %path.display(), %err, "git worktree remove failed, deleting directory");
                std::fs::remove_dir_all(&path)?;
            }
            let _ = cli.worktree_prune(&source_repo);
            Ok(())
        })
        .await
        .map_err(|e| WorkspaceError::WorktreeRemove(format!("worktree task failed: {e}")))?
    }

    /// Run ids with currently live leases.
    pub fn active_leases(&self) -> Vec<RunId> {
        let leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<RunId> = leases.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn reserve_lease(&self, run_id: &str) -> Result<(), WorkspaceError> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if leases.contains_key(run_id) {
            return Err(WorkspaceError::LeaseHeld(run_id.to_string()));
        }
        leases.insert(
            run_id.to_string(),
            WorkspaceLease {
                run_id: run_id.to_string(),
                workspace_path: self.worktree_path(run_id),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn drop_lease(&self, run_id: &str) -> Option<WorkspaceLease> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases.remove(run_id)
    }
}

#[async_trait]
impl WorkspaceProvider for WorkspaceManager {
    async fn acquire_workspace(&self, run_id: &str) -> Result<WorkspaceLease, WorkspaceError> {
        // Reserve the lease before touching disk so two concurrent acquires
        // for the same run id cannot both reach the checkout step.
        self.reserve_lease(run_id)?;

        match self.create_worktree(run_id).await {
            Ok(path) => {
                debug!(run_id, path = %path.display(), "workspace leased");
                let leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
                Ok(leases
                    .get(run_id)
                    .cloned()
                    .unwrap_or_else(|| WorkspaceLease {
                        run_id: run_id.to_string(),
                        workspace_path: path,
                        created_at: Utc::now(),
                    }))
            }
            Err(err) => {
                self.drop_lease(run_id);
                Err(err)
            }
        }
    }

    async fn release_workspace(&self, run_id: &str) -> Result<(), WorkspaceError> {
        if self.drop_lease(run_id).is_none() {
            debug!(run_id, "release_workspace called without a live lease");
        }
        if let Err(err) = self.remove_worktree(run_id).await {
            warn!(run_id, %err, "failed to remove worktree on release");
            return Err(err);
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkspaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceManager")
            .field("source_repo", &self.source_repo)
            .field("worktree_base", &self.worktree_base)
            .field("active_leases", &self.active_leases())
            .finish()
    }
}

/// Convenience alias used by the orchestrator.
pub type SharedWorkspaceProvider = Arc<dyn WorkspaceProvider>;
