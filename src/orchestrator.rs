//! Bounded-concurrency run orchestration.
//!
//! `ParallelRunOrchestrator` fans a set of runs out over a semaphore of
//! `max_concurrent_runs` permits. For each run it leases a workspace, claims
//! the executor lock, invokes the executor, and then unconditionally walks
//! the cleanup path: release the lock, then release the workspace. One run's
//! failure never aborts or blocks the others; every submitted run id yields
//! exactly one [`RunResult`].

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ParallelRunConfig;
use crate::error::ExecutorError;
use crate::executor::RunExecutor;
use crate::lock::ExecutorLockManager;
use crate::run::{RunId, RunResult};
use crate::workspace::{SharedWorkspaceProvider, WorkspaceManager};

/// Orchestrates concurrent run executions with guaranteed cleanup.
#[derive(Clone)]
pub struct ParallelRunOrchestrator {
    config: ParallelRunConfig,
    workspaces: SharedWorkspaceProvider,
    locks: Arc<ExecutorLockManager>,
    semaphore: Arc<Semaphore>,
}

impl ParallelRunOrchestrator {
    /// Create an orchestrator whose workspaces are git worktrees of
    /// `config.source_repo` under `config.worktree_base`.
    pub fn new(config: ParallelRunConfig) -> Self {
        let workspaces: SharedWorkspaceProvider = Arc::new(WorkspaceManager::new(
            config.source_repo.clone(),
            config.worktree_base.clone(),
        ));
        Self::with_workspace_provider(config, workspaces)
    }

    /// Create an orchestrator over a custom workspace provider. The provider
    /// decides what "isolated workspace" means; the orchestrator only
    /// guarantees acquire/release pairing.
    pub fn with_workspace_provider(
        config: ParallelRunConfig,
        workspaces: SharedWorkspaceProvider,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_runs));
        Self {
            config,
            workspaces,
            locks: Arc::new(ExecutorLockManager::new()),
            semaphore,
        }
    }

    /// The configuration this orchestrator was built with.
    pub fn config(&self) -> &ParallelRunConfig {
        &self.config
    }

    /// Run ids currently claimed by an executor, per the lock manager's
    /// snapshot.
    pub fn get_active_runs(&self) -> Vec<RunId> {
        self.locks.get_locked_runs()
    }

    /// Execute one run end to end: lease workspace, claim lock, invoke the
    /// executor, then clean up whatever was acquired — on every exit path.
    ///
    /// Never panics and never returns an error; all failures are folded into
    /// the returned [`RunResult`].
    pub async fn execute_single(&self, run_id: &str, executor: Arc<dyn RunExecutor>) -> RunResult {
        let start_time = Utc::now();

        // Step 1: workspace lease. Nothing to clean up if this fails.
        let lease = match self.workspaces.acquire_workspace(run_id).await {
            Ok(lease) => lease,
            Err(err) => {
                warn!(run_id, %err, "workspace acquisition failed");
                return RunResult::failed(
                    run_id,
                    start_time,
                    format!("Failed to create worktree: {err}"),
                    None,
                );
            }
        };
        let workspace_path = lease.workspace_path.clone();

        // Step 2: executor lock. The workspace must still be released.
        if !self.locks.try_acquire_lock(run_id) {
            warn!(run_id, "executor lock busy, run already claimed");
            self.release_workspace_best_effort(run_id).await;
            return RunResult::failed(
                run_id,
                start_time,
                "Failed to acquire executor lock",
                Some(workspace_path),
            );
        }

        info!(run_id, workspace = %workspace_path.display(), "run started");

        // Step 3: the executor itself, bounded by the configured timeout.
        let exec_outcome = self.invoke_executor(run_id, executor, &lease).await;

        // Step 4: cleanup, unconditionally and in order. Lock first (cheap),
        // then the workspace (slow VCS work, outside any critical section).
        self.locks.release_lock(run_id);
        if self.config.cleanup_on_completion {
            self.release_workspace_best_effort(run_id).await;
        }

        match exec_outcome {
            Ok(()) => {
                info!(run_id, "run completed");
                RunResult::succeeded(run_id, start_time, Some(workspace_path))
            }
            Err(err) => {
                warn!(run_id, %err, "run failed");
                RunResult::failed(run_id, start_time, err.to_string(), Some(workspace_path))
            }
        }
    }

    /// Execute every run id under the concurrency bound and collect one
    /// result per submitted id. Completion order is not input order.
    pub async fn execute_parallel(
        &self,
        run_ids: &[RunId],
        executor: Arc<dyn RunExecutor>,
    ) -> Vec<RunResult> {
        let mut tasks: JoinSet<RunResult> = JoinSet::new();
        for run_id in run_ids {
            let orchestrator = self.clone();
            let executor = Arc::clone(&executor);
            let run_id = run_id.clone();
            tasks.spawn(async move {
                // Slot acquisition is the only blocking point in the
                // scheduler itself.
                let permit = match orchestrator.semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return RunResult::failed(
                            &run_id,
                            Utc::now(),
                            "Scheduler shut down before run could start",
                            None,
                        )
                    }
                };
                let result = orchestrator.execute_single(&run_id, executor).await;
                drop(permit);
                result
            });
        }

        let mut results = Vec::with_capacity(run_ids.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    // execute_single is panic-free by construction, so this
                    // only fires if a task was torn down externally.
                    error!(%join_err, "run task aborted");
                }
            }
        }

        // Every submitted id produces exactly one result, even for torn-down
        // tasks.
        for run_id in run_ids {
            if !results.iter().any(|r| &r.run_id == run_id) {
                results.push(RunResult::failed(
                    run_id,
                    Utc::now(),
                    "Run task aborted before producing a result",
                    None,
                ));
            }
        }
        results
    }

    /// Invoke the executor in its own task so a panic inside the callback
    /// cannot skip the cleanup path, applying the configured timeout.
    async fn invoke_executor(
        &self,
        run_id: &str,
        executor: Arc<dyn RunExecutor>,
        lease: &crate::workspace::WorkspaceLease,
    ) -> Result<(), ExecutorError> {
        let task_run_id = run_id.to_string();
        let workspace = lease.workspace_path.clone();
        let mut handle =
            tokio::spawn(async move { executor.execute(&task_run_id, &workspace).await });

        let joined = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_elapsed) => {
                    // Cancel the in-flight invocation; cleanup proceeds
                    // exactly as on any other failure path.
                    debug!(run_id, ?limit, "executor timed out, cancelling");
                    handle.abort();
                    return Err(ExecutorError::TimedOut(limit));
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ExecutorError::Failed(err.to_string())),
            Err(join_err) if join_err.is_panic() => {
                Err(ExecutorError::Panicked(join_err.to_string()))
            }
            Err(join_err) => Err(ExecutorError::Failed(join_err.to_string())),
        }
    }

    async fn release_workspace_best_effort(&self, run_id: &str) {
        if let Err(err) = self.workspaces.release_workspace(run_id).await {
            // Cleanup failures must not mask the run's own outcome.
            warn!(run_id, %err, "workspace release failed");
        }
    }
}

impl std::fmt::Debug for ParallelRunOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelRunOrchestrator")
            .field("config", &self.config)
            .field("active_runs", &self.get_active_runs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BoxError, WorkspaceError};
    use crate::executor::{BlockingExecutor, FnExecutor};
    use crate::workspace::{WorkspaceLease, WorkspaceProvider};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory workspace provider that counts acquire/release calls.
    #[derive(Default)]
    struct FakeWorkspaces {
        acquires: Mutex<HashMap<String, usize>>,
        releases: Mutex<HashMap<String, usize>>,
        fail_acquire_for: Option<String>,
    }

    impl FakeWorkspaces {
        fn failing_for(run_id: &str) -> Self {
            Self {
                fail_acquire_for: Some(run_id.to_string()),
                ..Self::default()
            }
        }

        fn acquire_count(&self, run_id: &str) -> usize {
            *self.acquires.lock().unwrap().get(run_id).unwrap_or(&0)
        }

        fn release_count(&self, run_id: &str) -> usize {
            *self.releases.lock().unwrap().get(run_id).unwrap_or(&0)
        }
    }

    #[async_trait]
    impl WorkspaceProvider for FakeWorkspaces {
        async fn acquire_workspace(&self, run_id: &str) -> Result<WorkspaceLease, WorkspaceError> {
            if self.fail_acquire_for.as_deref() == Some(run_id) {
                return Err(WorkspaceError::WorktreeAdd("disk full".to_string()));
            }
            *self
                .acquires
                .lock()
                .unwrap()
                .entry(run_id.to_string())
                .or_insert(0) += 1;
            Ok(WorkspaceLease {
                run_id: run_id.to_string(),
                workspace_path: PathBuf::from("/fake").join(run_id),
                created_at: Utc::now(),
            })
        }

        async fn release_workspace(&self, run_id: &str) -> Result<(), WorkspaceError> {
            *self
                .releases
                .lock()
                .unwrap()
                .entry(run_id.to_string())
                .or_insert(0) += 1;
            Ok(())
        }
    }

    fn orchestrator_with(
        workspaces: Arc<FakeWorkspaces>,
        max_concurrent: usize,
    ) -> ParallelRunOrchestrator {
        let config = ParallelRunConfig::new("/unused/repo", "/unused/worktrees")
            .with_max_concurrent_runs(max_concurrent);
        ParallelRunOrchestrator::with_workspace_provider(config, workspaces)
    }

    fn ok_executor() -> Arc<dyn RunExecutor> {
        Arc::new(FnExecutor::new(|_run_id, _workspace| async move { Ok(()) }))
    }

    #[tokio::test]
    async fn test_all_success_scenario() {
        let workspaces = Arc::new(FakeWorkspaces::default());
        let orchestrator = orchestrator_with(Arc::clone(&workspaces), 2);

        let run_ids = vec!["run1".to_string(), "run2".to_string()];
        let results = orchestrator.execute_parallel(&run_ids, ok_executor()).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        for run_id in &run_ids {
            assert_eq!(workspaces.acquire_count(run_id), 1);
            assert_eq!(workspaces.release_count(run_id), 1);
            assert!(!orchestrator.get_active_runs().contains(run_id));
        }
    }

    #[tokio::test]
    async fn test_isolation_one_failure_does_not_abort_batch() {
        let workspaces = Arc::new(FakeWorkspaces::default());
        let orchestrator = orchestrator_with(workspaces, 3);

        let executor = Arc::new(FnExecutor::new(|run_id: String, _workspace| async move {
            if run_id == "run2" {
                Err::<(), BoxError>("x marks the failure".into())
            } else {
                Ok(())
            }
        }));

        let run_ids: Vec<String> = ["run1", "run2", "run3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let results = orchestrator.execute_parallel(&run_ids, executor).await;

        assert_eq!(results.len(), 3);
        let by_id: HashMap<&str, &RunResult> =
            results.iter().map(|r| (r.run_id.as_str(), r)).collect();
        assert!(by_id["run1"].success);
        assert!(by_id["run3"].success);
        assert!(!by_id["run2"].success);
        assert!(by_id["run2"].error.as_deref().unwrap().contains("x"));
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let workspaces = Arc::new(FakeWorkspaces::default());
        let orchestrator = orchestrator_with(workspaces, 2);

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let in_flight_clone = Arc::clone(&in_flight);
        let max_clone = Arc::clone(&max_observed);

        let executor = Arc::new(FnExecutor::new(move |_run_id, _workspace| {
            let in_flight = Arc::clone(&in_flight_clone);
            let max_observed = Arc::clone(&max_clone);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        let run_ids: Vec<String> = (0..8).map(|i| format!("run-{i}")).collect();
        let results = orchestrator.execute_parallel(&run_ids, executor).await;

        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r.success));
        assert!(
            max_observed.load(Ordering::SeqCst) <= 2,
            "observed {} concurrent executors with a bound of 2",
            max_observed.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_workspace_failure_short_circuits() {
        let workspaces = Arc::new(FakeWorkspaces::failing_for("run1"));
        let orchestrator = orchestrator_with(Arc::clone(&workspaces), 1);

        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked_clone = Arc::clone(&invoked);
        let executor = Arc::new(FnExecutor::new(move |_run_id, _workspace| {
            let invoked = Arc::clone(&invoked_clone);
            async move {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        let result = orchestrator.execute_single("run1", executor).await;
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .starts_with("Failed to create worktree:"));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        // No lease was granted, so no release happens either.
        assert_eq!(workspaces.release_count("run1"), 0);
    }

    #[tokio::test]
    async fn test_lock_gating_releases_workspace() {
        let workspaces = Arc::new(FakeWorkspaces::default());
        let orchestrator = orchestrator_with(Arc::clone(&workspaces), 1);

        // Claim the lock out of band, as a duplicate submission would.
        assert!(orchestrator.locks.try_acquire_lock("run1"));

        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked_clone = Arc::clone(&invoked);
        let executor = Arc::new(FnExecutor::new(move |_run_id, _workspace| {
            let invoked = Arc::clone(&invoked_clone);
            async move {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        let result = orchestrator.execute_single("run1", executor).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Failed to acquire executor lock")
        );
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        // The already-created workspace is still released exactly once.
        assert_eq!(workspaces.acquire_count("run1"), 1);
        assert_eq!(workspaces.release_count("run1"), 1);
        // The out-of-band lock is untouched.
        assert!(orchestrator.locks.is_locked("run1"));
    }

    #[tokio::test]
    async fn test_exactly_once_cleanup_on_executor_error() {
        let workspaces = Arc::new(FakeWorkspaces::default());
        let orchestrator = orchestrator_with(Arc::clone(&workspaces), 1);

        let executor = Arc::new(FnExecutor::new(|_run_id, _workspace| async move {
            Err::<(), BoxError>("executor blew up".into())
        }));

        let result = orchestrator.execute_single("run1", executor).await;
        assert!(!result.success);
        assert_eq!(workspaces.release_count("run1"), 1);
        assert!(!orchestrator.locks.is_locked("run1"));
    }

    #[tokio::test]
    async fn test_cleanup_runs_even_when_executor_panics() {
        let workspaces = Arc::new(FakeWorkspaces::default());
        let orchestrator = orchestrator_with(Arc::clone(&workspaces), 1);

        let executor = Arc::new(FnExecutor::new(|run_id: String, _workspace| async move {
            if !run_id.is_empty() {
                panic!("executor panic");
            }
            Ok(())
        }));

        let result = orchestrator.execute_single("run1", executor).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("panic"));
        assert_eq!(workspaces.release_count("run1"), 1);
        assert!(!orchestrator.locks.is_locked("run1"));
    }

    #[tokio::test]
    async fn test_timeout_cancels_and_cleans_up() {
        let workspaces = Arc::new(FakeWorkspaces::default());
        let config = ParallelRunConfig::new("/unused/repo", "/unused/worktrees")
            .with_max_concurrent_runs(1)
            .with_timeout(Duration::from_millis(50));
        let orchestrator =
            ParallelRunOrchestrator::with_workspace_provider(config, workspaces.clone());

        let executor = Arc::new(FnExecutor::new(|_run_id, _workspace| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }));

        let result = orchestrator.execute_single("run1", executor).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(workspaces.release_count("run1"), 1);
        assert!(!orchestrator.locks.is_locked("run1"));
    }

    #[tokio::test]
    async fn test_cleanup_disabled_keeps_workspace() {
        let workspaces = Arc::new(FakeWorkspaces::default());
        let config = ParallelRunConfig::new("/unused/repo", "/unused/worktrees")
            .with_cleanup_on_completion(false);
        let orchestrator =
            ParallelRunOrchestrator::with_workspace_provider(config, workspaces.clone());

        let result = orchestrator.execute_single("run1", ok_executor()).await;
        assert!(result.success);
        assert_eq!(workspaces.release_count("run1"), 0);
        // The lock is still released even when the workspace is kept.
        assert!(!orchestrator.locks.is_locked("run1"));
    }

    #[tokio::test]
    async fn test_blocking_executor_through_orchestrator() {
        let workspaces = Arc::new(FakeWorkspaces::default());
        let orchestrator = orchestrator_with(workspaces, 2);

        let executor = Arc::new(BlockingExecutor::new(
            |run_id: &str, _workspace: &std::path::Path| {
                std::thread::sleep(Duration::from_millis(10));
                if run_id == "run-bad" {
                    Err("sync failure".into())
                } else {
                    Ok(())
                }
            },
        ));

        let run_ids: Vec<String> = vec!["run-good".into(), "run-bad".into()];
        let results = orchestrator.execute_parallel(&run_ids, executor).await;
        let by_id: HashMap<&str, &RunResult> =
            results.iter().map(|r| (r.run_id.as_str(), r)).collect();
        assert!(by_id["run-good"].success);
        assert!(!by_id["run-bad"].success);
    }

    #[tokio::test]
    async fn test_result_times_are_ordered() {
        let workspaces = Arc::new(FakeWorkspaces::default());
        let orchestrator = orchestrator_with(workspaces, 1);

        let result = orchestrator.execute_single("run1", ok_executor()).await;
        assert!(result.end_time >= result.start_time);
        assert_eq!(
            result.workspace_path.as_deref(),
            Some(std::path::Path::new("/fake/run1"))
        );
    }
}
