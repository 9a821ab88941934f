//! The executor callback seam.
//!
//! The orchestrator invokes every run through one explicit calling
//! convention: the [`RunExecutor`] trait. Async callers implement it directly
//! or wrap a closure in [`FnExecutor`]; synchronous callbacks go through
//! [`BlockingExecutor`], which bridges them onto the blocking thread pool so
//! they can never starve the scheduler's own tasks.
//!
//! Returning `Err` is the only recognized failure signal; return values are
//! otherwise opaque to the core.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BoxError;

/// One run's unit of work, executed inside an isolated workspace.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    /// Execute the run in the given workspace. The workspace is exclusively
    /// leased to this run for the duration of the call.
    async fn execute(&self, run_id: &str, workspace: &Path) -> Result<(), BoxError>;
}

/// Adapter for async closures.
///
/// ```ignore
/// let executor = FnExecutor::new(|run_id, workspace| async move {
///     tokio::fs::write(workspace.join("out.txt"), run_id).await?;
///     Ok(())
/// });
/// ```
pub struct FnExecutor<F> {
    f: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(String, PathBuf) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    /// Wrap an async closure as a [`RunExecutor`].
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> RunExecutor for FnExecutor<F>
where
    F: Fn(String, PathBuf) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    async fn execute(&self, run_id: &str, workspace: &Path) -> Result<(), BoxError> {
        (self.f)(run_id.to_string(), workspace.to_path_buf()).await
    }
}

/// Adapter for synchronous callbacks.
///
/// The closure runs on `tokio::task::spawn_blocking`, keeping the scheduler's
/// concurrency-accounting tasks responsive even when the callback blocks on
/// subprocess or filesystem work.
pub struct BlockingExecutor<F> {
    f: Arc<F>,
}

impl<F> BlockingExecutor<F>
where
    F: Fn(&str, &Path) -> Result<(), BoxError> + Send + Sync + 'static,
{
    /// Wrap a synchronous closure as a [`RunExecutor`].
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl<F> RunExecutor for BlockingExecutor<F>
where
    F: Fn(&str, &Path) -> Result<(), BoxError> + Send + Sync + 'static,
{
    async fn execute(&self, run_id: &str, workspace: &Path) -> Result<(), BoxError> {
        let f = Arc::clone(&self.f);
        let run_id = run_id.to_string();
        let workspace = workspace.to_path_buf();
        tokio::task::spawn_blocking(move || f(&run_id, &workspace))
            .await
            .map_err(|join_err| -> BoxError { Box::new(join_err) })?
    }
}
