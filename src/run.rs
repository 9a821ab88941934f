//! Run identifiers and per-run execution outcomes.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier for one autonomous build run. Created by the caller and
/// never interpreted by the core.
pub type RunId = String;

/// Outcome of one run's execution attempt.
///
/// Produced exactly once per `execute_single` call and never mutated after
/// return. Failures carry a human-readable `error` string; callers inspect it
/// for diagnostics rather than matching on error types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Identifier of the run this result belongs to.
    pub run_id: RunId,
    /// True when the executor completed normally.
    pub success: bool,
    /// Failure description when `success` is false.
    pub error: Option<String>,
    /// When the orchestrator began processing this run.
    pub start_time: DateTime<Utc>,
    /// When the orchestrator finished processing this run (cleanup included).
    pub end_time: DateTime<Utc>,
    /// Workspace the executor ran in, when one was materialized.
    pub workspace_path: Option<PathBuf>,
}

impl RunResult {
    /// Build a successful result, stamping the end time.
    pub fn succeeded(
        run_id: impl Into<RunId>,
        start_time: DateTime<Utc>,
        workspace_path: Option<PathBuf>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            success: true,
            error: None,
            start_time,
            end_time: Utc::now(),
            workspace_path,
        }
    }

    /// Build a failed result, stamping the end time.
    pub fn failed(
        run_id: impl Into<RunId>,
        start_time: DateTime<Utc>,
        error: impl Into<String>,
        workspace_path: Option<PathBuf>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            success: false,
            error: Some(error.into()),
            start_time,
            end_time: Utc::now(),
            workspace_path,
        }
    }

    /// Wall-clock duration of the attempt, cleanup included.
    pub fn duration(&self) -> chrono::Duration {
        self.end_time.signed_duration_since(self.start_time)
    }
}
