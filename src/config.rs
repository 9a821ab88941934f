//! Orchestrator configuration.
//!
//! `ParallelRunConfig` is immutable per orchestrator instance: build it once
//! with the builder-style setters (or load it from a TOML file) and hand it to
//! [`ParallelRunOrchestrator::new`](crate::orchestrator::ParallelRunOrchestrator::new).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default bound on concurrently executing runs.
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 3;

/// Errors raised while loading configuration from a file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or parsed as TOML.
    #[error("failed to load config: {0}")]
    Load(#[from] config::ConfigError),

    /// The parsed values are unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunable policy for one orchestrator instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelRunConfig {
    /// Maximum number of concurrently executing runs.
    /// Default: 3
    pub max_concurrent_runs: usize,

    /// Repository that worktrees are linked from.
    pub source_repo: PathBuf,

    /// Directory that per-run worktrees are materialized under, one
    /// subdirectory per run id.
    pub worktree_base: PathBuf,

    /// Whether to release the workspace lease and remove the worktree once a
    /// run finishes. Disable to keep workspaces around for inspection.
    /// Default: true
    pub cleanup_on_completion: bool,

    /// Upper bound on one executor invocation. `None` means unbounded.
    /// Default: None
    pub timeout: Option<Duration>,
}

/// On-disk shape of the TOML configuration file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    max_concurrent_runs: Option<usize>,
    source_repo: PathBuf,
    worktree_base: PathBuf,
    cleanup_on_completion: Option<bool>,
    timeout_seconds: Option<u64>,
}

impl ParallelRunConfig {
    /// Create a config for the given repository and worktree base with
    /// default policy values.
    pub fn new(source_repo: impl Into<PathBuf>, worktree_base: impl Into<PathBuf>) -> Self {
        Self {
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
            source_repo: source_repo.into(),
            worktree_base: worktree_base.into(),
            cleanup_on_completion: true,
            timeout: None,
        }
    }

    /// Sets the concurrency bound. Values below 1 are clamped to 1.
    pub fn with_max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = max.max(1);
        self
    }

    /// Sets whether workspaces are cleaned up when a run finishes.
    pub fn with_cleanup_on_completion(mut self, cleanup: bool) -> Self {
        self.cleanup_on_completion = cleanup;
        self
    }

    /// Sets the per-run executor timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Load configuration from a TOML file.
    ///
    /// `source_repo` and `worktree_base` are required; the remaining keys
    /// fall back to the defaults of [`ParallelRunConfig::new`].
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        if raw.max_concurrent_runs == Some(0) {
            return Err(ConfigError::Invalid(
                "max_concurrent_runs must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            max_concurrent_runs: raw
                .max_concurrent_runs
                .unwrap_or(DEFAULT_MAX_CONCURRENT_RUNS),
            source_repo: raw.source_repo,
            worktree_base: raw.worktree_base,
            cleanup_on_completion: raw.cleanup_on_completion.unwrap_or(true),
            timeout: raw.timeout_seconds.map(Duration::from_secs),
        })
    }
}
