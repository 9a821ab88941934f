//! Thin wrapper over the `git worktree` CLI.
//!
//! Worktree creation and removal go through the git CLI rather than a
//! libgit2-style binding: the CLI refuses to clobber uncommitted changes and
//! keeps linked-worktree metadata consistent, which matters when many runs
//! add and remove trees against the same source repository.

use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

use crate::error::WorkspaceError;

/// Raw outcome of one git invocation, before it is mapped onto the
/// subsystem's error taxonomy.
enum GitFailure {
    NotAvailable,
    Failed(String),
}

/// Invokes `git -C <repo> worktree …` subcommands.
#[derive(Debug, Clone, Default)]
pub struct GitWorktreeCli;

impl GitWorktreeCli {
    pub fn new() -> Self {
        Self
    }

    /// Run `git worktree add --detach <path>`, materializing a linked
    /// checkout at `worktree_path` without creating a branch in the source
    /// repository.
    pub fn worktree_add_detached(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
    ) -> Result<(), WorkspaceError> {
        let args: Vec<OsString> = vec![
            "worktree".into(),
            "add".into(),
            "--detach".into(),
            worktree_path.as_os_str().into(),
        ];
        self.git(repo_path, args).map(|_| ()).map_err(|e| match e {
            GitFailure::NotAvailable => WorkspaceError::GitNotAvailable,
            GitFailure::Failed(stderr) => WorkspaceError::WorktreeAdd(stderr),
        })
    }

    /// Run `git worktree remove [--force] <path>`.
    pub fn worktree_remove(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        force: bool,
    ) -> Result<(), WorkspaceError> {
        let mut args: Vec<OsString> = vec!["worktree".into(), "remove".into()];
        if force {
            args.push("--force".into());
        }
        args.push(worktree_path.as_os_str().into());
        self.git(repo_path, args).map(|_| ()).map_err(|e| match e {
            GitFailure::NotAvailable => WorkspaceError::GitNotAvailable,
            GitFailure::Failed(stderr) => WorkspaceError::WorktreeRemove(stderr),
        })
    }

    /// Run `git worktree prune`, dropping metadata for trees whose
    /// directories no longer exist. Failures here are non-fatal to callers.
    pub fn worktree_prune(&self, repo_path: &Path) -> Result<(), WorkspaceError> {
        let args: Vec<OsString> = vec!["worktree".into(), "prune".into()];
        self.git(repo_path, args).map(|_| ()).map_err(|e| match e {
            GitFailure::NotAvailable => WorkspaceError::GitNotAvailable,
            GitFailure::Failed(stderr) => WorkspaceError::WorktreeRemove(stderr),
        })
    }

    fn git(&self, repo_path: &Path, args: Vec<OsString>) -> Result<String, GitFailure> {
        let output = Command::new("git")
            .arg("-C")
            .arg(repo_path)
            .args(&args)
            .output()
            .map_err(|_| GitFailure::NotAvailable)?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(GitFailure::Failed(stderr))
        }
    }
}

/// Initialize a repo with one commit so worktrees can be linked from it.
/// Shared fixture for workspace tests.
#[cfg(test)]
pub(crate) fn init_test_repo(path: &Path) {
    let run = |args: &[&str]| {
        let output = Command::new("git")
            .args(args)
            .current_dir(path)
            .output()
            .expect("failed to run git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    };
    run(&["init", "--initial-branch=main"]);
    run(&["config", "user.email", "test@example.com"]);
    run(&["config", "user.name", "Test User"]);
    std::fs::write(path.join("README.md"), "# test repo\n").unwrap();
    run(&["add", "."]);
    run(&["commit", "-m", "initial commit"]);
}
