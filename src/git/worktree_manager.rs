// ABOUTME: Creates and removes the per-workspace git worktrees under the configured worktree root

use git2::{BranchType, Repository};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum WorktreeError {
    #[error("Git repository error: {0}")]
    Git(#[from] git2::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Worktree already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("Invalid branch name: {0}")]
    InvalidBranchName(String),
    #[error("Base branch not found: {0}")]
    BaseBranchNotFound(String),
    #[error("Command execution failed: {0}")]
    CommandFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub workspace_id: Uuid,
    pub path: PathBuf,
    pub branch_name: String,
    pub source_repository: PathBuf,
    pub head_commit: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorktreeManager {
    base_worktree_dir: PathBuf,
}

impl WorktreeManager {
    pub fn with_base_dir(base_dir: PathBuf) -> Result<Self, WorktreeError> {
        std::fs::create_dir_all(base_dir.join("by-name"))?;
        Ok(Self {
            base_worktree_dir: base_dir,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_worktree_dir
    }

    /// Check out `branch_name` in a fresh worktree of `repository_path`,
    /// creating the branch from `base_branch` (local or remote-tracking) first
    /// when it does not exist yet.
    pub fn create_worktree(
        &self,
        workspace_id: Uuid,
        repository_path: &Path,
        branch_name: &str,
        base_branch: &str,
    ) -> Result<WorktreeInfo, WorktreeError> {
        info!(
            "Creating worktree for workspace {} with branch {}",
            workspace_id, branch_name
        );
        Self::validate_branch_name(branch_name)?;

        let repo = Repository::open(repository_path)?;
        let worktree_path = self.generate_worktree_path(workspace_id, repository_path, branch_name);
        if worktree_path.exists() {
            return Err(WorktreeError::AlreadyExists(worktree_path));
        }

        ensure_branch_exists(&repo, branch_name, base_branch)?;
        run_git(
            repository_path,
            &["worktree".as_ref(), "add".as_ref(), worktree_path.as_os_str(), branch_name.as_ref()],
        )
        .map_err(|e| WorktreeError::CommandFailed(format!("Failed to create worktree: {e}")))?;

        let head_commit = Repository::open(&worktree_path)?
            .head()
            .ok()
            .and_then(|head| head.target())
            .map(|oid| oid.to_string());

        info!("Created worktree at {}", worktree_path.display());
        Ok(WorktreeInfo {
            workspace_id,
            path: worktree_path,
            branch_name: branch_name.to_string(),
            source_repository: repository_path.to_path_buf(),
            head_commit,
        })
    }

    /// Remove a worktree of `repository_path`. A directory that is already gone
    /// only has its stale administrative entry pruned.
    pub fn remove_worktree(&self, repository_path: &Path, worktree_path: &Path) -> Result<(), WorktreeError> {
        if !worktree_path.exists() {
            warn!(
                "Worktree {} is already gone, pruning metadata",
                worktree_path.display()
            );
            run_git(repository_path, &["worktree".as_ref(), "prune".as_ref()])
                .map_err(WorktreeError::CommandFailed)?;
            return Ok(());
        }

        let remove = ["worktree".as_ref(), "remove".as_ref(), worktree_path.as_os_str()];
        if let Err(error) = run_git(repository_path, &remove) {
            warn!("Git worktree remove failed, trying force remove: {}", error);
            let force = [
                "worktree".as_ref(),
                "remove".as_ref(),
                "--force".as_ref(),
                worktree_path.as_os_str(),
            ];
            run_git(repository_path, &force)
                .map_err(|e| WorktreeError::CommandFailed(format!("Failed to remove worktree: {e}")))?;
        }

        info!("Removed worktree {}", worktree_path.display());
        Ok(())
    }

    pub fn validate_branch_name(name: &str) -> Result<(), WorktreeError> {
        if name.is_empty() {
            return Err(WorktreeError::InvalidBranchName(
                "Branch name cannot be empty".to_string(),
            ));
        }

        let invalid_chars = [' ', '~', '^', ':', '?', '*', '[', '\\'];
        if name.chars().any(|c| invalid_chars.contains(&c) || c.is_control()) {
            return Err(WorktreeError::InvalidBranchName(format!(
                "Branch name contains invalid characters: {name}"
            )));
        }

        if name.starts_with('-')
            || name.ends_with('/')
            || name.ends_with(".lock")
            || name.contains("//")
            || name.contains("..")
        {
            return Err(WorktreeError::InvalidBranchName(format!(
                "Invalid branch name format: {name}"
            )));
        }

        Ok(())
    }

    fn generate_worktree_path(&self, workspace_id: Uuid, repository_path: &Path, branch_name: &str) -> PathBuf {
        let repo_name = repository_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown-repo");
        let short_id = &workspace_id.simple().to_string()[..8];
        let dir_name = format!(
            "{}--{}--{}",
            sanitize_name(repo_name),
            sanitize_name(branch_name),
            short_id
        );
        self.base_worktree_dir.join("by-name").join(dir_name)
    }
}

fn ensure_branch_exists(repo: &Repository, branch_name: &str, base_branch: &str) -> Result<(), WorktreeError> {
    if repo.find_branch(branch_name, BranchType::Local).is_ok() {
        debug!("Branch {} already exists", branch_name);
        return Ok(());
    }

    let base = repo
        .find_branch(base_branch, BranchType::Local)
        .or_else(|_| repo.find_branch(base_branch, BranchType::Remote))
        .map_err(|_| WorktreeError::BaseBranchNotFound(base_branch.to_string()))?;
    let base_commit = base.get().peel_to_commit()?;

    repo.branch(branch_name, &base_commit, false)?;
    info!("Created new branch: {} from {}", branch_name, base_branch);
    Ok(())
}

fn run_git(repo_path: &Path, args: &[&std::ffi::OsStr]) -> Result<(), String> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .map_err(|e| e.to_string())?;

    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '-',
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}
