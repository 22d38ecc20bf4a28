// ABOUTME: Computes a workspace branch's divergence, conflict and worktree status against its target

use super::error::{SyncError, SyncResult};
use crate::git::{GitServiceError, GitService};
use crate::models::{BranchStatus, WorktreeTarget};
use crate::store::MergeHistoryLog;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct BranchStatusService {
    git: GitService,
    merges: Arc<MergeHistoryLog>,
}

impl BranchStatusService {
    pub fn new(git: GitService, merges: Arc<MergeHistoryLog>) -> Self {
        Self { git, merges }
    }

    /// Read-only; callers hold the pair's snapshot read lock.
    pub async fn status(&self, target: &WorktreeTarget) -> SyncResult<BranchStatus> {
        let merges = self.merges.list(target.workspace_id, target.repo_id).await;
        let has_open_pull_request = merges.iter().any(|m| m.merge.is_open_pull_request());

        let git = self.git.clone();
        let owned = target.clone();
        let mut status =
            tokio::task::spawn_blocking(move || compute_status(&git, &owned, has_open_pull_request))
                .await??;
        status.merges = merges;
        Ok(status)
    }
}

/// Git-side status of one worktree; `merges` is left empty for the caller to fill.
pub fn compute_status(git: &GitService, target: &WorktreeTarget, include_remote: bool) -> SyncResult<BranchStatus> {
    let repo = git
        .open(&target.worktree_path)
        .map_err(|e| unavailable(target, e))?;
    let head = git
        .branch_head(&repo, &target.branch)
        .map_err(|e| unavailable(target, e))?;
    let resolved = git
        .resolve_branch(&repo, &target.target_branch)
        .map_err(|e| SyncError::git("status", e))?
        .ok_or_else(|| SyncError::NoTargetBranch(target.target_branch.clone()))?;

    let (commits_ahead, commits_behind) = git
        .ahead_behind(&repo, head, resolved.oid)
        .map_err(|e| SyncError::git("status", e))?;
    let conflicted_files = git
        .conflicted_files(&repo)
        .map_err(|e| SyncError::git("status", e))?;
    let (uncommitted_count, untracked_count) = git
        .change_counts(&repo)
        .map_err(|e| SyncError::git("status", e))?;

    let remote = if include_remote {
        git.remote_ahead_behind(&repo, &target.branch)
            .map_err(|e| SyncError::git("status", e))?
    } else {
        None
    };

    debug!(
        "Status of {} vs {}: +{} -{} ({} conflicted)",
        target.branch,
        resolved.name,
        commits_ahead,
        commits_behind,
        conflicted_files.len()
    );

    Ok(BranchStatus {
        commits_ahead,
        commits_behind,
        conflict_op: git.conflict_op(&repo),
        is_rebase_in_progress: git.is_rebase_in_progress(&repo),
        is_target_remote: resolved.is_remote,
        target_branch_name: resolved.name,
        head_oid: head.to_string(),
        has_uncommitted_changes: uncommitted_count + untracked_count > 0,
        uncommitted_count,
        untracked_count,
        remote_commits_ahead: remote.map(|(ahead, _)| ahead),
        remote_commits_behind: remote.map(|(_, behind)| behind),
        conflicted_files,
        merges: Vec::new(),
    })
}

fn unavailable(target: &WorktreeTarget, error: GitServiceError) -> SyncError {
    match error {
        GitServiceError::RepositoryNotFound(_) | GitServiceError::BranchNotFound(_) => {
            SyncError::RepositoryUnavailable(format!(
                "workspace {} repository {}: {}",
                target.workspace_id, target.repo_id, error
            ))
        }
        other => SyncError::git("status", other),
    }
}
