// ABOUTME: Mutating git operations on one (workspace, repository) pair, run under its mutation gate

use super::error::{SyncError, SyncResult};
use super::locks::MutationGuard;
use crate::git::{GitService, MergeOutcome, RebaseOutcome, RevertOutcome};
use crate::models::{ConflictOp, Merge, WorktreeTarget};
use crate::store::{CheckpointStore, MergeHistoryLog, RepositoryRegistry};
use git2::{Oid, Repository};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// What a successful mutation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OperationOutcome {
    Committed {
        commit: String,
    },
    Undone {
        head: String,
    },
    Merged {
        merge_commit: String,
        /// New branch head when the last branch commit's message was rewritten.
        amended_head: Option<String>,
        stamped_runs: Vec<Uuid>,
    },
    Reverted {
        revert_commit: String,
        merge_commit: String,
    },
    Pushed {
        branch: String,
    },
    Rebased {
        new_head: String,
        target_branch: String,
    },
    Retargeted {
        target_branch: String,
    },
    Aborted {
        op: ConflictOp,
    },
}

#[derive(Clone)]
pub struct GitOperationExecutor {
    git: GitService,
    registry: Arc<RepositoryRegistry>,
    checkpoints: Arc<CheckpointStore>,
    merges: Arc<MergeHistoryLog>,
}

impl GitOperationExecutor {
    pub fn new(
        git: GitService,
        registry: Arc<RepositoryRegistry>,
        checkpoints: Arc<CheckpointStore>,
        merges: Arc<MergeHistoryLog>,
    ) -> Self {
        Self {
            git,
            registry,
            checkpoints,
            merges,
        }
    }

    /// Commit everything in the worktree. Concludes a merge whose conflicts
    /// have all been resolved and staged.
    pub async fn commit(&self, gate: &MutationGuard, target: &WorktreeTarget, message: &str) -> SyncResult<OperationOutcome> {
        let _write = gate.write().await;
        let (git, owned, message) = (self.git.clone(), target.clone(), message.to_string());

        let oid = tokio::task::spawn_blocking(move || {
            let repo = open_worktree(&git, &owned)?;
            ensure_no_conflicts(&git, &repo)?;
            ensure_not_rebasing(&git, &repo)?;
            drop(repo);
            git.commit_worktree(&owned.worktree_path, &message)
                .map_err(|e| SyncError::git("commit", e))?
                .ok_or(SyncError::NoChanges)
        })
        .await??;

        info!(
            workspace_id = %target.workspace_id,
            repo_id = %target.repo_id,
            "Committed {} on {}",
            oid,
            target.branch
        );
        Ok(OperationOutcome::Committed {
            commit: oid.to_string(),
        })
    }

    /// Move the branch back to its head's parent, keeping the changes in the worktree.
    pub async fn undo_last_commit(&self, gate: &MutationGuard, target: &WorktreeTarget) -> SyncResult<OperationOutcome> {
        let _write = gate.write().await;
        let (git, owned) = (self.git.clone(), target.clone());

        let head = tokio::task::spawn_blocking(move || {
            let repo = open_worktree(&git, &owned)?;
            ensure_no_conflicts(&git, &repo)?;
            ensure_not_rebasing(&git, &repo)?;

            let target_oid = resolve_target(&git, &repo, &owned.target_branch)?.0;
            let head = git
                .branch_head(&repo, &owned.branch)
                .map_err(|e| SyncError::git("undo", e))?;
            let (ahead, _) = git
                .ahead_behind(&repo, head, target_oid)
                .map_err(|e| SyncError::git("undo", e))?;
            if ahead == 0 {
                return Err(SyncError::NothingToUndo);
            }
            drop(repo);

            git.undo_last_commit(&owned.worktree_path)
                .map_err(|e| SyncError::git("undo", e))
        })
        .await??;

        info!(
            workspace_id = %target.workspace_id,
            repo_id = %target.repo_id,
            "Undid last commit, {} is now at {}",
            target.branch,
            head
        );
        Ok(OperationOutcome::Undone {
            head: head.to_string(),
        })
    }

    /// Merge the workspace branch into its local target branch with `message`.
    /// With `branch_commit_message`, the branch's last commit is reworded first
    /// unless that commit is already on the remote.
    pub async fn merge(
        &self,
        gate: &MutationGuard,
        target: &WorktreeTarget,
        message: &str,
        branch_commit_message: Option<&str>,
    ) -> SyncResult<OperationOutcome> {
        let _write = gate.write().await;

        let (git, owned) = (self.git.clone(), target.clone());
        let head = tokio::task::spawn_blocking(move || {
            let repo = open_worktree(&git, &owned)?;
            ensure_no_conflicts(&git, &repo)?;
            ensure_not_rebasing(&git, &repo)?;

            let (target_oid, is_remote) = resolve_target(&git, &repo, &owned.target_branch)?;
            if is_remote {
                return Err(SyncError::InvalidState(format!(
                    "target branch {} exists only on the remote; create it locally to merge into it",
                    owned.target_branch
                )));
            }
            if git.has_changes(&repo).map_err(|e| SyncError::git("merge", e))? {
                return Err(SyncError::InvalidState(format!(
                    "{} has uncommitted changes; commit or discard them before merging",
                    owned.branch
                )));
            }
            let head = git
                .branch_head(&repo, &owned.branch)
                .map_err(|e| SyncError::git("merge", e))?;
            if git
                .is_ancestor(&repo, head, target_oid)
                .map_err(|e| SyncError::git("merge", e))?
            {
                return Err(SyncError::AlreadyMerged);
            }
            Ok(head)
        })
        .await??;

        let amended_head = match branch_commit_message.map(str::trim).filter(|m| !m.is_empty()) {
            Some(branch_message) => self.amend_branch_head(target, head, branch_message).await?,
            None => None,
        };

        let (git, owned, message) = (self.git.clone(), target.clone(), message.to_string());
        let outcome = tokio::task::spawn_blocking(move || {
            git.merge_into_target(
                &owned.repo_path,
                &owned.worktree_path,
                &owned.branch,
                &owned.target_branch,
                &message,
            )
            .map_err(|e| SyncError::git("merge", e))
        })
        .await??;

        let merge_oid = match outcome {
            MergeOutcome::Merged(oid) => oid,
            MergeOutcome::AlreadyMerged => return Err(SyncError::AlreadyMerged),
            MergeOutcome::Conflicts(files) => {
                return Err(SyncError::conflict(Some(ConflictOp::Merge), files))
            }
        };

        let merge_commit = merge_oid.to_string();
        self.merges
            .append(
                target.workspace_id,
                target.repo_id,
                &target.target_branch,
                Merge::direct(&merge_commit),
            )
            .await?;
        let stamped_runs = self.stamp_checkpoints(target, merge_oid).await?;

        info!(
            workspace_id = %target.workspace_id,
            repo_id = %target.repo_id,
            "Merged {} into {} as {}",
            target.branch,
            target.target_branch,
            merge_commit
        );
        Ok(OperationOutcome::Merged {
            merge_commit,
            amended_head: amended_head.map(|oid| oid.to_string()),
            stamped_runs,
        })
    }

    /// Undo the latest direct merge on its target branch with a revert commit.
    pub async fn revert_last_merge(&self, gate: &MutationGuard, target: &WorktreeTarget) -> SyncResult<OperationOutcome> {
        let record = self
            .merges
            .latest(target.workspace_id, target.repo_id)
            .await
            .ok_or(SyncError::NoDirectMergeToRevert)?;
        let merge_commit = match &record.merge {
            Merge::Direct { merge_commit } => merge_commit.clone(),
            Merge::PullRequest(_) => return Err(SyncError::NoDirectMergeToRevert),
        };
        if self.merges.is_reverted(&merge_commit).await {
            return Err(SyncError::NoDirectMergeToRevert);
        }

        let _write = gate.write().await;
        let (git, owned, merged) = (self.git.clone(), target.clone(), merge_commit.clone());
        let target_branch = record.target_branch.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let repo = open_worktree(&git, &owned)?;
            ensure_no_conflicts(&git, &repo)?;
            drop(repo);
            git.revert_on_target(&owned.repo_path, &target_branch, &merged)
                .map_err(|e| SyncError::git("revert merge", e))
        })
        .await??;

        let revert_oid = match outcome {
            RevertOutcome::Reverted(oid) => oid,
            RevertOutcome::Conflicts(files) => {
                return Err(SyncError::conflict(Some(ConflictOp::Revert), files))
            }
        };
        self.merges.record_revert(&merge_commit).await?;

        info!(
            workspace_id = %target.workspace_id,
            repo_id = %target.repo_id,
            "Reverted merge {} on {} with {}",
            merge_commit,
            record.target_branch,
            revert_oid
        );
        Ok(OperationOutcome::Reverted {
            revert_commit: revert_oid.to_string(),
            merge_commit,
        })
    }

    /// Push the workspace branch. Only the gate is held, so reads carry on
    /// while the network call runs.
    pub async fn push(&self, _gate: &MutationGuard, target: &WorktreeTarget) -> SyncResult<OperationOutcome> {
        let (git, owned) = (self.git.clone(), target.clone());
        tokio::task::spawn_blocking(move || {
            let repo = open_worktree(&git, &owned)?;
            ensure_no_conflicts(&git, &repo)?;
            ensure_not_rebasing(&git, &repo)
        })
        .await??;

        self.git
            .push_branch(&target.worktree_path, &target.branch)
            .await
            .map_err(|e| SyncError::git("push", e))?;

        Ok(OperationOutcome::Pushed {
            branch: target.branch.clone(),
        })
    }

    /// Replay the branch's commits after `old_upstream` onto `new_base`; both
    /// default to the current target branch. A new base becomes the target.
    pub async fn rebase(
        &self,
        gate: &MutationGuard,
        target: &WorktreeTarget,
        new_base: Option<&str>,
        old_upstream: Option<&str>,
        cancel: CancellationToken,
    ) -> SyncResult<OperationOutcome> {
        let new_base = new_base.unwrap_or(&target.target_branch).to_string();
        let old_upstream = old_upstream.unwrap_or(&target.target_branch).to_string();

        let write = gate.write().await;
        let (git, owned, base) = (self.git.clone(), target.clone(), new_base.clone());
        let outcome = tokio::task::spawn_blocking(move || {
            let repo = open_worktree(&git, &owned)?;
            ensure_no_conflicts(&git, &repo)?;
            ensure_not_rebasing(&git, &repo)?;
            resolve_target(&git, &repo, &base)?;
            drop(repo);
            git.rebase_onto(&owned.worktree_path, &owned.branch, &base, &old_upstream, &cancel)
                .map_err(|e| SyncError::git("rebase", e))
        })
        .await??;
        drop(write);

        if new_base != target.target_branch && !matches!(outcome, RebaseOutcome::Cancelled { .. }) {
            self.registry
                .set_target_branch(target.workspace_id, target.repo_id, &new_base)
                .await?;
            info!(
                workspace_id = %target.workspace_id,
                repo_id = %target.repo_id,
                "Target branch changed from {} to {} by rebase",
                target.target_branch,
                new_base
            );
        }

        rebase_result(outcome, new_base)
    }

    /// Commit the resolved current step of a stopped rebase and replay the rest.
    pub async fn continue_rebase(
        &self,
        gate: &MutationGuard,
        target: &WorktreeTarget,
        cancel: CancellationToken,
    ) -> SyncResult<OperationOutcome> {
        let _write = gate.write().await;
        let (git, owned) = (self.git.clone(), target.clone());
        let outcome = tokio::task::spawn_blocking(move || {
            let repo = open_worktree(&git, &owned)?;
            if !git.is_rebase_in_progress(&repo) {
                return Err(SyncError::InvalidState("no rebase in progress".to_string()));
            }
            drop(repo);
            git.continue_rebase(&owned.worktree_path, &cancel)
                .map_err(|e| SyncError::git("continue rebase", e))
        })
        .await??;

        rebase_result(outcome, target.target_branch.clone())
    }

    /// Abort the merge or rebase that left the worktree conflicted.
    pub async fn abort_conflicts(&self, gate: &MutationGuard, target: &WorktreeTarget) -> SyncResult<OperationOutcome> {
        let _write = gate.write().await;
        let (git, owned) = (self.git.clone(), target.clone());
        let op = tokio::task::spawn_blocking(move || {
            let repo = open_worktree(&git, &owned)?;
            if git.is_rebase_in_progress(&repo) {
                drop(repo);
                git.abort_rebase(&owned.worktree_path)
                    .map_err(|e| SyncError::git("abort rebase", e))?;
                return Ok(ConflictOp::Rebase);
            }

            let conflicted = git
                .conflicted_files(&repo)
                .map_err(|e| SyncError::git("abort", e))?;
            let op = match (git.conflict_op(&repo), conflicted.is_empty()) {
                (Some(op), _) => op,
                (None, false) => ConflictOp::Merge,
                (None, true) => {
                    return Err(SyncError::InvalidState(
                        "no merge or rebase in progress".to_string(),
                    ))
                }
            };
            drop(repo);
            git.abort_merge(&owned.worktree_path)
                .map_err(|e| SyncError::git("abort merge", e))?;
            Ok(op)
        })
        .await??;

        info!(
            workspace_id = %target.workspace_id,
            repo_id = %target.repo_id,
            "Aborted in-progress {}",
            op
        );
        Ok(OperationOutcome::Aborted { op })
    }

    /// Point the pair at a different target branch. History is not touched.
    pub async fn change_target(&self, _gate: &MutationGuard, target: &WorktreeTarget, branch: &str) -> SyncResult<OperationOutcome> {
        let (git, owned, new_target) = (self.git.clone(), target.clone(), branch.to_string());
        tokio::task::spawn_blocking(move || {
            let repo = open_worktree(&git, &owned)?;
            ensure_no_conflicts(&git, &repo)?;
            ensure_not_rebasing(&git, &repo)?;
            resolve_target(&git, &repo, &new_target).map(|_| ())
        })
        .await??;

        self.registry
            .set_target_branch(target.workspace_id, target.repo_id, branch)
            .await?;
        info!(
            workspace_id = %target.workspace_id,
            repo_id = %target.repo_id,
            "Target branch changed from {} to {}",
            target.target_branch,
            branch
        );
        Ok(OperationOutcome::Retargeted {
            target_branch: branch.to_string(),
        })
    }

    async fn amend_branch_head(&self, target: &WorktreeTarget, head: Oid, message: &str) -> SyncResult<Option<Oid>> {
        let (git, owned, message) = (self.git.clone(), target.clone(), message.to_string());
        let amended = tokio::task::spawn_blocking(move || {
            let repo = open_worktree(&git, &owned)?;
            if git
                .is_pushed(&repo, &owned.branch, head)
                .map_err(|e| SyncError::git("amend", e))?
            {
                warn!(
                    "Not rewording {} on {}: the commit is already on the remote",
                    head, owned.branch
                );
                return Ok(None);
            }
            drop(repo);
            git.amend_head_message(&owned.worktree_path, &message)
                .map(Some)
                .map_err(|e| SyncError::git("amend", e))
        })
        .await??;

        match amended {
            Some((old, new)) if old != new => {
                self.checkpoints
                    .replace_after_head(target.workspace_id, target.repo_id, &old.to_string(), &new.to_string())
                    .await?;
                Ok(Some(new))
            }
            _ => Ok(None),
        }
    }

    /// Stamp every closed, unmerged checkpoint whose final head the merge contains.
    async fn stamp_checkpoints(&self, target: &WorktreeTarget, merge_oid: Oid) -> SyncResult<Vec<Uuid>> {
        let candidates: Vec<(Uuid, String)> = self
            .checkpoints
            .unmerged(target.workspace_id, target.repo_id)
            .await
            .into_iter()
            .map(|c| (c.run_id, c.tip().to_string()))
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let (git, repo_path) = (self.git.clone(), target.repo_path.clone());
        let contained = tokio::task::spawn_blocking(move || -> SyncResult<Vec<Uuid>> {
            let repo = git
                .open(&repo_path)
                .map_err(|e| SyncError::git("record merge", e))?;
            Ok(candidates
                .into_iter()
                .filter(|(_, tip)| {
                    Oid::from_str(tip)
                        .ok()
                        .and_then(|oid| git.is_ancestor(&repo, oid, merge_oid).ok())
                        .unwrap_or(false)
                })
                .map(|(run_id, _)| run_id)
                .collect())
        })
        .await??;

        Ok(self
            .checkpoints
            .record_merge(
                target.workspace_id,
                target.repo_id,
                &contained,
                &merge_oid.to_string(),
            )
            .await?)
    }
}

fn rebase_result(outcome: RebaseOutcome, target_branch: String) -> SyncResult<OperationOutcome> {
    match outcome {
        RebaseOutcome::Completed { new_head } => Ok(OperationOutcome::Rebased {
            new_head: new_head.to_string(),
            target_branch,
        }),
        RebaseOutcome::Conflicts(files) => Err(SyncError::conflict(Some(ConflictOp::Rebase), files)),
        RebaseOutcome::Cancelled { applied, remaining } => Err(SyncError::Cancelled(format!(
            "rebase stopped after {applied} step(s) with {remaining} left; continue or abort it"
        ))),
    }
}

fn open_worktree(git: &GitService, target: &WorktreeTarget) -> SyncResult<Repository> {
    git.open(&target.worktree_path).map_err(|e| {
        SyncError::RepositoryUnavailable(format!(
            "workspace {} repository {}: {}",
            target.workspace_id, target.repo_id, e
        ))
    })
}

fn ensure_no_conflicts(git: &GitService, repo: &Repository) -> SyncResult<()> {
    let files = git
        .conflicted_files(repo)
        .map_err(|e| SyncError::git("check conflicts", e))?;
    if files.is_empty() {
        Ok(())
    } else {
        Err(SyncError::conflict(git.conflict_op(repo), files))
    }
}

fn ensure_not_rebasing(git: &GitService, repo: &Repository) -> SyncResult<()> {
    if git.is_rebase_in_progress(repo) {
        return Err(SyncError::InvalidState(
            "a rebase is in progress; continue or abort it first".to_string(),
        ));
    }
    Ok(())
}

/// `(commit, is_remote)` of a target branch.
fn resolve_target(git: &GitService, repo: &Repository, branch: &str) -> SyncResult<(Oid, bool)> {
    git.resolve_branch(repo, branch)
        .map_err(|e| SyncError::git("resolve target", e))?
        .map(|resolved| (resolved.oid, resolved.is_remote))
        .ok_or_else(|| SyncError::NoTargetBranch(branch.to_string()))
}
