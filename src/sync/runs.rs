// ABOUTME: Adapter for automated execution runs: opens a checkpoint, holds the mutation gate, commits and closes

use super::diff_base::{DiffBaseResolver, DiffContext};
use super::error::{SyncError, SyncResult};
use super::executor::{GitOperationExecutor, OperationOutcome};
use super::locks::{MutationGuard, WorktreeLocks};
use crate::commit_message::CommitMessageService;
use crate::git::{DiffBuilder, GitService};
use crate::models::{Checkpoint, Diff, WorktreeTarget};
use crate::store::{CheckpointStore, RepositoryRegistry};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of finishing a run.
#[derive(Debug, Clone, Serialize)]
pub struct FinishedRun {
    pub checkpoint: Checkpoint,
    /// Commit created for changes the run left uncommitted.
    pub commit: Option<String>,
    /// Whether the commit message came from the generator rather than the fallback.
    pub generated_message: bool,
}

#[derive(Clone)]
pub struct ExecutionRuns {
    git: GitService,
    diffs: DiffBuilder,
    locks: Arc<WorktreeLocks>,
    registry: Arc<RepositoryRegistry>,
    checkpoints: Arc<CheckpointStore>,
    resolver: DiffBaseResolver,
    executor: GitOperationExecutor,
    messages: Option<Arc<CommitMessageService>>,
}

impl ExecutionRuns {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        git: GitService,
        diffs: DiffBuilder,
        locks: Arc<WorktreeLocks>,
        registry: Arc<RepositoryRegistry>,
        checkpoints: Arc<CheckpointStore>,
        resolver: DiffBaseResolver,
        executor: GitOperationExecutor,
        messages: Option<Arc<CommitMessageService>>,
    ) -> Self {
        Self {
            git,
            diffs,
            locks,
            registry,
            checkpoints,
            resolver,
            executor,
            messages,
        }
    }

    /// Begin a run on one pair. The returned lease holds the pair's mutation
    /// gate until it is finished or dropped, so manual operations are refused
    /// with `OperationInProgress` while the run edits the worktree.
    pub async fn start(&self, run_id: Uuid, workspace_id: Uuid, repo_id: Uuid) -> SyncResult<RunLease> {
        let target = self.registry.workspace_repo(workspace_id, repo_id).await?;
        let gate = self.locks.try_acquire(workspace_id, repo_id)?;

        let (git, owned) = (self.git.clone(), target.clone());
        let before_head = tokio::task::spawn_blocking(move || {
            let repo = git.open(&owned.worktree_path).map_err(|e| SyncError::git("start run", e))?;
            git.branch_head(&repo, &owned.branch)
                .map_err(|e| SyncError::git("start run", e))
        })
        .await??;

        let checkpoint = self
            .checkpoints
            .open_checkpoint(run_id, workspace_id, repo_id, before_head.to_string())
            .await?;
        info!(
            workspace_id = %workspace_id,
            repo_id = %repo_id,
            run_id = %run_id,
            "Execution run started at {}",
            checkpoint.before_head_commit
        );

        Ok(RunLease {
            runs: self.clone(),
            gate,
            target,
            checkpoint,
        })
    }
}

/// An execution run in progress on one (workspace, repository) pair.
pub struct RunLease {
    runs: ExecutionRuns,
    gate: MutationGuard,
    target: WorktreeTarget,
    checkpoint: Checkpoint,
}

impl RunLease {
    pub fn run_id(&self) -> Uuid {
        self.checkpoint.run_id
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn target(&self) -> &WorktreeTarget {
        &self.target
    }

    /// Commit whatever the run left in the worktree, close the checkpoint with
    /// the branch head, and release the gate. The commit message is generated
    /// from this run's own changes when a generator is configured; otherwise,
    /// or when generation fails, `fallback_message` is used.
    pub async fn finish(self, fallback_message: &str) -> SyncResult<FinishedRun> {
        let RunLease {
            runs,
            gate,
            target,
            checkpoint,
        } = self;
        let run_id = checkpoint.run_id;

        let generated = match &runs.messages {
            Some(messages) => match run_diffs(&runs, &target, run_id).await {
                Ok(diffs) => messages.run_commit_message(&diffs).await,
                Err(e) => {
                    warn!("Could not diff run {} for its commit message: {}", run_id, e);
                    None
                }
            },
            None => None,
        };
        let generated_message = generated.is_some();
        let message = generated.unwrap_or_else(|| fallback_message.to_string());

        let commit = match runs.executor.commit(&gate, &target, &message).await {
            Ok(OperationOutcome::Committed { commit }) => Some(commit),
            Ok(_) => None,
            Err(SyncError::NoChanges) => None,
            Err(e) => {
                warn!(
                    workspace_id = %target.workspace_id,
                    repo_id = %target.repo_id,
                    run_id = %run_id,
                    "Run commit failed, checkpoint left open: {}",
                    e
                );
                return Err(e);
            }
        };

        let (git, owned) = (runs.git.clone(), target.clone());
        let after_head = tokio::task::spawn_blocking(move || {
            let repo = git.open(&owned.worktree_path).map_err(|e| SyncError::git("finish run", e))?;
            git.branch_head(&repo, &owned.branch)
                .map_err(|e| SyncError::git("finish run", e))
        })
        .await??;

        let checkpoint = runs
            .checkpoints
            .close(run_id, target.repo_id, after_head.to_string())
            .await?;
        drop(gate);

        info!(
            workspace_id = %target.workspace_id,
            repo_id = %target.repo_id,
            run_id = %run_id,
            "Execution run finished at {}",
            after_head
        );
        Ok(FinishedRun {
            checkpoint,
            commit,
            generated_message,
        })
    }
}

async fn run_diffs(runs: &ExecutionRuns, target: &WorktreeTarget, run_id: Uuid) -> SyncResult<Vec<Diff>> {
    let base = runs
        .resolver
        .resolve(target, DiffContext::PostExecution { run_id })
        .await?;
    let (git, diffs, owned) = (runs.git.clone(), runs.diffs.clone(), target.clone());
    tokio::task::spawn_blocking(move || {
        let repo = git.open(&owned.worktree_path).map_err(|e| SyncError::git("diff", e))?;
        diffs
            .diff(&repo, Some(base.commit), base.target)
            .map_err(|e| SyncError::git("diff", e))
    })
    .await?
}
