// ABOUTME: Public API of the engine: status and diff reads, mutating operations, pull request bookkeeping

use super::branch_status::BranchStatusService;
use super::diff_base::{DiffBaseResolver, DiffContext, ResolvedBase};
use super::error::{SyncError, SyncResult};
use super::executor::{GitOperationExecutor, OperationOutcome};
use super::locks::{MutationGuard, WorktreeLocks};
use super::runs::ExecutionRuns;
use crate::commit_message::{BranchCommitRequest, CommitMessageGenerator, CommitMessageService};
use crate::config::AppConfig;
use crate::git::{DiffBuilder, DiffTarget, GitService, WorktreeManager};
use crate::models::{
    BranchStatus, Checkpoint, CommitInfo, Diff, Merge, MergeRecord, MergeStatus, WorktreeTarget,
};
use crate::store::{CheckpointStore, MergeHistoryLog, RepositoryRegistry};
use anyhow::{Context, Result};
use git2::Oid;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of a mutating call together with the status read right after it.
#[derive(Debug)]
pub struct OperationReport {
    pub outcome: SyncResult<OperationOutcome>,
    /// `None` only when the status itself could not be computed.
    pub status: Option<BranchStatus>,
}

impl OperationReport {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn into_result(self) -> SyncResult<OperationOutcome> {
        self.outcome
    }
}

/// Caller-supplied messages for a merge.
#[derive(Debug, Clone, Default)]
pub struct MergeRequest {
    /// Merge commit message. Proposed by the generator, or a default, when absent.
    pub message: Option<String>,
    /// New message for the branch's last commit.
    pub branch_commit_message: Option<String>,
    /// Task details used when a merge message has to be proposed.
    pub task: Option<BranchCommitRequest>,
}

#[derive(Clone)]
pub struct WorkspaceSyncManager {
    git: GitService,
    diffs: DiffBuilder,
    registry: Arc<RepositoryRegistry>,
    checkpoints: Arc<CheckpointStore>,
    merges: Arc<MergeHistoryLog>,
    locks: Arc<WorktreeLocks>,
    status: BranchStatusService,
    resolver: DiffBaseResolver,
    executor: GitOperationExecutor,
    messages: Option<Arc<CommitMessageService>>,
    config: Arc<AppConfig>,
}

impl WorkspaceSyncManager {
    /// Open the JSON stores under `state_dir` and the worktree root under `worktree_dir`.
    pub fn open(config: AppConfig) -> Result<Self> {
        config.ensure_dirs()?;
        let worktrees = WorktreeManager::with_base_dir(config.worktree_dir.clone())
            .context("Failed to prepare worktree directory")?;
        let registry = RepositoryRegistry::open(config.state_dir.join("registry.json"), worktrees)
            .context("Failed to open repository registry")?;
        let checkpoints = CheckpointStore::open(config.state_dir.join("checkpoints.json"))
            .context("Failed to open checkpoint store")?;
        let merges = MergeHistoryLog::open(config.state_dir.join("merges.json"))
            .context("Failed to open merge history")?;
        Ok(Self::build(config, registry, checkpoints, merges))
    }

    /// Stores kept in memory only; worktrees are still created under `worktree_dir`.
    pub fn in_memory(config: AppConfig) -> Result<Self> {
        let worktrees = WorktreeManager::with_base_dir(config.worktree_dir.clone())
            .context("Failed to prepare worktree directory")?;
        Ok(Self::build(
            config,
            RepositoryRegistry::in_memory(worktrees),
            CheckpointStore::in_memory(),
            MergeHistoryLog::in_memory(),
        ))
    }

    fn build(
        config: AppConfig,
        registry: RepositoryRegistry,
        checkpoints: CheckpointStore,
        merges: MergeHistoryLog,
    ) -> Self {
        let git = GitService::from_config(&config);
        let registry = Arc::new(registry);
        let checkpoints = Arc::new(checkpoints);
        let merges = Arc::new(merges);
        let messages = CommitMessageService::from_config(&config.commit_message).map(Arc::new);

        Self {
            diffs: DiffBuilder::new(config.max_inline_diff_bytes),
            locks: Arc::new(WorktreeLocks::new()),
            status: BranchStatusService::new(git.clone(), merges.clone()),
            resolver: DiffBaseResolver::new(git.clone(), checkpoints.clone(), merges.clone()),
            executor: GitOperationExecutor::new(
                git.clone(),
                registry.clone(),
                checkpoints.clone(),
                merges.clone(),
            ),
            git,
            registry,
            checkpoints,
            merges,
            messages,
            config: Arc::new(config),
        }
    }

    /// Replace the configured commit message generator.
    pub fn with_message_generator(mut self, generator: Arc<dyn CommitMessageGenerator>) -> Self {
        self.messages = Some(Arc::new(CommitMessageService::new(
            generator,
            &self.config.commit_message,
        )));
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &RepositoryRegistry {
        &self.registry
    }

    /// Entry point for the automated execution collaborator.
    pub fn runs(&self) -> ExecutionRuns {
        ExecutionRuns::new(
            self.git.clone(),
            self.diffs.clone(),
            self.locks.clone(),
            self.registry.clone(),
            self.checkpoints.clone(),
            self.resolver.clone(),
            self.executor.clone(),
            self.messages.clone(),
        )
    }

    /// Remove a workspace's worktrees. Refused while any of its repositories
    /// has an operation or run in flight.
    pub async fn remove_workspace(&self, workspace_id: Uuid) -> SyncResult<()> {
        let workspace = self.registry.workspace(workspace_id).await?;
        let gates = workspace
            .repos
            .iter()
            .map(|repo| self.locks.try_acquire(workspace_id, repo.repo_id))
            .collect::<SyncResult<Vec<MutationGuard>>>()?;
        let removed = self.registry.remove_workspace(workspace_id).await;
        drop(gates);
        removed?;
        for repo in &workspace.repos {
            self.locks.forget(workspace_id, repo.repo_id);
        }
        Ok(())
    }

    // ---- reads -------------------------------------------------------------

    pub async fn status(&self, workspace_id: Uuid, repo_id: Uuid) -> SyncResult<BranchStatus> {
        let target = self.registry.workspace_repo(workspace_id, repo_id).await?;
        let _snapshot = self.locks.read(workspace_id, repo_id).await;
        self.status.status(&target).await
    }

    pub async fn resolve_base(
        &self,
        workspace_id: Uuid,
        repo_id: Uuid,
        context: DiffContext,
    ) -> SyncResult<ResolvedBase> {
        let target = self.registry.workspace_repo(workspace_id, repo_id).await?;
        let _snapshot = self.locks.read(workspace_id, repo_id).await;
        self.resolver.resolve(&target, context).await
    }

    /// Files changed since the base chosen for `context`.
    pub async fn diff(&self, workspace_id: Uuid, repo_id: Uuid, context: DiffContext) -> SyncResult<Vec<Diff>> {
        let target = self.registry.workspace_repo(workspace_id, repo_id).await?;
        let _snapshot = self.locks.read(workspace_id, repo_id).await;
        self.diff_unlocked(&target, context).await
    }

    async fn diff_unlocked(&self, target: &WorktreeTarget, context: DiffContext) -> SyncResult<Vec<Diff>> {
        let base = self.resolver.resolve(target, context).await?;
        let (git, diffs, owned) = (self.git.clone(), self.diffs.clone(), target.clone());
        tokio::task::spawn_blocking(move || {
            let repo = git
                .open(&owned.worktree_path)
                .map_err(|e| SyncError::git("diff", e))?;
            diffs
                .diff(&repo, Some(base.commit), base.target)
                .map_err(|e| SyncError::git("diff", e))
        })
        .await?
    }

    /// Commits on the workspace branch that the target does not have, newest first.
    pub async fn worktree_commits(&self, workspace_id: Uuid, repo_id: Uuid) -> SyncResult<Vec<CommitInfo>> {
        let target = self.registry.workspace_repo(workspace_id, repo_id).await?;
        let _snapshot = self.locks.read(workspace_id, repo_id).await;
        let git = self.git.clone();
        tokio::task::spawn_blocking(move || {
            let repo = git
                .open(&target.worktree_path)
                .map_err(|e| SyncError::RepositoryUnavailable(e.to_string()))?;
            let head = git
                .branch_head(&repo, &target.branch)
                .map_err(|e| SyncError::RepositoryUnavailable(e.to_string()))?;
            let hide = git
                .resolve_branch(&repo, &target.target_branch)
                .map_err(|e| SyncError::git("list commits", e))?
                .ok_or_else(|| SyncError::NoTargetBranch(target.target_branch.clone()))?
                .oid;
            git.list_commits(&repo, head, Some(hide))
                .map_err(|e| SyncError::git("list commits", e))
        })
        .await?
    }

    /// A commit against its first parent, or against the empty tree for a root commit.
    pub async fn commit_diff(&self, workspace_id: Uuid, repo_id: Uuid, commit_hash: &str) -> SyncResult<Vec<Diff>> {
        let oid = Oid::from_str(commit_hash)
            .map_err(|_| SyncError::NotFound(format!("commit {commit_hash}")))?;
        let target = self.registry.workspace_repo(workspace_id, repo_id).await?;
        let _snapshot = self.locks.read(workspace_id, repo_id).await;
        let (git, diffs, hash) = (self.git.clone(), self.diffs.clone(), commit_hash.to_string());
        tokio::task::spawn_blocking(move || {
            let repo = git
                .open(&target.worktree_path)
                .map_err(|e| SyncError::RepositoryUnavailable(e.to_string()))?;
            if repo.find_commit(oid).is_err() {
                return Err(SyncError::NotFound(format!("commit {hash}")));
            }
            diffs
                .commit_diff(&repo, oid)
                .map_err(|e| SyncError::git("commit diff", e))
        })
        .await?
    }

    pub async fn checkpoints(&self, workspace_id: Uuid, repo_id: Uuid) -> Vec<Checkpoint> {
        self.checkpoints.list(workspace_id, repo_id).await
    }

    pub async fn merges(&self, workspace_id: Uuid, repo_id: Uuid) -> Vec<MergeRecord> {
        self.merges.list(workspace_id, repo_id).await
    }

    /// Ask the generator for a merge message describing the pending changes.
    /// `None` when no generator is configured or it fails.
    pub async fn propose_merge_message(
        &self,
        workspace_id: Uuid,
        repo_id: Uuid,
        request: &BranchCommitRequest,
    ) -> Option<String> {
        let messages = self.messages.as_ref()?;
        let diffs = match self.diff(workspace_id, repo_id, DiffContext::PreMerge).await {
            Ok(diffs) => diffs,
            Err(e) => {
                warn!("Cannot propose a merge message without a diff: {}", e);
                return None;
            }
        };
        messages.merge_message(request, &diffs).await
    }

    // ---- mutations ---------------------------------------------------------

    pub async fn commit(&self, workspace_id: Uuid, repo_id: Uuid, message: Option<&str>) -> OperationReport {
        let message = match message.map(str::trim).filter(|m| !m.is_empty()) {
            Some(message) => message.to_string(),
            None => self.proposed_commit_message(workspace_id, repo_id).await,
        };
        self.mutate(workspace_id, repo_id, "commit", |executor, gate, target| async move {
            executor.commit(&gate, &target, &message).await
        })
        .await
    }

    pub async fn undo_commit(&self, workspace_id: Uuid, repo_id: Uuid) -> OperationReport {
        self.mutate(workspace_id, repo_id, "undo", |executor, gate, target| async move {
            executor.undo_last_commit(&gate, &target).await
        })
        .await
    }

    pub async fn merge(&self, workspace_id: Uuid, repo_id: Uuid, request: MergeRequest) -> OperationReport {
        let message = match request.message.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            Some(message) => message.to_string(),
            None => self.default_merge_message(workspace_id, repo_id, request.task).await,
        };
        let branch_message = request.branch_commit_message;
        self.mutate(workspace_id, repo_id, "merge", |executor, gate, target| async move {
            executor
                .merge(&gate, &target, &message, branch_message.as_deref())
                .await
        })
        .await
    }

    pub async fn revert_merge(&self, workspace_id: Uuid, repo_id: Uuid) -> OperationReport {
        self.mutate(workspace_id, repo_id, "revert merge", |executor, gate, target| async move {
            executor.revert_last_merge(&gate, &target).await
        })
        .await
    }

    pub async fn push(&self, workspace_id: Uuid, repo_id: Uuid) -> OperationReport {
        self.mutate(workspace_id, repo_id, "push", |executor, gate, target| async move {
            executor.push(&gate, &target).await
        })
        .await
    }

    pub async fn rebase(
        &self,
        workspace_id: Uuid,
        repo_id: Uuid,
        new_base: Option<String>,
        old_upstream: Option<String>,
        cancel: CancellationToken,
    ) -> OperationReport {
        self.mutate(workspace_id, repo_id, "rebase", |executor, gate, target| async move {
            executor
                .rebase(
                    &gate,
                    &target,
                    new_base.as_deref(),
                    old_upstream.as_deref(),
                    cancel,
                )
                .await
        })
        .await
    }

    pub async fn continue_rebase(&self, workspace_id: Uuid, repo_id: Uuid, cancel: CancellationToken) -> OperationReport {
        self.mutate(workspace_id, repo_id, "continue rebase", |executor, gate, target| async move {
            executor.continue_rebase(&gate, &target, cancel).await
        })
        .await
    }

    pub async fn abort_conflicts(&self, workspace_id: Uuid, repo_id: Uuid) -> OperationReport {
        self.mutate(workspace_id, repo_id, "abort", |executor, gate, target| async move {
            executor.abort_conflicts(&gate, &target).await
        })
        .await
    }

    pub async fn change_target(&self, workspace_id: Uuid, repo_id: Uuid, branch: &str) -> OperationReport {
        let branch = branch.to_string();
        self.mutate(workspace_id, repo_id, "change target", |executor, gate, target| async move {
            executor.change_target(&gate, &target, &branch).await
        })
        .await
    }

    // ---- pull requests -----------------------------------------------------

    /// Record a pull request opened for the workspace branch.
    pub async fn attach_pull_request(
        &self,
        workspace_id: Uuid,
        repo_id: Uuid,
        number: u64,
        url: &str,
    ) -> SyncResult<MergeRecord> {
        let target = self.registry.workspace_repo(workspace_id, repo_id).await?;
        let record = self
            .merges
            .append(
                workspace_id,
                repo_id,
                &target.target_branch,
                Merge::pull_request(number, url),
            )
            .await?;
        info!(
            workspace_id = %workspace_id,
            repo_id = %repo_id,
            "Pull request #{} attached",
            number
        );
        Ok(record)
    }

    /// Mark an open pull request merged or closed. A merged one may carry its
    /// merge commit, which then anchors review diffs.
    pub async fn update_pull_request_status(
        &self,
        workspace_id: Uuid,
        repo_id: Uuid,
        number: u64,
        status: MergeStatus,
        merge_commit_sha: Option<String>,
    ) -> SyncResult<MergeRecord> {
        let record = self
            .merges
            .update_pull_request_status(workspace_id, repo_id, number, status, merge_commit_sha)
            .await?;
        info!(
            workspace_id = %workspace_id,
            repo_id = %repo_id,
            "Pull request #{} is now {:?}",
            number,
            status
        );
        Ok(record)
    }

    // ---- helpers -----------------------------------------------------------

    /// Run one mutation under the pair's gate and report the refreshed status.
    async fn mutate<F, Fut>(&self, workspace_id: Uuid, repo_id: Uuid, operation: &'static str, f: F) -> OperationReport
    where
        F: FnOnce(GitOperationExecutor, MutationGuard, WorktreeTarget) -> Fut,
        Fut: Future<Output = SyncResult<OperationOutcome>>,
    {
        let target = match self.registry.workspace_repo(workspace_id, repo_id).await {
            Ok(target) => target,
            Err(e) => {
                return OperationReport {
                    outcome: Err(e.into()),
                    status: None,
                }
            }
        };

        let outcome = match self.locks.try_acquire(workspace_id, repo_id) {
            Ok(gate) => f(self.executor.clone(), gate, target).await,
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(_) => {}
            Err(e) if e.is_precondition() => debug!(
                workspace_id = %workspace_id,
                repo_id = %repo_id,
                operation,
                "Skipped: {}",
                e
            ),
            Err(e) => warn!(
                workspace_id = %workspace_id,
                repo_id = %repo_id,
                operation,
                "Failed: {}",
                e
            ),
        }

        let status = match self.status(workspace_id, repo_id).await {
            Ok(status) => Some(status),
            Err(e) => {
                debug!("Status unavailable after {}: {}", operation, e);
                None
            }
        };
        OperationReport { outcome, status }
    }

    async fn proposed_commit_message(&self, workspace_id: Uuid, repo_id: Uuid) -> String {
        const FALLBACK: &str = "Update workspace changes";
        let Some(messages) = self.messages.as_ref() else {
            return FALLBACK.to_string();
        };
        let diffs = match self.registry.workspace_repo(workspace_id, repo_id).await {
            Ok(target) => {
                let _snapshot = self.locks.read(workspace_id, repo_id).await;
                let (git, diffs) = (self.git.clone(), self.diffs.clone());
                tokio::task::spawn_blocking(move || {
                    let repo = git.open(&target.worktree_path).ok()?;
                    let head = git.head_oid(&repo).ok()?;
                    diffs.diff(&repo, Some(head), DiffTarget::Worktree).ok()
                })
                .await
                .ok()
                .flatten()
                .unwrap_or_default()
            }
            Err(_) => Vec::new(),
        };
        messages
            .run_commit_message(&diffs)
            .await
            .unwrap_or_else(|| FALLBACK.to_string())
    }

    async fn default_merge_message(
        &self,
        workspace_id: Uuid,
        repo_id: Uuid,
        task: Option<BranchCommitRequest>,
    ) -> String {
        let target = match self.registry.workspace_repo(workspace_id, repo_id).await {
            Ok(target) => target,
            Err(_) => return "Merge workspace branch".to_string(),
        };
        let fallback = format!("Merge branch '{}' into '{}'", target.branch, target.target_branch);
        let Some(mut request) = task else {
            return fallback;
        };
        if request.target_branch.is_empty() {
            request.target_branch = target.target_branch.clone();
        }
        self.propose_merge_message(workspace_id, repo_id, &request)
            .await
            .unwrap_or(fallback)
    }
}
