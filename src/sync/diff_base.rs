// ABOUTME: Picks the commit a diff is taken against: last merge, merge-base, or an execution run's start

use super::error::{SyncError, SyncResult};
use crate::git::{DiffTarget, GitService};
use crate::models::WorktreeTarget;
use crate::store::{CheckpointStore, MergeHistoryLog};
use git2::Oid;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Why a diff is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "context", rename_all = "snake_case")]
pub enum DiffContext {
    /// Ad-hoc review of everything not yet merged.
    Review,
    /// Message for the commit that ends one execution run.
    PostExecution { run_id: Uuid },
    /// Message for the upcoming merge.
    PreMerge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum BaseSource {
    LatestMerge { merge_id: Uuid },
    MergeBase,
    Checkpoint { run_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBase {
    pub commit: Oid,
    pub source: BaseSource,
    /// What the base is compared with: a closed run's final head, otherwise the live worktree.
    pub target: DiffTarget,
}

#[derive(Clone)]
pub struct DiffBaseResolver {
    git: GitService,
    checkpoints: Arc<CheckpointStore>,
    merges: Arc<MergeHistoryLog>,
}

impl DiffBaseResolver {
    pub fn new(git: GitService, checkpoints: Arc<CheckpointStore>, merges: Arc<MergeHistoryLog>) -> Self {
        Self {
            git,
            checkpoints,
            merges,
        }
    }

    pub async fn resolve(&self, target: &WorktreeTarget, context: DiffContext) -> SyncResult<ResolvedBase> {
        if let DiffContext::PostExecution { run_id } = context {
            match self.checkpoints.get(run_id, target.repo_id).await {
                Some(checkpoint) if checkpoint.workspace_id == target.workspace_id => {
                    let commit = parse_oid(&checkpoint.before_head_commit)?;
                    let diff_target = match checkpoint.after_head_commit.as_deref() {
                        Some(after) => DiffTarget::Commit(parse_oid(after)?),
                        None => DiffTarget::Worktree,
                    };
                    debug!("Diff base for run {} is its start {}", run_id, commit);
                    return Ok(ResolvedBase {
                        commit,
                        source: BaseSource::Checkpoint { run_id },
                        target: diff_target,
                    });
                }
                _ => warn!(
                    "No checkpoint for run {} in repository {}, using the review base",
                    run_id, target.repo_id
                ),
            }
        }

        let latest = self.merges.latest_standing(target.workspace_id, target.repo_id).await;
        let anchor = latest.as_ref().and_then(|record| {
            record
                .merge
                .anchor_commit()
                .map(|commit| (record.id, commit.to_string()))
        });

        let git = self.git.clone();
        let owned = target.clone();
        tokio::task::spawn_blocking(move || review_base(&git, &owned, anchor)).await?
    }
}

fn review_base(git: &GitService, target: &WorktreeTarget, anchor: Option<(Uuid, String)>) -> SyncResult<ResolvedBase> {
    let repo = git
        .open(&target.worktree_path)
        .map_err(|e| SyncError::git("resolve diff base", e))?;
    let target_oid = git
        .resolve_branch(&repo, &target.target_branch)
        .map_err(|e| SyncError::git("resolve diff base", e))?
        .ok_or_else(|| SyncError::NoTargetBranch(target.target_branch.clone()))?
        .oid;

    if let Some((merge_id, commit)) = anchor {
        match Oid::from_str(&commit).ok().filter(|oid| repo.find_commit(*oid).is_ok()) {
            Some(commit) => {
                debug!("Diff base is merge {} at {}", merge_id, commit);
                return Ok(ResolvedBase {
                    commit,
                    source: BaseSource::LatestMerge { merge_id },
                    target: DiffTarget::Worktree,
                });
            }
            None => warn!(
                "Merge commit {} is not available locally, using the merge-base",
                commit
            ),
        }
    }

    let head = git
        .branch_head(&repo, &target.branch)
        .map_err(|e| SyncError::git("resolve diff base", e))?;
    let commit = git
        .merge_base(&repo, head, target_oid)
        .map_err(|e| SyncError::git("resolve diff base", e))?;
    debug!("Diff base is the merge-base {}", commit);
    Ok(ResolvedBase {
        commit,
        source: BaseSource::MergeBase,
        target: DiffTarget::Worktree,
    })
}

fn parse_oid(value: &str) -> SyncResult<Oid> {
    Oid::from_str(value).map_err(|e| SyncError::InvalidState(format!("bad commit id {value}: {e}")))
}
