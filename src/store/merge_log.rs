// ABOUTME: Append-only merge history per (workspace, repository) with pull request status tracking

use super::error::{StoreError, StoreResult};
use super::json_file::JsonFile;
use crate::models::{Merge, MergeRecord, MergeStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MergeLogState {
    merges: Vec<MergeRecord>,
    /// Direct merge commits that have been reverted on their target.
    #[serde(default)]
    reverted: Vec<String>,
}

pub struct MergeHistoryLog {
    file: JsonFile<MergeLogState>,
}

impl MergeHistoryLog {
    pub fn open(path: PathBuf) -> StoreResult<Self> {
        Ok(Self {
            file: JsonFile::open(path)?,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            file: JsonFile::in_memory(),
        }
    }

    /// Append a merge. A second open pull request for the same pair is refused.
    pub async fn append(
        &self,
        workspace_id: Uuid,
        repo_id: Uuid,
        target_branch: &str,
        merge: Merge,
    ) -> StoreResult<MergeRecord> {
        self.file
            .update(|state| {
                if merge.is_open_pull_request() {
                    if let Some(open) = open_pr(&state.merges, workspace_id, repo_id) {
                        if let Merge::PullRequest(pr) = &open.merge {
                            return Err(StoreError::PullRequestAlreadyOpen(pr.number));
                        }
                    }
                }

                let record = MergeRecord {
                    id: Uuid::new_v4(),
                    workspace_id,
                    repo_id,
                    target_branch: target_branch.to_string(),
                    merge,
                    created_at: Utc::now(),
                };
                info!(
                    "Recorded {} for workspace {} into {}",
                    record.merge.label(),
                    workspace_id,
                    target_branch
                );
                state.merges.push(record.clone());
                Ok(record)
            })
            .await
    }

    /// Newest completed merge: a direct merge or a merged pull request.
    pub async fn latest(&self, workspace_id: Uuid, repo_id: Uuid) -> Option<MergeRecord> {
        self.file
            .read(|state| {
                for_pair(&state.merges, workspace_id, repo_id)
                    .find(|r| r.merge.is_completed())
                    .cloned()
            })
            .await
    }

    /// Newest completed merge whose commit is still on its target, i.e. not reverted.
    pub async fn latest_standing(&self, workspace_id: Uuid, repo_id: Uuid) -> Option<MergeRecord> {
        self.file
            .read(|state| {
                for_pair(&state.merges, workspace_id, repo_id)
                    .filter(|r| r.merge.is_completed())
                    .find(|r| {
                        r.merge
                            .anchor_commit()
                            .map_or(true, |commit| !state.reverted.iter().any(|c| c == commit))
                    })
                    .cloned()
            })
            .await
    }

    pub async fn open_pull_request(&self, workspace_id: Uuid, repo_id: Uuid) -> Option<MergeRecord> {
        self.file
            .read(|state| open_pr(&state.merges, workspace_id, repo_id).cloned())
            .await
    }

    /// All merges of the pair, newest first.
    pub async fn list(&self, workspace_id: Uuid, repo_id: Uuid) -> Vec<MergeRecord> {
        self.file
            .read(|state| for_pair(&state.merges, workspace_id, repo_id).cloned().collect())
            .await
    }

    /// Move an open pull request to merged or closed.
    pub async fn update_pull_request_status(
        &self,
        workspace_id: Uuid,
        repo_id: Uuid,
        number: u64,
        status: MergeStatus,
        merge_commit_sha: Option<String>,
    ) -> StoreResult<MergeRecord> {
        self.file
            .update(|state| {
                let record = state
                    .merges
                    .iter_mut()
                    .rev()
                    .find(|r| {
                        r.workspace_id == workspace_id
                            && r.repo_id == repo_id
                            && matches!(&r.merge, Merge::PullRequest(pr) if pr.number == number)
                    })
                    .ok_or_else(|| StoreError::not_found("Pull request", number))?;

                let Merge::PullRequest(pr) = &mut record.merge else {
                    return Err(StoreError::not_found("Pull request", number));
                };
                if pr.status != MergeStatus::Open {
                    return Err(StoreError::InvalidTransition(format!(
                        "pull request #{number} is no longer open"
                    )));
                }
                if status == MergeStatus::Open {
                    return Ok(record.clone());
                }

                pr.status = status;
                if status == MergeStatus::Merged {
                    pr.merge_commit_sha = merge_commit_sha;
                }
                info!("Pull request #{} is now {:?}", number, status);
                Ok(record.clone())
            })
            .await
    }

    pub async fn record_revert(&self, merge_commit: &str) -> StoreResult<()> {
        self.file
            .update(|state| {
                if !state.reverted.iter().any(|c| c == merge_commit) {
                    state.reverted.push(merge_commit.to_string());
                }
                Ok(())
            })
            .await
    }

    pub async fn is_reverted(&self, merge_commit: &str) -> bool {
        self.file
            .read(|state| state.reverted.iter().any(|c| c == merge_commit))
            .await
    }
}

fn for_pair(
    merges: &[MergeRecord],
    workspace_id: Uuid,
    repo_id: Uuid,
) -> impl Iterator<Item = &MergeRecord> {
    merges
        .iter()
        .rev()
        .filter(move |r| r.workspace_id == workspace_id && r.repo_id == repo_id)
}

fn open_pr(merges: &[MergeRecord], workspace_id: Uuid, repo_id: Uuid) -> Option<&MergeRecord> {
    for_pair(merges, workspace_id, repo_id).find(|r| r.merge.is_open_pull_request())
}
