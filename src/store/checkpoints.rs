// ABOUTME: Checkpoint store recording head commits before and after each execution run per repository

use super::error::{StoreError, StoreResult};
use super::json_file::JsonFile;
use crate::models::Checkpoint;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointState {
    checkpoints: Vec<Checkpoint>,
}

pub struct CheckpointStore {
    file: JsonFile<CheckpointState>,
}

impl CheckpointStore {
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

    /// Start tracking a run. `before_head` is fixed from here on.
    pub async fn open_checkpoint(
        &self,
        run_id: Uuid,
        workspace_id: Uuid,
        repo_id: Uuid,
        before_head: String,
    ) -> StoreResult<Checkpoint> {
        self.file
            .update(|state| {
                if state
                    .checkpoints
                    .iter()
                    .any(|c| c.run_id == run_id && c.repo_id == repo_id)
                {
                    return Err(StoreError::Duplicate {
                        kind: "Checkpoint",
                        id: format!("{run_id}/{repo_id}"),
                    });
                }
                let checkpoint = Checkpoint::new(run_id, workspace_id, repo_id, before_head);
                state.checkpoints.push(checkpoint.clone());
                debug!(
                    "Opened checkpoint for run {} at {}",
                    run_id, checkpoint.before_head_commit
                );
                Ok(checkpoint)
            })
            .await
    }

    /// Record the head a run finished at. A checkpoint is closed only once.
    pub async fn close(&self, run_id: Uuid, repo_id: Uuid, after_head: String) -> StoreResult<Checkpoint> {
        self.file
            .update(|state| {
                let checkpoint = state
                    .checkpoints
                    .iter_mut()
                    .find(|c| c.run_id == run_id && c.repo_id == repo_id)
                    .ok_or_else(|| StoreError::not_found("Checkpoint", format!("{run_id}/{repo_id}")))?;
                if checkpoint.is_closed() {
                    return Err(StoreError::InvalidTransition(format!(
                        "checkpoint {run_id}/{repo_id} is already closed"
                    )));
                }
                checkpoint.after_head_commit = Some(after_head);
                checkpoint.completed_at = Some(Utc::now());
                Ok(checkpoint.clone())
            })
            .await
    }

    pub async fn get(&self, run_id: Uuid, repo_id: Uuid) -> Option<Checkpoint> {
        self.file
            .read(|state| {
                state
                    .checkpoints
                    .iter()
                    .find(|c| c.run_id == run_id && c.repo_id == repo_id)
                    .cloned()
            })
            .await
    }

    /// Checkpoints of one (workspace, repository) pair, oldest first.
    pub async fn list(&self, workspace_id: Uuid, repo_id: Uuid) -> Vec<Checkpoint> {
        self.file
            .read(|state| {
                state
                    .checkpoints
                    .iter()
                    .filter(|c| c.workspace_id == workspace_id && c.repo_id == repo_id)
                    .cloned()
                    .collect()
            })
            .await
    }

    /// Closed checkpoints that no merge has claimed yet.
    pub async fn unmerged(&self, workspace_id: Uuid, repo_id: Uuid) -> Vec<Checkpoint> {
        let mut checkpoints = self.list(workspace_id, repo_id).await;
        checkpoints.retain(|c| c.is_closed() && !c.is_merged());
        checkpoints
    }

    /// Stamp `merge_commit` on the listed runs. Rows already stamped by a
    /// concurrent merge are left alone; the runs actually stamped are returned.
    pub async fn record_merge(
        &self,
        workspace_id: Uuid,
        repo_id: Uuid,
        run_ids: &[Uuid],
        merge_commit: &str,
    ) -> StoreResult<Vec<Uuid>> {
        let stamped = self
            .file
            .update(|state| {
                let mut stamped = Vec::new();
                for checkpoint in state.checkpoints.iter_mut().filter(|c| {
                    c.workspace_id == workspace_id
                        && c.repo_id == repo_id
                        && run_ids.contains(&c.run_id)
                }) {
                    if checkpoint.merge_commit.is_none() {
                        checkpoint.merge_commit = Some(merge_commit.to_string());
                        stamped.push(checkpoint.run_id);
                    }
                }
                Ok(stamped)
            })
            .await?;

        if !stamped.is_empty() {
            info!(
                "Stamped merge {} on {} checkpoint(s)",
                merge_commit,
                stamped.len()
            );
        }
        Ok(stamped)
    }

    /// Point checkpoints that finished at `old_head` to `new_head` after the
    /// branch head was rewritten in place.
    pub async fn replace_after_head(
        &self,
        workspace_id: Uuid,
        repo_id: Uuid,
        old_head: &str,
        new_head: &str,
    ) -> StoreResult<usize> {
        self.file
            .update(|state| {
                let mut replaced = 0;
                for checkpoint in state.checkpoints.iter_mut().filter(|c| {
                    c.workspace_id == workspace_id
                        && c.repo_id == repo_id
                        && c.after_head_commit.as_deref() == Some(old_head)
                }) {
                    checkpoint.after_head_commit = Some(new_head.to_string());
                    replaced += 1;
                }
                Ok(replaced)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_open_close_lifecycle() {
        let store = CheckpointStore::in_memory();
        let (run, workspace, repo) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let opened = store
            .open_checkpoint(run, workspace, repo, "aaa".to_string())
            .await
            .unwrap();
        assert!(!opened.is_closed());
        assert!(store.unmerged(workspace, repo).await.is_empty());

        let closed = store.close(run, repo, "bbb".to_string()).await.unwrap();
        assert_eq!(closed.before_head_commit, "aaa");
        assert_eq!(closed.after_head_commit.as_deref(), Some("bbb"));
        assert!(closed.completed_at.is_some());

        assert!(matches!(
            store.close(run, repo, "ccc".to_string()).await,
            Err(StoreError::InvalidTransition(_))
        ));
        assert!(matches!(
            store.open_checkpoint(run, workspace, repo, "x".to_string()).await,
            Err(StoreError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn test_record_merge_stamps_each_row_once() {
        let store = CheckpointStore::in_memory();
        let (workspace, repo) = (Uuid::new_v4(), Uuid::new_v4());
        let runs: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for (i, run) in runs.iter().enumerate() {
            store
                .open_checkpoint(*run, workspace, repo, format!("before{i}"))
                .await
                .unwrap();
            store.close(*run, repo, format!("after{i}")).await.unwrap();
        }

        let stamped = store
            .record_merge(workspace, repo, &runs[..2], "merge1")
            .await
            .unwrap();
        assert_eq!(stamped, runs[..2].to_vec());

        let stamped = store
            .record_merge(workspace, repo, &runs, "merge2")
            .await
            .unwrap();
        assert_eq!(stamped, vec![runs[2]]);

        let merges: Vec<Option<String>> = store
            .list(workspace, repo)
            .await
            .into_iter()
            .map(|c| c.merge_commit)
            .collect();
        assert_eq!(
            merges,
            vec![
                Some("merge1".to_string()),
                Some("merge1".to_string()),
                Some("merge2".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_replace_after_head() {
        let store = CheckpointStore::in_memory();
        let (run, workspace, repo) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store
            .open_checkpoint(run, workspace, repo, "a".to_string())
            .await
            .unwrap();
        store.close(run, repo, "b".to_string()).await.unwrap();

        let replaced = store
            .replace_after_head(workspace, repo, "b", "b2")
            .await
            .unwrap();
        assert_eq!(replaced, 1);
        assert_eq!(
            store.get(run, repo).await.unwrap().after_head_commit.as_deref(),
            Some("b2")
        );
    }
}
