// ABOUTME: Workspace and repository records tracked by the repository registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A git repository the engine knows about. Many workspaces share one `Repo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub id: Uuid,
    pub name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Repo {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path,
            created_at: Utc::now(),
        }
    }
}

/// One repository's worktree inside a workspace, plus the branch it merges into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRepo {
    pub repo_id: Uuid,
    pub worktree_path: PathBuf,
    pub target_branch: String,
}

/// A task attempt: one branch name, one worktree per tracked repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub branch: String,
    pub repos: Vec<WorkspaceRepo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(id: Uuid, branch: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            branch: branch.into(),
            repos: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn repo(&self, repo_id: Uuid) -> Option<&WorkspaceRepo> {
        self.repos.iter().find(|r| r.repo_id == repo_id)
    }

    pub fn repo_mut(&mut self, repo_id: Uuid) -> Option<&mut WorkspaceRepo> {
        self.repos.iter_mut().find(|r| r.repo_id == repo_id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Everything an operation needs to address one (workspace, repository) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeTarget {
    pub workspace_id: Uuid,
    pub repo_id: Uuid,
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub branch: String,
    pub target_branch: String,
}
