// ABOUTME: Repository registry mapping workspaces to their repositories, worktrees and target branches

use super::error::{StoreError, StoreResult};
use super::json_file::JsonFile;
use crate::git::WorktreeManager;
use crate::models::{Repo, Workspace, WorkspaceRepo, WorktreeTarget};
use git2::Repository;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryState {
    repos: Vec<Repo>,
    workspaces: Vec<Workspace>,
}

pub struct RepositoryRegistry {
    file: JsonFile<RegistryState>,
    worktrees: WorktreeManager,
}

impl RepositoryRegistry {
    pub fn open(path: PathBuf, worktrees: WorktreeManager) -> StoreResult<Self> {
        Ok(Self {
            file: JsonFile::open(path)?,
            worktrees,
        })
    }

    pub fn in_memory(worktrees: WorktreeManager) -> Self {
        Self {
            file: JsonFile::in_memory(),
            worktrees,
        }
    }

    /// Track a repository. Registering the same path twice returns the existing entry.
    pub async fn register_repo(&self, name: &str, path: &Path) -> StoreResult<Repo> {
        let repo = Repository::open(path)?;
        let path = repo
            .workdir()
            .unwrap_or_else(|| repo.path())
            .canonicalize()?;

        self.file
            .update(|state| {
                if let Some(existing) = state.repos.iter().find(|r| r.path == path) {
                    return Ok(existing.clone());
                }
                let repo = Repo::new(name, path);
                info!("Registered repository {} ({})", repo.name, repo.id);
                state.repos.push(repo.clone());
                Ok(repo)
            })
            .await
    }

    pub async fn repo(&self, repo_id: Uuid) -> StoreResult<Repo> {
        self.file
            .read(|state| state.repos.iter().find(|r| r.id == repo_id).cloned())
            .await
            .ok_or_else(|| StoreError::not_found("Repository", repo_id))
    }

    pub async fn list_repos(&self) -> Vec<Repo> {
        self.file.read(|state| state.repos.clone()).await
    }

    pub async fn workspace(&self, workspace_id: Uuid) -> StoreResult<Workspace> {
        self.file
            .read(|state| {
                state
                    .workspaces
                    .iter()
                    .find(|w| w.id == workspace_id)
                    .cloned()
            })
            .await
            .ok_or_else(|| StoreError::not_found("Workspace", workspace_id))
    }

    pub async fn list_workspaces(&self) -> Vec<Workspace> {
        self.file.read(|state| state.workspaces.clone()).await
    }

    /// Create a workspace with one worktree per `(repo_id, target_branch)`.
    /// Worktrees already created are removed again if a later one fails.
    pub async fn create_workspace(&self, branch: &str, repos: &[(Uuid, String)]) -> StoreResult<Workspace> {
        WorktreeManager::validate_branch_name(branch)?;

        let mut workspace = Workspace::new(Uuid::new_v4(), branch);
        let mut created: Vec<(PathBuf, PathBuf)> = Vec::new();

        for (repo_id, target_branch) in repos {
            let created_worktree = match self.repo(*repo_id).await {
                Ok(repo) => {
                    let manager = self.worktrees.clone();
                    let (workspace_id, branch, target) =
                        (workspace.id, branch.to_string(), target_branch.clone());
                    let repo_path = repo.path.clone();
                    tokio::task::spawn_blocking(move || {
                        manager.create_worktree(workspace_id, &repo_path, &branch, &target)
                    })
                    .await
                    .map_err(StoreError::from)
                    .and_then(|result| result.map_err(StoreError::from))
                    .map(|info| (repo.path, info.path))
                }
                Err(e) => Err(e),
            };

            match created_worktree {
                Ok((repo_path, worktree_path)) => {
                    workspace.repos.push(WorkspaceRepo {
                        repo_id: *repo_id,
                        worktree_path: worktree_path.clone(),
                        target_branch: target_branch.clone(),
                    });
                    created.push((repo_path, worktree_path));
                }
                Err(e) => {
                    self.rollback_worktrees(created).await;
                    return Err(e);
                }
            }
        }

        let stored = workspace.clone();
        self.file
            .update(move |state| {
                state.workspaces.push(stored);
                Ok(())
            })
            .await?;

        info!(
            "Created workspace {} on branch {} with {} repositories",
            workspace.id,
            workspace.branch,
            workspace.repos.len()
        );
        Ok(workspace)
    }

    /// Remove every worktree of the workspace and forget it.
    pub async fn remove_workspace(&self, workspace_id: Uuid) -> StoreResult<()> {
        let workspace = self.workspace(workspace_id).await?;

        for workspace_repo in &workspace.repos {
            let repo = self.repo(workspace_repo.repo_id).await?;
            let manager = self.worktrees.clone();
            let worktree_path = workspace_repo.worktree_path.clone();
            tokio::task::spawn_blocking(move || manager.remove_worktree(&repo.path, &worktree_path))
                .await??;
        }

        self.file
            .update(|state| {
                state.workspaces.retain(|w| w.id != workspace_id);
                Ok(())
            })
            .await?;
        info!("Removed workspace {}", workspace_id);
        Ok(())
    }

    /// Resolve everything needed to operate on one (workspace, repository) pair.
    pub async fn workspace_repo(&self, workspace_id: Uuid, repo_id: Uuid) -> StoreResult<WorktreeTarget> {
        let workspace = self.workspace(workspace_id).await?;
        let repo = self.repo(repo_id).await?;
        let workspace_repo = workspace.repo(repo_id).ok_or_else(|| {
            StoreError::not_found("Workspace repository", format!("{workspace_id}/{repo_id}"))
        })?;

        Ok(WorktreeTarget {
            workspace_id,
            repo_id,
            repo_path: repo.path,
            worktree_path: workspace_repo.worktree_path.clone(),
            branch: workspace.branch.clone(),
            target_branch: workspace_repo.target_branch.clone(),
        })
    }

    pub async fn set_target_branch(&self, workspace_id: Uuid, repo_id: Uuid, target_branch: &str) -> StoreResult<()> {
        self.file
            .update(|state| {
                let workspace = state
                    .workspaces
                    .iter_mut()
                    .find(|w| w.id == workspace_id)
                    .ok_or_else(|| StoreError::not_found("Workspace", workspace_id))?;
                let workspace_repo = workspace.repo_mut(repo_id).ok_or_else(|| {
                    StoreError::not_found("Workspace repository", format!("{workspace_id}/{repo_id}"))
                })?;
                workspace_repo.target_branch = target_branch.to_string();
                workspace.touch();
                Ok(())
            })
            .await
    }

    async fn rollback_worktrees(&self, created: Vec<(PathBuf, PathBuf)>) {
        for (repo_path, worktree_path) in created {
            let manager = self.worktrees.clone();
            let result = tokio::task::spawn_blocking(move || {
                manager.remove_worktree(&repo_path, &worktree_path)
            })
            .await;
            if !matches!(result, Ok(Ok(()))) {
                warn!("Failed to roll back a worktree after workspace creation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_repo(path: &Path) -> String {
        let repo = Repository::init(path).unwrap();
        let signature = git2::Signature::now("Test User", "test@example.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &signature, &signature, "Initial commit", &tree, &[])
            .unwrap();
        let head = repo.head().unwrap();
        head.shorthand().unwrap().to_string()
    }

    fn registry(worktree_root: &TempDir) -> RepositoryRegistry {
        let manager = WorktreeManager::with_base_dir(worktree_root.path().to_path_buf()).unwrap();
        RepositoryRegistry::in_memory(manager)
    }

    #[tokio::test]
    async fn test_register_repo_is_idempotent() {
        let repo_dir = TempDir::new().unwrap();
        let worktree_root = TempDir::new().unwrap();
        init_repo(repo_dir.path());
        let registry = registry(&worktree_root);

        let first = registry.register_repo("app", repo_dir.path()).await.unwrap();
        let second = registry.register_repo("app", repo_dir.path()).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(registry.list_repos().await.len(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_non_repository() {
        let dir = TempDir::new().unwrap();
        let worktree_root = TempDir::new().unwrap();
        let registry = registry(&worktree_root);

        assert!(registry.register_repo("nope", dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_workspace_lifecycle() {
        let repo_dir = TempDir::new().unwrap();
        let worktree_root = TempDir::new().unwrap();
        let base = init_repo(repo_dir.path());
        let registry = registry(&worktree_root);
        let repo = registry.register_repo("app", repo_dir.path()).await.unwrap();

        let workspace = registry
            .create_workspace("task/lifecycle", &[(repo.id, base.clone())])
            .await
            .unwrap();
        let target = registry.workspace_repo(workspace.id, repo.id).await.unwrap();
        assert!(target.worktree_path.exists());
        assert_eq!(target.branch, "task/lifecycle");
        assert_eq!(target.target_branch, base);

        registry
            .set_target_branch(workspace.id, repo.id, "release")
            .await
            .unwrap();
        let target = registry.workspace_repo(workspace.id, repo.id).await.unwrap();
        assert_eq!(target.target_branch, "release");

        registry.remove_workspace(workspace.id).await.unwrap();
        assert!(!target.worktree_path.exists());
        assert!(matches!(
            registry.workspace(workspace.id).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_branch_name_creates_nothing() {
        let repo_dir = TempDir::new().unwrap();
        let worktree_root = TempDir::new().unwrap();
        let base = init_repo(repo_dir.path());
        let registry = registry(&worktree_root);
        let repo = registry.register_repo("app", repo_dir.path()).await.unwrap();

        let result = registry
            .create_workspace("bad branch", &[(repo.id, base)])
            .await;
        assert!(matches!(result, Err(StoreError::Worktree(_))));
        assert!(registry.list_workspaces().await.is_empty());
    }
}
