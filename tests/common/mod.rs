// ABOUTME: Shared fixtures for scenario tests: temporary repositories, workspaces and commit helpers

#![allow(dead_code)]

use git2::{IndexAddOption, Oid, Repository, Signature};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;
use worktree_sync::models::WorktreeTarget;
use worktree_sync::{AppConfig, WorkspaceSyncManager};

pub struct TestEnv {
    _repo_dir: TempDir,
    _state_dir: TempDir,
    pub repo_path: PathBuf,
    pub base_branch: String,
    pub manager: WorkspaceSyncManager,
    pub repo_id: Uuid,
    pub workspace_id: Uuid,
}

impl TestEnv {
    /// A repository with one commit and a workspace branched from it.
    pub async fn new(branch: &str) -> Self {
        let repo_dir = TempDir::new().expect("Failed to create repo dir");
        let state_dir = TempDir::new().expect("Failed to create state dir");
        let repo_path = repo_dir.path().join("app");
        std::fs::create_dir_all(&repo_path).expect("Failed to create repo path");

        let repo = Repository::init(&repo_path).expect("Failed to init git repo");
        std::fs::write(repo_path.join("README.md"), "# app\n").unwrap();
        commit_all(&repo, "Initial commit");
        let base_branch = repo.head().unwrap().shorthand().unwrap().to_string();

        let mut config = AppConfig::default();
        config.state_dir = state_dir.path().join("state");
        config.worktree_dir = state_dir.path().join("worktrees");
        config.commit_message.enabled = false;

        let manager = WorkspaceSyncManager::in_memory(config).expect("Failed to create manager");
        let registered = manager
            .registry()
            .register_repo("app", &repo_path)
            .await
            .expect("Failed to register repo");
        let workspace = manager
            .registry()
            .create_workspace(branch, &[(registered.id, base_branch.clone())])
            .await
            .expect("Failed to create workspace");

        Self {
            _repo_dir: repo_dir,
            _state_dir: state_dir,
            repo_path: registered.path,
            base_branch,
            manager,
            repo_id: registered.id,
            workspace_id: workspace.id,
        }
    }

    pub async fn target(&self) -> WorktreeTarget {
        self.manager
            .registry()
            .workspace_repo(self.workspace_id, self.repo_id)
            .await
            .expect("Failed to resolve workspace repository")
    }

    pub async fn worktree(&self) -> Repository {
        Repository::open(self.target().await.worktree_path).expect("Failed to open worktree")
    }

    pub fn main_repo(&self) -> Repository {
        Repository::open(&self.repo_path).expect("Failed to open main repository")
    }

    /// Commit a file on the workspace branch.
    pub async fn commit_on_workspace(&self, file: &str, content: &str, message: &str) -> Oid {
        let repo = self.worktree().await;
        write_file(&repo, file, content);
        commit_all(&repo, message)
    }

    /// Commit a file on the target branch, checked out in the main repository.
    pub fn commit_on_target(&self, file: &str, content: &str, message: &str) -> Oid {
        let repo = self.main_repo();
        write_file(&repo, file, content);
        commit_all(&repo, message)
    }

    pub async fn write_in_worktree(&self, file: &str, content: &str) {
        let repo = self.worktree().await;
        write_file(&repo, file, content);
    }

    pub async fn workspace_head(&self) -> Oid {
        self.worktree().await.head().unwrap().target().unwrap()
    }

    pub fn target_head(&self) -> Oid {
        let repo = self.main_repo();
        let branch = repo
            .find_branch(&self.base_branch, git2::BranchType::Local)
            .unwrap();
        branch.get().target().unwrap()
    }
}

pub fn write_file(repo: &Repository, file: &str, content: &str) {
    let path = workdir(repo).join(file);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub fn commit_all(repo: &Repository, message: &str) -> Oid {
    let signature = Signature::now("Test User", "test@example.com").unwrap();
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
        .unwrap()
}

fn workdir(repo: &Repository) -> &Path {
    repo.workdir().expect("Repository has no working directory")
}
