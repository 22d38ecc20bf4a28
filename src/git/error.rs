// ABOUTME: Error types for git primitives (libgit2 calls and git CLI invocations)

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitServiceError {
    #[error("Git repository error: {0}")]
    Git(#[from] git2::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Repository not found at {0}")]
    RepositoryNotFound(PathBuf),
    #[error("Branch not found: {0}")]
    BranchNotFound(String),
    #[error("Branch {branch} has uncommitted changes in {path}")]
    DirtyCheckout { branch: String, path: PathBuf },
    #[error("Branch {0} moved while the operation was running")]
    RefMoved(String),
    #[error("Push rejected: {0}")]
    PushRejected(String),
    #[error("Git command timed out after {0:?}")]
    Timeout(Duration),
    #[error("Command execution failed: {0}")]
    CommandFailed(String),
}

impl GitServiceError {
    /// True for errors that mean the repository itself is missing or unreadable.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::RepositoryNotFound(_) => true,
            Self::Git(e) => matches!(
                e.code(),
                git2::ErrorCode::NotFound | git2::ErrorCode::UnbornBranch
            ) && e.class() == git2::ErrorClass::Repository,
            _ => false,
        }
    }
}
