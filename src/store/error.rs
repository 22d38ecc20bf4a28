// ABOUTME: Error types for the JSON-backed registry, checkpoint store and merge log

use crate::git::WorktreeError;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to replace state file: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("Git repository error: {0}")]
    Git(#[from] git2::Error),
    #[error("Worktree error: {0}")]
    Worktree(#[from] WorktreeError),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} already exists: {id}")]
    Duplicate { kind: &'static str, id: String },
    #[error("Pull request #{0} is still open")]
    PullRequestAlreadyOpen(u64),
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
}

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
