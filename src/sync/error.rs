// ABOUTME: Error taxonomy surfaced to callers of the synchronization engine

use crate::git::GitServiceError;
use crate::models::ConflictOp;
use crate::store::StoreError;
use thiserror::Error;
use uuid::Uuid;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(String),
    #[error("Target branch cannot be resolved: {0}")]
    NoTargetBranch(String),
    #[error("{op} conflict in {} file(s): {}", .files.len(), .files.join(", "))]
    Conflict { op: ConflictOp, files: Vec<String> },
    #[error("Nothing to undo: the branch has no commits ahead of its target")]
    NothingToUndo,
    #[error("No changes to commit")]
    NoChanges,
    #[error("Branch is already merged into its target")]
    AlreadyMerged,
    #[error("The latest merge is not a direct merge that can be reverted")]
    NoDirectMergeToRevert,
    #[error("Push rejected, rebase onto the remote branch first: {0}")]
    PushRejected(String),
    #[error("Another operation is in progress for workspace {workspace_id} repository {repo_id}")]
    OperationInProgress { workspace_id: Uuid, repo_id: Uuid },
    #[error("External service failure: {0}")]
    ExternalServiceFailure(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Git error during {operation}: {source}")]
    Git {
        operation: &'static str,
        #[source]
        source: GitServiceError,
    },
    #[error("Storage error: {0}")]
    Store(#[source] StoreError),
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl SyncError {
    /// Map a git error for `operation` onto the public taxonomy.
    pub fn git(operation: &'static str, source: GitServiceError) -> Self {
        match source {
            GitServiceError::PushRejected(message) => Self::PushRejected(message),
            GitServiceError::DirtyCheckout { branch, path } => Self::InvalidState(format!(
                "branch {branch} is checked out with uncommitted changes in {}",
                path.display()
            )),
            source if source.is_unavailable() => Self::RepositoryUnavailable(source.to_string()),
            source => Self::Git { operation, source },
        }
    }

    pub fn conflict(op: Option<ConflictOp>, files: Vec<String>) -> Self {
        Self::Conflict {
            op: op.unwrap_or(ConflictOp::Merge),
            files,
        }
    }

    /// Preconditions that were not met; the operation was a no-op.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NothingToUndo | Self::NoChanges | Self::AlreadyMerged | Self::NoDirectMergeToRevert
        )
    }

    pub fn conflicted_files(&self) -> Option<&[String]> {
        match self {
            Self::Conflict { files, .. } => Some(files),
            _ => None,
        }
    }

    /// Short machine-readable name for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RepositoryUnavailable(_) => "repository_unavailable",
            Self::NoTargetBranch(_) => "no_target_branch",
            Self::Conflict { .. } => "conflict",
            Self::NothingToUndo => "nothing_to_undo",
            Self::NoChanges => "no_changes",
            Self::AlreadyMerged => "already_merged",
            Self::NoDirectMergeToRevert => "no_direct_merge_to_revert",
            Self::PushRejected(_) => "push_rejected",
            Self::OperationInProgress { .. } => "operation_in_progress",
            Self::ExternalServiceFailure(_) => "external_service_failure",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Git { .. } => "git",
            Self::Store(_) => "store",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { kind, id } => Self::NotFound(format!("{kind} {id}")),
            other => Self::Store(other),
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::InvalidState(format!("background git task failed: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_error_mapping() {
        let rejected = SyncError::git("push", GitServiceError::PushRejected("stale".to_string()));
        assert!(matches!(rejected, SyncError::PushRejected(_)));

        let missing = SyncError::git(
            "status",
            GitServiceError::RepositoryNotFound(std::path::PathBuf::from("/nope")),
        );
        assert_eq!(missing.kind(), "repository_unavailable");

        let other = SyncError::git("merge", GitServiceError::BranchNotFound("x".to_string()));
        assert!(matches!(other, SyncError::Git { operation: "merge", .. }));
    }

    #[test]
    fn test_conflict_message_lists_files() {
        let error = SyncError::conflict(
            Some(ConflictOp::Rebase),
            vec!["a.rs".to_string(), "b.rs".to_string()],
        );
        assert_eq!(error.to_string(), "rebase conflict in 2 file(s): a.rs, b.rs");
        assert_eq!(error.conflicted_files().map(<[String]>::len), Some(2));
        assert!(!error.is_precondition());
        assert!(SyncError::NothingToUndo.is_precondition());
    }
}
