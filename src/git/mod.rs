// ABOUTME: Git layer: libgit2-backed primitives, diffs, rebases and worktree lifecycle

pub mod diff;
pub mod error;
pub mod rebase;
pub mod repository;
pub mod worktree_manager;

pub use diff::{DiffBuilder, DiffTarget};
pub use error::GitServiceError;
pub use rebase::RebaseOutcome;
pub use repository::{GitResult, GitService, MergeOutcome, ResolvedBranch, RevertOutcome};
pub use worktree_manager::{WorktreeError, WorktreeInfo, WorktreeManager};
