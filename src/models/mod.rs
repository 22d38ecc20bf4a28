// ABOUTME: Data models for workspaces, repositories, merges, checkpoints, status and diffs

pub mod branch_status;
pub mod checkpoint;
pub mod commit;
pub mod diff;
pub mod merge;
pub mod workspace;

pub use branch_status::{BranchStatus, ConflictOp};
pub use checkpoint::Checkpoint;
pub use commit::CommitInfo;
pub use diff::{Diff, DiffChangeKind};
pub use merge::{Merge, MergeRecord, MergeStatus, PullRequestInfo};
pub use workspace::{Repo, Workspace, WorkspaceRepo, WorktreeTarget};
