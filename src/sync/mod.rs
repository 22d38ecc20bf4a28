// ABOUTME: Synchronization engine: status, diff base resolution, serialized git operations and execution runs

pub mod branch_status;
pub mod diff_base;
pub mod error;
pub mod executor;
pub mod locks;
pub mod manager;
pub mod runs;

pub use branch_status::{compute_status, BranchStatusService};
pub use diff_base::{BaseSource, DiffBaseResolver, DiffContext, ResolvedBase};
pub use error::{SyncError, SyncResult};
pub use executor::{GitOperationExecutor, OperationOutcome};
pub use locks::{MutationGuard, WorktreeLocks};
pub use manager::{MergeRequest, OperationReport, WorkspaceSyncManager};
pub use runs::{ExecutionRuns, FinishedRun, RunLease};
