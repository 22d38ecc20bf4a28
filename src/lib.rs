// ABOUTME: Library crate for worktree-sync exposing the workspace synchronization engine

pub mod commit_message;
pub mod config;
pub mod git;
pub mod models;
pub mod store;
pub mod sync;

pub use config::AppConfig;
pub use sync::{
    DiffContext, MergeRequest, OperationOutcome, OperationReport, SyncError, SyncResult, WorkspaceSyncManager,
};
