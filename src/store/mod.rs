// ABOUTME: Persistent bookkeeping: repository registry, execution checkpoints and merge history

pub mod checkpoints;
pub mod error;
pub mod json_file;
pub mod merge_log;
pub mod registry;

pub use checkpoints::CheckpointStore;
pub use error::{StoreError, StoreResult};
pub use json_file::JsonFile;
pub use merge_log::MergeHistoryLog;
pub use registry::RepositoryRegistry;
