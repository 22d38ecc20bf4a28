// ABOUTME: Commit message generation from bounded diff context through an external text generator

pub mod context;
pub mod generator;
pub mod prompt;
pub mod service;

pub use context::{build_diff_context, summarize_diffs, ContextLimits, DiffSummary};
pub use generator::{clean_message, CommitMessageError, CommitMessageGenerator, DeepSeekClient};
pub use prompt::{BranchCommitRequest, CommitFormatConfig, CommitPromptGenerator};
pub use service::CommitMessageService;
