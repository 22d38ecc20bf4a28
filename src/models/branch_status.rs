// ABOUTME: Derived divergence status of a workspace branch against its target branch

use super::merge::MergeRecord;
use serde::{Deserialize, Serialize};

/// Which in-progress git operation owns the current conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictOp {
    Merge,
    Rebase,
    CherryPick,
    Revert,
}

impl std::fmt::Display for ConflictOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Merge => "merge",
            Self::Rebase => "rebase",
            Self::CherryPick => "cherry-pick",
            Self::Revert => "revert",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchStatus {
    pub commits_ahead: usize,
    pub commits_behind: usize,
    pub conflicted_files: Vec<String>,
    pub conflict_op: Option<ConflictOp>,
    pub is_rebase_in_progress: bool,
    pub is_target_remote: bool,
    pub target_branch_name: String,
    pub head_oid: String,
    pub has_uncommitted_changes: bool,
    pub uncommitted_count: usize,
    pub untracked_count: usize,
    /// Only populated while a pull request is open.
    pub remote_commits_ahead: Option<usize>,
    pub remote_commits_behind: Option<usize>,
    /// Newest first.
    pub merges: Vec<MergeRecord>,
}

impl BranchStatus {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicted_files.is_empty()
    }

    pub fn latest_merge(&self) -> Option<&MergeRecord> {
        self.merges.iter().find(|m| m.merge.is_completed())
    }

    pub fn summary(&self) -> String {
        if self.has_conflicts() {
            return format!(
                "{} conflicted file(s){}",
                self.conflicted_files.len(),
                self.conflict_op
                    .map(|op| format!(" during {op}"))
                    .unwrap_or_default()
            );
        }
        format!(
            "{} ahead, {} behind {}",
            self.commits_ahead, self.commits_behind, self.target_branch_name
        )
    }
}
