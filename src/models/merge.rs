// ABOUTME: Merge history entries - direct merges and pull request merges as a tagged variant

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Open,
    Merged,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub url: String,
    pub status: MergeStatus,
    /// Commit the remote produced when the PR was merged, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_commit_sha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Merge {
    Direct { merge_commit: String },
    PullRequest(PullRequestInfo),
}

impl Merge {
    pub fn direct(merge_commit: impl Into<String>) -> Self {
        Self::Direct {
            merge_commit: merge_commit.into(),
        }
    }

    pub fn pull_request(number: u64, url: impl Into<String>) -> Self {
        Self::PullRequest(PullRequestInfo {
            number,
            url: url.into(),
            status: MergeStatus::Open,
            merge_commit_sha: None,
        })
    }

    /// Whether this entry marks a point after which only newer changes count.
    /// An open or closed PR never does.
    pub fn is_completed(&self) -> bool {
        match self {
            Self::Direct { .. } => true,
            Self::PullRequest(pr) => pr.status == MergeStatus::Merged,
        }
    }

    pub fn is_open_pull_request(&self) -> bool {
        match self {
            Self::Direct { .. } => false,
            Self::PullRequest(pr) => pr.status == MergeStatus::Open,
        }
    }

    /// The commit to anchor diffs on, when one is known locally.
    pub fn anchor_commit(&self) -> Option<&str> {
        match self {
            Self::Direct { merge_commit } => Some(merge_commit),
            Self::PullRequest(pr) => match pr.status {
                MergeStatus::Merged => pr.merge_commit_sha.as_deref(),
                MergeStatus::Open | MergeStatus::Closed => None,
            },
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Direct { merge_commit } => {
                format!("merged {}", &merge_commit[..merge_commit.len().min(8)])
            }
            Self::PullRequest(pr) => match pr.status {
                MergeStatus::Open => format!("PR #{} open", pr.number),
                MergeStatus::Merged => format!("PR #{} merged", pr.number),
                MergeStatus::Closed => format!("PR #{} closed", pr.number),
            },
        }
    }
}

/// A merge log row for one (workspace, repository) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub repo_id: Uuid,
    pub target_branch: String,
    pub merge: Merge,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_pull_request_is_not_completed() {
        let merge = Merge::pull_request(7, "https://example.com/pr/7");
        assert!(!merge.is_completed());
        assert!(merge.is_open_pull_request());
        assert_eq!(merge.anchor_commit(), None);
    }

    #[test]
    fn test_merged_pull_request_anchor() {
        let merge = Merge::PullRequest(PullRequestInfo {
            number: 3,
            url: "u".to_string(),
            status: MergeStatus::Merged,
            merge_commit_sha: Some("abc123".to_string()),
        });
        assert!(merge.is_completed());
        assert_eq!(merge.anchor_commit(), Some("abc123"));
        assert_eq!(merge.label(), "PR #3 merged");
    }

    #[test]
    fn test_serialized_tag() {
        let json = serde_json::to_value(Merge::direct("deadbeef")).unwrap();
        assert_eq!(json["type"], "direct");
        assert_eq!(json["merge_commit"], "deadbeef");

        let json = serde_json::to_value(Merge::pull_request(1, "u")).unwrap();
        assert_eq!(json["type"], "pull_request");
        assert_eq!(json["status"], "open");
    }
}
