// ABOUTME: Per-(execution run, repository) checkpoint of head commits before and after a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Head commits recorded around one automated execution run in one repository.
///
/// `before_head_commit` never changes after creation. `after_head_commit` is
/// written once when the run finishes. `merge_commit` is stamped at most once,
/// by the first merge that contains the run's commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: Uuid,
    pub workspace_id: Uuid,
    pub repo_id: Uuid,
    pub before_head_commit: String,
    pub after_head_commit: Option<String>,
    pub merge_commit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(run_id: Uuid, workspace_id: Uuid, repo_id: Uuid, before_head: String) -> Self {
        Self {
            run_id,
            workspace_id,
            repo_id,
            before_head_commit: before_head,
            after_head_commit: None,
            merge_commit: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.after_head_commit.is_some()
    }

    pub fn is_merged(&self) -> bool {
        self.merge_commit.is_some()
    }

    /// The newest commit known to belong to this run.
    pub fn tip(&self) -> &str {
        self.after_head_commit
            .as_deref()
            .unwrap_or(&self.before_head_commit)
    }
}
