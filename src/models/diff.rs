// ABOUTME: File-level diff entries returned by diff queries

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffChangeKind {
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
}

impl DiffChangeKind {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Added => "A",
            Self::Deleted => "D",
            Self::Modified => "M",
            Self::Renamed => "R",
            Self::Copied => "C",
        }
    }
}

/// One changed file. When `content_omitted` is set neither content field is
/// populated; only the line counts are reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub change: DiffChangeKind,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    pub additions: usize,
    pub deletions: usize,
    pub content_omitted: bool,
}

impl Diff {
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("unknown")
    }
}
