// ABOUTME: Turns file diffs into a size-bounded text context and line statistics for message prompts

use crate::config::CommitMessageConfig;
use crate::models::{Diff, DiffChangeKind};
use serde::Serialize;
use std::borrow::Cow;

pub const FILE_TRUNCATION_MARKER: &str = "... [truncated]";
pub const CONTEXT_TRUNCATION_MARKER: &str = "... diff context truncated ...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub max_total_chars: usize,
    pub max_file_chars: usize,
}

impl From<&CommitMessageConfig> for ContextLimits {
    fn from(config: &CommitMessageConfig) -> Self {
        Self {
            max_total_chars: config.max_diff_context_chars,
            max_file_chars: config.max_file_content_chars,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub files_changed: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
}

pub fn summarize_diffs(diffs: &[Diff]) -> DiffSummary {
    diffs.iter().fold(DiffSummary::default(), |mut summary, diff| {
        summary.files_changed += 1;
        summary.lines_added += diff.additions;
        summary.lines_removed += diff.deletions;
        summary
    })
}

/// One section per file, each side cut at `max_file_chars`. Files that would
/// push the whole context past `max_total_chars` are replaced by a single
/// marker line instead of being dropped silently.
pub fn build_diff_context(diffs: &[Diff], limits: ContextLimits) -> String {
    let mut sections: Vec<String> = Vec::new();
    let mut total_chars = 0usize;

    for diff in diffs {
        let section = file_section(diff, limits.max_file_chars);
        let section_chars = section.chars().count();

        if total_chars + section_chars > limits.max_total_chars {
            sections.push(CONTEXT_TRUNCATION_MARKER.to_string());
            break;
        }
        total_chars += section_chars;
        sections.push(section);
    }

    sections.join("\n")
}

fn file_section(diff: &Diff, max_file_chars: usize) -> String {
    let mut section = format!("File: {}\nChange: {}\n", diff.path(), change_name(diff.change));
    if diff.change == DiffChangeKind::Renamed {
        if let Some(old_path) = &diff.old_path {
            section.push_str(&format!("Renamed from: {old_path}\n"));
        }
    }

    if diff.content_omitted {
        section.push_str(&format!(
            "Content omitted. Additions: {}, Deletions: {}\n",
            diff.additions, diff.deletions
        ));
    } else {
        for (label, content) in [("--- Old\n", &diff.old_content), ("--- New\n", &diff.new_content)] {
            if let Some(content) = content {
                section.push_str(label);
                section.push_str(&truncate_chars(content, max_file_chars));
                section.push('\n');
            }
        }
    }

    section.push('\n');
    section
}

fn change_name(change: DiffChangeKind) -> &'static str {
    match change {
        DiffChangeKind::Added => "added",
        DiffChangeKind::Deleted => "deleted",
        DiffChangeKind::Modified => "modified",
        DiffChangeKind::Renamed => "renamed",
        DiffChangeKind::Copied => "copied",
    }
}

/// Cut `text` to at most `max_chars` characters, never inside a UTF-8 sequence.
pub fn truncate_chars(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        None => Cow::Borrowed(text),
        Some((byte_index, _)) => {
            Cow::Owned(format!("{}\n{}", &text[..byte_index], FILE_TRUNCATION_MARKER))
        }
    }
}
