// ABOUTME: System and user prompts for Conventional Commits style message generation

use super::context::DiffSummary;
use crate::config::CommitMessageConfig;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitFormatConfig {
    pub language: String,
    pub enable_emoji: bool,
    pub enable_body: bool,
    /// One message for all files rather than one per file.
    pub enable_merge_commit: bool,
}

impl From<&CommitMessageConfig> for CommitFormatConfig {
    fn from(config: &CommitMessageConfig) -> Self {
        Self {
            language: config.language.clone(),
            enable_emoji: config.enable_emoji,
            enable_body: config.enable_body,
            enable_merge_commit: config.enable_merge_commit,
        }
    }
}

/// Task details used to describe a branch when proposing its merge message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchCommitRequest {
    pub title: String,
    pub description: Option<String>,
    pub target_branch: String,
}

const TYPES: [(&str, &str, &str); 11] = [
    ("feat", "✨", "New feature"),
    ("fix", "🐛", "Bug fix"),
    ("docs", "📝", "Documentation"),
    ("style", "💄", "Code style"),
    ("refactor", "♻️", "Code refactoring"),
    ("perf", "⚡️", "Performance"),
    ("test", "✅", "Testing"),
    ("build", "📦️", "Build system"),
    ("ci", "👷", "CI config"),
    ("chore", "🔧", "Other changes"),
    ("i18n", "🌐", "Internationalization"),
];

pub struct CommitPromptGenerator;

impl CommitPromptGenerator {
    pub fn system_prompt(config: &CommitFormatConfig) -> String {
        let language = &config.language;
        let mut sections = vec![format!(
            "# Git commit message writer\n\n\
             Output only the commit message, written in {language}. \
             Scopes and technical terms stay in English. \
             No explanations, greetings, metadata or code fences."
        )];

        let emoji = if config.enable_emoji { "<emoji> " } else { "" };
        let mut format = format!("{emoji}<type>(<scope>): <subject>");
        if config.enable_body {
            format.push_str("\n\n<body>");
        }
        let grouping = if config.enable_merge_commit {
            "Combine all files into a single commit message."
        } else {
            "Write one commit message per file, separated by a blank line."
        };
        sections.push(format!("## Format\n\n{format}\n\n{grouping}"));

        let mut types = String::from("## Types\n");
        for (name, symbol, description) in TYPES {
            if config.enable_emoji {
                types.push_str(&format!("\n- {symbol} {name}: {description}"));
            } else {
                types.push_str(&format!("\n- {name}: {description}"));
            }
        }
        sections.push(types);

        let mut rules = String::from(
            "## Rules\n\n\
             - Pick the type from what the change actually does, not from file names\n\
             - Subject: imperative mood, lowercase, no trailing period, at most 50 characters\n\
             - Mark breaking changes with `!`, e.g. `feat(auth)!: ...`\n\
             - Use `core` or `misc` when no clearer scope exists\n\
             - For renames, name both the old and the new path",
        );
        if config.enable_body {
            rules.push_str(
                "\n- Body: one blank line after the subject, `-` bullets, at most 72 characters per line, \
                 say what changed and why",
            );
        } else {
            rules.push_str("\n- Subject line only, no body");
        }
        sections.push(rules);

        sections.join("\n\n")
    }

    /// User prompt for the commit that closes an execution run.
    pub fn run_commit_prompt(summary: &DiffSummary, diff_context: &str) -> String {
        let mut prompt = String::from("Write the commit message for these changes.\n\n");
        push_summary(&mut prompt, summary, diff_context);
        prompt
    }

    /// User prompt for the message of a task branch being merged into its target.
    pub fn branch_commit_prompt(request: &BranchCommitRequest, summary: &DiffSummary, diff_context: &str) -> String {
        let mut prompt = String::from(
            "Write the commit message for merging a task branch. Focus on what changed and why; \
             avoid generic lines such as \"update files\" or \"merge branch\".\n\n",
        );

        prompt.push_str(&format!("Task title: {}\n", request.title.trim()));
        if let Some(description) = request
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
        {
            prompt.push_str(&format!("Task description: {description}\n"));
        }
        prompt.push_str(&format!("Target branch: {}\n", request.target_branch));
        push_summary(&mut prompt, summary, diff_context);
        prompt
    }
}

fn push_summary(prompt: &mut String, summary: &DiffSummary, diff_context: &str) {
    prompt.push_str(&format!(
        "Diff summary: {} files, +{} / -{} lines\n",
        summary.files_changed, summary.lines_added, summary.lines_removed
    ));
    if !diff_context.trim().is_empty() {
        prompt.push_str("\nDiff context:\n");
        prompt.push_str(diff_context.trim());
        prompt.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format_config() -> CommitFormatConfig {
        CommitFormatConfig::from(&CommitMessageConfig::default())
    }

    #[test]
    fn test_system_prompt_language_and_emoji() {
        let mut config = format_config();
        config.language = "简体中文".to_string();
        let prompt = CommitPromptGenerator::system_prompt(&config);
        assert!(prompt.contains("written in 简体中文"));
        assert!(!prompt.contains("✨"));

        config.enable_emoji = true;
        let prompt = CommitPromptGenerator::system_prompt(&config);
        assert!(prompt.contains("✨ feat"));
        assert!(prompt.contains("<emoji> <type>(<scope>): <subject>"));
    }

    #[test]
    fn test_subject_only_format() {
        let mut config = format_config();
        config.enable_body = false;
        let prompt = CommitPromptGenerator::system_prompt(&config);
        assert!(prompt.contains("Subject line only"));
        assert!(!prompt.contains("<body>"));
    }

    #[test]
    fn test_branch_prompt_skips_blank_description() {
        let request = BranchCommitRequest {
            title: "  Fix login  ".to_string(),
            description: Some("   ".to_string()),
            target_branch: "main".to_string(),
        };
        let summary = DiffSummary {
            files_changed: 1,
            lines_added: 3,
            lines_removed: 1,
        };

        let prompt = CommitPromptGenerator::branch_commit_prompt(&request, &summary, "File: a.rs\n");
        assert!(prompt.contains("Task title: Fix login\n"));
        assert!(!prompt.contains("Task description"));
        assert!(prompt.contains("Diff summary: 1 files, +3 / -1 lines"));
        assert!(prompt.ends_with("Diff context:\nFile: a.rs\n"));
    }
}
