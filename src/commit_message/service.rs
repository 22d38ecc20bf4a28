// ABOUTME: Generates commit and merge messages from diffs, degrading every failure to "no message"

use super::context::{build_diff_context, summarize_diffs, ContextLimits};
use super::generator::{CommitMessageGenerator, DeepSeekClient};
use super::prompt::{BranchCommitRequest, CommitFormatConfig, CommitPromptGenerator};
use crate::config::CommitMessageConfig;
use crate::models::Diff;
use std::sync::Arc;
use tracing::{info, warn};

pub struct CommitMessageService {
    generator: Arc<dyn CommitMessageGenerator>,
    limits: ContextLimits,
    format: CommitFormatConfig,
}

impl CommitMessageService {
    pub fn new(generator: Arc<dyn CommitMessageGenerator>, config: &CommitMessageConfig) -> Self {
        Self {
            generator,
            limits: ContextLimits::from(config),
            format: CommitFormatConfig::from(config),
        }
    }

    /// `None` when generation is disabled or no API key is available.
    pub fn from_config(config: &CommitMessageConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        match DeepSeekClient::from_config(config) {
            Ok(client) => Some(Self::new(Arc::new(client), config)),
            Err(e) => {
                info!("Commit message generation unavailable: {}", e);
                None
            }
        }
    }

    /// Message for the commit that ends an execution run.
    pub async fn run_commit_message(&self, diffs: &[Diff]) -> Option<String> {
        if diffs.is_empty() {
            return None;
        }
        let context = build_diff_context(diffs, self.limits);
        let prompt = CommitPromptGenerator::run_commit_prompt(&summarize_diffs(diffs), &context);
        self.generate(&prompt).await
    }

    /// Proposed message for merging a task branch.
    pub async fn merge_message(&self, request: &BranchCommitRequest, diffs: &[Diff]) -> Option<String> {
        let context = build_diff_context(diffs, self.limits);
        let prompt =
            CommitPromptGenerator::branch_commit_prompt(request, &summarize_diffs(diffs), &context);
        self.generate(&prompt).await
    }

    async fn generate(&self, prompt: &str) -> Option<String> {
        let system_prompt = CommitPromptGenerator::system_prompt(&self.format);
        match self.generator.generate(&system_prompt, prompt).await {
            Ok(message) if !message.trim().is_empty() => Some(message.trim().to_string()),
            Ok(_) => {
                warn!("Commit message generator returned an empty message");
                None
            }
            Err(e) => {
                warn!("Commit message generation failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit_message::generator::{CommitMessageError, MockCommitMessageGenerator};
    use crate::models::DiffChangeKind;
    use mockall::predicate::function;

    fn added(path: &str) -> Diff {
        Diff {
            old_path: None,
            new_path: Some(path.to_string()),
            change: DiffChangeKind::Added,
            old_content: None,
            new_content: Some("fn main() {}\n".to_string()),
            additions: 1,
            deletions: 0,
            content_omitted: false,
        }
    }

    #[tokio::test]
    async fn test_run_message_passes_diff_context() {
        let mut generator = MockCommitMessageGenerator::new();
        generator
            .expect_generate()
            .with(
                function(|system: &str| system.contains("written in English")),
                function(|prompt: &str| prompt.contains("File: src/main.rs") && prompt.contains("+1 / -0")),
            )
            .times(1)
            .returning(|_, _| Ok("feat(core): add entry point".to_string()));

        let service = CommitMessageService::new(Arc::new(generator), &CommitMessageConfig::default());
        let message = service.run_commit_message(&[added("src/main.rs")]).await;
        assert_eq!(message.as_deref(), Some("feat(core): add entry point"));
    }

    #[tokio::test]
    async fn test_generator_failure_degrades_to_none() {
        let mut generator = MockCommitMessageGenerator::new();
        generator
            .expect_generate()
            .returning(|_, _| Err(CommitMessageError::EmptyResponse));

        let service = CommitMessageService::new(Arc::new(generator), &CommitMessageConfig::default());
        let request = BranchCommitRequest {
            title: "Add entry point".to_string(),
            description: None,
            target_branch: "main".to_string(),
        };
        assert_eq!(service.merge_message(&request, &[added("a.rs")]).await, None);
    }

    #[tokio::test]
    async fn test_no_diffs_skips_generator() {
        let mut generator = MockCommitMessageGenerator::new();
        generator.expect_generate().never();

        let service = CommitMessageService::new(Arc::new(generator), &CommitMessageConfig::default());
        assert_eq!(service.run_commit_message(&[]).await, None);
    }

    #[test]
    fn test_disabled_config_has_no_service() {
        let config = CommitMessageConfig {
            enabled: false,
            ..CommitMessageConfig::default()
        };
        assert!(CommitMessageService::from_config(&config).is_none());
    }
}
