// ABOUTME: Commit message generator seam and its DeepSeek chat-completions client

use crate::config::CommitMessageConfig;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

lazy_static! {
    static ref CODE_FENCE: Regex =
        Regex::new(r"(?s)^\s*```[A-Za-z]*\s*\n(.*?)\n?\s*```\s*$").expect("fence pattern is valid");
}

#[derive(Debug, Error)]
pub enum CommitMessageError {
    #[error("{0} environment variable is not set")]
    ApiKeyNotSet(String),
    #[error("Commit message API error: {0}")]
    Api(String),
    #[error("Empty response from commit message API")]
    EmptyResponse,
    #[error("Commit message request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommitMessageGenerator: Send + Sync {
    /// Produce a commit message from a system prompt and a user prompt
    /// carrying the diff context.
    async fn generate(&self, system_prompt: &str, prompt: &str) -> Result<String, CommitMessageError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// OpenAI-compatible chat-completions client, DeepSeek by default.
pub struct DeepSeekClient {
    client: reqwest::Client,
    api_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl DeepSeekClient {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            timeout,
        }
    }

    /// Read the API key from the configured environment variable.
    pub fn from_config(config: &CommitMessageConfig) -> Result<Self, CommitMessageError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| CommitMessageError::ApiKeyNotSet(config.api_key_env.clone()))?;
        Ok(Self::new(
            config.api_url.clone(),
            config.model.clone(),
            api_key,
            config.timeout(),
        ))
    }

    async fn request(&self, system_prompt: &str, prompt: &str) -> Result<String, CommitMessageError> {
        let payload = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.2,
            max_tokens: 400,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CommitMessageError::Api(format!(
                "{} {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let data: ChatResponse = response.json().await?;
        Ok(data
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl CommitMessageGenerator for DeepSeekClient {
    async fn generate(&self, system_prompt: &str, prompt: &str) -> Result<String, CommitMessageError> {
        debug!("Requesting commit message from {} ({})", self.api_url, self.model);
        let raw = tokio::time::timeout(self.timeout, self.request(system_prompt, prompt))
            .await
            .map_err(|_| CommitMessageError::Timeout(self.timeout))??;

        let message = clean_message(&raw);
        if message.is_empty() {
            return Err(CommitMessageError::EmptyResponse);
        }
        Ok(message)
    }
}

/// Strip a wrapping code fence and surrounding whitespace from model output.
pub fn clean_message(raw: &str) -> String {
    let unfenced = CODE_FENCE
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .map_or(raw, |inner| inner.as_str());
    unfenced.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_message_strips_fences() {
        assert_eq!(
            clean_message("```text\nfix(core): handle empty diff\n\n- skip\n```"),
            "fix(core): handle empty diff\n\n- skip"
        );
        assert_eq!(clean_message("```\nfeat: add x\n```\n"), "feat: add x");
        assert_eq!(clean_message("  chore: tidy  \n"), "chore: tidy");
    }

    #[test]
    fn test_missing_api_key() {
        let config = CommitMessageConfig {
            api_key_env: "WORKTREE_SYNC_TEST_KEY_THAT_IS_NOT_SET".to_string(),
            ..CommitMessageConfig::default()
        };
        assert!(matches!(
            DeepSeekClient::from_config(&config),
            Err(CommitMessageError::ApiKeyNotSet(_))
        ));
    }
}
