// ABOUTME: Application configuration loaded from TOML with defaults for every field

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const CONFIG_ENV: &str = "WORKTREE_SYNC_CONFIG";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the registry, checkpoint and merge log files.
    pub state_dir: PathBuf,
    /// Root under which workspace worktrees are created.
    pub worktree_dir: PathBuf,
    pub remote_name: String,
    pub push_timeout_secs: u64,
    /// Either side of a file diff larger than this is reported by counts only.
    pub max_inline_diff_bytes: usize,
    pub default_author_name: String,
    pub default_author_email: String,
    pub commit_message: CommitMessageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitMessageConfig {
    pub enabled: bool,
    pub api_url: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_diff_context_chars: usize,
    pub max_file_content_chars: usize,
    pub language: String,
    pub enable_emoji: bool,
    pub enable_body: bool,
    pub enable_merge_commit: bool,
}

impl Default for CommitMessageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://api.deepseek.com/v1/chat/completions".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            timeout_secs: 30,
            max_diff_context_chars: 12_000,
            max_file_content_chars: 2_000,
            language: "English".to_string(),
            enable_emoji: false,
            enable_body: true,
            enable_merge_commit: true,
        }
    }
}

impl CommitMessageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("dev", "worktree-sync", "worktree-sync")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .or_else(|| dirs::home_dir().map(|home| home.join(".worktree-sync")))
            .unwrap_or_else(|| PathBuf::from(".worktree-sync"));

        Self {
            state_dir: data_dir.join("state"),
            worktree_dir: data_dir.join("worktrees"),
            remote_name: "origin".to_string(),
            push_timeout_secs: 60,
            max_inline_diff_bytes: 1024 * 1024,
            default_author_name: "Worktree Sync".to_string(),
            default_author_email: "worktree-sync@localhost".to_string(),
            commit_message: CommitMessageConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `$WORKTREE_SYNC_CONFIG` or the platform config directory.
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => match Self::default_path() {
                Some(path) => path,
                None => {
                    debug!("No config directory available, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "worktree-sync", "worktree-sync")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).with_context(|| {
            format!("Failed to create state directory: {}", self.state_dir.display())
        })?;
        std::fs::create_dir_all(&self.worktree_dir).with_context(|| {
            format!(
                "Failed to create worktree directory: {}",
                self.worktree_dir.display()
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
remote_name = "upstream"
push_timeout_secs = 5

[commit_message]
language = "简体中文"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.remote_name, "upstream");
        assert_eq!(config.push_timeout(), Duration::from_secs(5));
        assert_eq!(config.commit_message.language, "简体中文");
        assert_eq!(config.commit_message.max_diff_context_chars, 12_000);
        assert_eq!(config.max_inline_diff_bytes, 1024 * 1024);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "push_timeout_secs = \"soon\"").unwrap();

        assert!(AppConfig::load_from(&path).is_err());
    }
}
