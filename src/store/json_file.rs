// ABOUTME: In-memory state mirrored to a pretty-printed JSON file that is replaced atomically

use super::error::StoreResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Every update runs against a copy of the state under the write guard and
/// only becomes visible once the file has been replaced, so concurrent
/// updates are linearized and a failed write leaves memory untouched.
pub struct JsonFile<T> {
    path: Option<PathBuf>,
    state: RwLock<T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default + Clone,
{
    pub fn open(path: PathBuf) -> StoreResult<Self> {
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let state = serde_json::from_str(&content)?;
            info!("Loaded state from {}", path.display());
            state
        } else {
            debug!("No state file at {}, starting empty", path.display());
            T::default()
        };

        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(T::default()),
        }
    }

    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.state.read().await;
        f(&guard)
    }

    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> StoreResult<R>) -> StoreResult<R> {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let result = f(&mut next)?;

        if let Some(path) = &self.path {
            write_atomic(path, &serde_json::to_vec_pretty(&next)?)?;
        }
        *guard = next;
        Ok(result)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::error::StoreError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_update_persists_and_reloads() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("state.json");

        let file: JsonFile<Vec<String>> = JsonFile::open(path.clone()).unwrap();
        file.update(|items| {
            items.push("one".to_string());
            Ok(())
        })
        .await
        .unwrap();

        let reopened: JsonFile<Vec<String>> = JsonFile::open(path).unwrap();
        assert_eq!(reopened.read(|items| items.clone()).await, vec!["one"]);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_state_unchanged() {
        let file: JsonFile<Vec<u32>> = JsonFile::in_memory();
        let result: StoreResult<()> = file
            .update(|items| {
                items.push(1);
                Err(StoreError::InvalidTransition("nope".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert!(file.read(Vec::is_empty).await);
    }
}
