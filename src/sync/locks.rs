// ABOUTME: Per-(workspace, repository) locking: a fail-fast mutation gate plus a snapshot read/write lock

use super::error::{SyncError, SyncResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, RwLock, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct PairLock {
    gate: Arc<AsyncMutex<()>>,
    snapshot: Arc<RwLock<()>>,
}

/// The gate admits one mutating operation (or one execution run) per pair and
/// refuses the rest. The snapshot lock is held for writing only while git
/// state is actually being changed, so readers wait for that and nothing longer.
#[derive(Default)]
pub struct WorktreeLocks {
    pairs: Mutex<HashMap<(Uuid, Uuid), Arc<PairLock>>>,
}

impl WorktreeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn pair(&self, workspace_id: Uuid, repo_id: Uuid) -> Arc<PairLock> {
        let mut pairs = self
            .pairs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        pairs.entry((workspace_id, repo_id)).or_default().clone()
    }

    pub fn try_acquire(&self, workspace_id: Uuid, repo_id: Uuid) -> SyncResult<MutationGuard> {
        let pair = self.pair(workspace_id, repo_id);
        let gate = pair.gate.clone().try_lock_owned().map_err(|_| {
            debug!(
                "Mutation refused for workspace {} repo {}: gate held",
                workspace_id, repo_id
            );
            SyncError::OperationInProgress {
                workspace_id,
                repo_id,
            }
        })?;

        Ok(MutationGuard {
            _gate: gate,
            snapshot: pair.snapshot.clone(),
        })
    }

    /// Drop the bookkeeping for a pair that will not be used again. A pair
    /// still referenced by a guard or reader is kept.
    pub fn forget(&self, workspace_id: Uuid, repo_id: Uuid) {
        let mut pairs = self
            .pairs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(pair) = pairs.get(&(workspace_id, repo_id)) {
            let idle = Arc::strong_count(pair) == 1
                && Arc::strong_count(&pair.gate) == 1
                && Arc::strong_count(&pair.snapshot) == 1;
            if idle {
                pairs.remove(&(workspace_id, repo_id));
            }
        }
    }

    /// Wait for any in-flight git mutation to finish, then hold a shared snapshot.
    pub async fn read(&self, workspace_id: Uuid, repo_id: Uuid) -> OwnedRwLockReadGuard<()> {
        self.pair(workspace_id, repo_id).snapshot.clone().read_owned().await
    }
}

/// Exclusive right to mutate one (workspace, repository) pair.
pub struct MutationGuard {
    _gate: OwnedMutexGuard<()>,
    snapshot: Arc<RwLock<()>>,
}

impl MutationGuard {
    pub async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.snapshot.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_mutation_fails_fast() {
        let locks = WorktreeLocks::new();
        let (workspace, repo) = (Uuid::new_v4(), Uuid::new_v4());

        let guard = locks.try_acquire(workspace, repo).unwrap();
        assert!(matches!(
            locks.try_acquire(workspace, repo),
            Err(SyncError::OperationInProgress { .. })
        ));
        assert!(locks.try_acquire(workspace, Uuid::new_v4()).is_ok());

        drop(guard);
        assert!(locks.try_acquire(workspace, repo).is_ok());
    }

    #[tokio::test]
    async fn test_forget_drops_idle_pairs_only() {
        let locks = WorktreeLocks::new();
        let (workspace, repo) = (Uuid::new_v4(), Uuid::new_v4());

        let guard = locks.try_acquire(workspace, repo).unwrap();
        locks.forget(workspace, repo);
        assert_eq!(locks.pairs.lock().unwrap().len(), 1);

        drop(guard);
        locks.forget(workspace, repo);
        assert!(locks.pairs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reads_only_wait_for_write_section() {
        let locks = WorktreeLocks::new();
        let (workspace, repo) = (Uuid::new_v4(), Uuid::new_v4());
        let guard = locks.try_acquire(workspace, repo).unwrap();

        // Holding only the gate does not block readers.
        let read = tokio::time::timeout(Duration::from_millis(100), locks.read(workspace, repo)).await;
        assert!(read.is_ok());
        drop(read);

        let write = guard.write().await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.read(workspace, repo)).await;
        assert!(blocked.is_err());
        drop(write);

        let read = tokio::time::timeout(Duration::from_millis(100), locks.read(workspace, repo)).await;
        assert!(read.is_ok());
    }
}
