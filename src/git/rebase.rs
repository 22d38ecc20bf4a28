// ABOUTME: Step-wise on-disk rebase with conflict stops, cooperative cancellation, continue and abort

use super::error::GitServiceError;
use super::repository::{GitResult, GitService};
use git2::{BranchType, ErrorCode, Oid, Rebase, RebaseOptions, Repository};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    Completed { new_head: Oid },
    /// Stopped on a conflicting step; the rebase state stays on disk.
    Conflicts(Vec<String>),
    /// Stopped between steps on request; the rebase state stays on disk.
    Cancelled { applied: usize, remaining: usize },
}

impl GitService {
    /// Replay the commits of `branch` after `old_upstream` onto `new_base`.
    /// `old_upstream` may be a branch name or a commit id.
    pub fn rebase_onto(
        &self,
        worktree_path: &Path,
        branch: &str,
        new_base: &str,
        old_upstream: &str,
        cancel: &CancellationToken,
    ) -> GitResult<RebaseOutcome> {
        let repo = self.open(worktree_path)?;
        let onto = self
            .resolve_branch(&repo, new_base)?
            .ok_or_else(|| GitServiceError::BranchNotFound(new_base.to_string()))?;
        let upstream_oid = match self.resolve_branch(&repo, old_upstream)? {
            Some(resolved) => resolved.oid,
            None => Oid::from_str(old_upstream)
                .map_err(|_| GitServiceError::BranchNotFound(old_upstream.to_string()))?,
        };

        let branch_ref = repo.find_branch(branch, BranchType::Local)?.into_reference();
        let branch_commit = repo.reference_to_annotated_commit(&branch_ref)?;
        let upstream = repo.find_annotated_commit(upstream_oid)?;
        let onto_commit = repo.find_annotated_commit(onto.oid)?;

        let mut opts = RebaseOptions::new();
        let mut rebase = repo.rebase(
            Some(&branch_commit),
            Some(&upstream),
            Some(&onto_commit),
            Some(&mut opts),
        )?;
        info!(
            "Rebasing {} onto {} ({} step(s))",
            branch,
            onto.name,
            rebase.len()
        );

        self.drive_rebase(&repo, &mut rebase, cancel)
    }

    /// Commit the resolved current step and replay the rest.
    pub fn continue_rebase(&self, worktree_path: &Path, cancel: &CancellationToken) -> GitResult<RebaseOutcome> {
        let repo = self.open(worktree_path)?;
        let mut opts = RebaseOptions::new();
        let mut rebase = repo.open_rebase(Some(&mut opts))?;

        let conflicts = self.conflicted_files(&repo)?;
        if !conflicts.is_empty() {
            return Ok(RebaseOutcome::Conflicts(conflicts));
        }
        if rebase.operation_current().is_some() {
            self.commit_step(&repo, &mut rebase)?;
        }

        self.drive_rebase(&repo, &mut rebase, cancel)
    }

    pub fn abort_rebase(&self, worktree_path: &Path) -> GitResult<()> {
        let repo = self.open(worktree_path)?;
        let mut rebase = repo.open_rebase(None)?;
        rebase.abort()?;
        info!("Aborted rebase in {}", worktree_path.display());
        Ok(())
    }

    fn drive_rebase(
        &self,
        repo: &Repository,
        rebase: &mut Rebase<'_>,
        cancel: &CancellationToken,
    ) -> GitResult<RebaseOutcome> {
        loop {
            if cancel.is_cancelled() {
                let applied = rebase.operation_current().map_or(0, |current| current + 1);
                let remaining = rebase.len().saturating_sub(applied);
                warn!("Rebase cancelled after {} step(s), {} left", applied, remaining);
                return Ok(RebaseOutcome::Cancelled { applied, remaining });
            }

            let Some(operation) = rebase.next() else {
                break;
            };
            operation?;

            let conflicts = self.conflicted_files(repo)?;
            if !conflicts.is_empty() {
                warn!("Rebase stopped on conflicts in {:?}", conflicts);
                return Ok(RebaseOutcome::Conflicts(conflicts));
            }
            self.commit_step(repo, rebase)?;
        }

        let signature = self.signature(repo)?;
        rebase.finish(Some(&signature))?;
        let new_head = self.head_oid(repo)?;
        info!("Rebase finished at {}", new_head);
        Ok(RebaseOutcome::Completed { new_head })
    }

    fn commit_step(&self, repo: &Repository, rebase: &mut Rebase<'_>) -> GitResult<()> {
        let signature = self.signature(repo)?;
        match rebase.commit(None, &signature, None) {
            Ok(_) => Ok(()),
            Err(e) if e.code() == ErrorCode::Applied => {
                debug!("Skipping rebase step whose changes are already applied");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
