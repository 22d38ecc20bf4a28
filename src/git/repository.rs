// ABOUTME: Git primitives over libgit2 (refs, ancestry, commits, merges, reverts) and the git CLI for pushes

use super::error::GitServiceError;
use crate::config::AppConfig;
use crate::models::{CommitInfo, ConflictOp};
use git2::{
    build::CheckoutBuilder, BranchType, ErrorCode, Index, IndexAddOption, Oid, Repository,
    RepositoryState, ResetType, Signature, Sort, Status, StatusOptions,
};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

pub type GitResult<T> = Result<T, GitServiceError>;

lazy_static! {
    static ref PUSH_REJECTED: Regex =
        Regex::new(r"(?i)(\[rejected\]|\[remote rejected\]|non-fast-forward|fetch first)")
            .expect("push rejection pattern is valid");
}

/// A branch name resolved to a commit, locally or on the configured remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBranch {
    pub name: String,
    pub oid: Oid,
    pub is_remote: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged(Oid),
    AlreadyMerged,
    Conflicts(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertOutcome {
    Reverted(Oid),
    Conflicts(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct GitService {
    remote_name: String,
    push_timeout: Duration,
    fallback_name: String,
    fallback_email: String,
}

impl GitService {
    pub fn new(remote_name: impl Into<String>, push_timeout: Duration) -> Self {
        Self {
            remote_name: remote_name.into(),
            push_timeout,
            fallback_name: "Worktree Sync".to_string(),
            fallback_email: "worktree-sync@localhost".to_string(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            remote_name: config.remote_name.clone(),
            push_timeout: config.push_timeout(),
            fallback_name: config.default_author_name.clone(),
            fallback_email: config.default_author_email.clone(),
        }
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn open(&self, path: &Path) -> GitResult<Repository> {
        if !path.exists() {
            return Err(GitServiceError::RepositoryNotFound(path.to_path_buf()));
        }
        Repository::open(path).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                GitServiceError::RepositoryNotFound(path.to_path_buf())
            } else {
                e.into()
            }
        })
    }

    // ---- refs and ancestry -------------------------------------------------

    pub fn branch_head(&self, repo: &Repository, branch: &str) -> GitResult<Oid> {
        local_branch_target(repo, branch)?
            .ok_or_else(|| GitServiceError::BranchNotFound(branch.to_string()))
    }

    pub fn head_oid(&self, repo: &Repository) -> GitResult<Oid> {
        repo.head()?
            .target()
            .ok_or_else(|| GitServiceError::BranchNotFound("HEAD".to_string()))
    }

    /// Resolve a target branch: the local branch first, then the remote-tracking one.
    pub fn resolve_branch(&self, repo: &Repository, name: &str) -> GitResult<Option<ResolvedBranch>> {
        if let Some(oid) = local_branch_target(repo, name)? {
            return Ok(Some(ResolvedBranch {
                name: name.to_string(),
                oid,
                is_remote: false,
            }));
        }

        let prefix = format!("{}/", self.remote_name);
        let candidates = if name.starts_with(&prefix) {
            vec![name.to_string()]
        } else {
            vec![format!("{prefix}{name}"), name.to_string()]
        };

        for candidate in candidates {
            match repo.find_branch(&candidate, BranchType::Remote) {
                Ok(branch) => {
                    if let Some(oid) = branch.get().target() {
                        return Ok(Some(ResolvedBranch {
                            name: candidate,
                            oid,
                            is_remote: true,
                        }));
                    }
                }
                Err(e) if is_missing(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(None)
    }

    pub fn branch_exists(&self, repo: &Repository, name: &str) -> GitResult<bool> {
        Ok(self.resolve_branch(repo, name)?.is_some())
    }

    /// `(ahead, behind)` of `local` relative to `upstream`.
    pub fn ahead_behind(&self, repo: &Repository, local: Oid, upstream: Oid) -> GitResult<(usize, usize)> {
        Ok(repo.graph_ahead_behind(local, upstream)?)
    }

    pub fn merge_base(&self, repo: &Repository, a: Oid, b: Oid) -> GitResult<Oid> {
        Ok(repo.merge_base(a, b)?)
    }

    pub fn is_ancestor(&self, repo: &Repository, ancestor: Oid, descendant: Oid) -> GitResult<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(repo.graph_descendant_of(descendant, ancestor)?)
    }

    /// Whether the workspace branch head is already on the remote-tracking ref.
    pub fn is_pushed(&self, repo: &Repository, branch: &str, head: Oid) -> GitResult<bool> {
        match self.remote_tracking_oid(repo, branch)? {
            Some(remote_oid) => self.is_ancestor(repo, head, remote_oid),
            None => Ok(false),
        }
    }

    pub fn remote_ahead_behind(&self, repo: &Repository, branch: &str) -> GitResult<Option<(usize, usize)>> {
        let Some(remote_oid) = self.remote_tracking_oid(repo, branch)? else {
            return Ok(None);
        };
        let local = self.branch_head(repo, branch)?;
        Ok(Some(self.ahead_behind(repo, local, remote_oid)?))
    }

    fn remote_tracking_oid(&self, repo: &Repository, branch: &str) -> GitResult<Option<Oid>> {
        let refname = format!("refs/remotes/{}/{}", self.remote_name, branch);
        match repo.refname_to_id(&refname) {
            Ok(oid) => Ok(Some(oid)),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_commits(&self, repo: &Repository, head: Oid, hide: Option<Oid>) -> GitResult<Vec<CommitInfo>> {
        let mut walk = repo.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        walk.push(head)?;
        if let Some(hidden) = hide {
            walk.hide(hidden)?;
        }

        walk.map(|oid| {
            let commit = repo.find_commit(oid?)?;
            Ok(CommitInfo::from_commit(&commit))
        })
        .collect()
    }

    // ---- worktree state ----------------------------------------------------

    pub fn conflicted_files(&self, repo: &Repository) -> GitResult<Vec<String>> {
        let index = repo.index()?;
        index_conflicts(&index)
    }

    pub fn conflict_op(&self, repo: &Repository) -> Option<ConflictOp> {
        match repo.state() {
            RepositoryState::Merge => Some(ConflictOp::Merge),
            RepositoryState::Rebase
            | RepositoryState::RebaseInteractive
            | RepositoryState::RebaseMerge
            | RepositoryState::ApplyMailboxOrRebase => Some(ConflictOp::Rebase),
            RepositoryState::CherryPick | RepositoryState::CherryPickSequence => {
                Some(ConflictOp::CherryPick)
            }
            RepositoryState::Revert | RepositoryState::RevertSequence => Some(ConflictOp::Revert),
            _ => None,
        }
    }

    pub fn is_rebase_in_progress(&self, repo: &Repository) -> bool {
        matches!(self.conflict_op(repo), Some(ConflictOp::Rebase))
            || repo.path().join("rebase-merge").exists()
            || repo.path().join("rebase-apply").exists()
    }

    /// `(uncommitted, untracked)` entry counts for the working tree.
    pub fn change_counts(&self, repo: &Repository) -> GitResult<(usize, usize)> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let statuses = repo.statuses(Some(&mut opts))?;
        let mut uncommitted = 0;
        let mut untracked = 0;
        for entry in statuses.iter() {
            let status = entry.status();
            if status == Status::CURRENT || status.is_ignored() {
                continue;
            }
            if status == Status::WT_NEW {
                untracked += 1;
            } else {
                uncommitted += 1;
            }
        }
        Ok((uncommitted, untracked))
    }

    pub fn has_changes(&self, repo: &Repository) -> GitResult<bool> {
        let (uncommitted, untracked) = self.change_counts(repo)?;
        Ok(uncommitted + untracked > 0)
    }

    pub fn signature(&self, repo: &Repository) -> GitResult<Signature<'static>> {
        match repo.signature() {
            Ok(signature) => Ok(signature),
            Err(e) => {
                debug!("No git identity configured ({}), using fallback", e.message());
                Ok(Signature::now(&self.fallback_name, &self.fallback_email)?)
            }
        }
    }

    // ---- worktree mutations ------------------------------------------------

    /// Stage everything and commit. Returns `None` when the tree is unchanged.
    /// A merge in progress (all conflicts staged) is concluded with its merge parent.
    pub fn commit_worktree(&self, worktree_path: &Path, message: &str) -> GitResult<Option<Oid>> {
        let mut repo = self.open(worktree_path)?;

        let tree_id = {
            let mut index = repo.index()?;
            index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
            index.update_all(["*"].iter(), None)?;
            index.write()?;
            index.write_tree()?
        };

        let mut merge_heads = Vec::new();
        if repo.state() == RepositoryState::Merge {
            repo.mergehead_foreach(|oid| {
                merge_heads.push(*oid);
                true
            })?;
        }

        let head = repo.head()?.peel_to_commit()?;
        if merge_heads.is_empty() && head.tree_id() == tree_id {
            debug!("Nothing to commit in {}", worktree_path.display());
            return Ok(None);
        }

        let tree = repo.find_tree(tree_id)?;
        let signature = self.signature(&repo)?;
        let merged = merge_heads
            .iter()
            .map(|oid| repo.find_commit(*oid))
            .collect::<Result<Vec<_>, _>>()?;
        let mut parents = vec![&head];
        parents.extend(merged.iter());

        let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        if !merge_heads.is_empty() {
            repo.cleanup_state()?;
        }

        info!("Created commit {} in {}", oid, worktree_path.display());
        Ok(Some(oid))
    }

    /// Move the checked-out branch to its head's first parent, keeping the
    /// working tree as it is.
    pub fn undo_last_commit(&self, worktree_path: &Path) -> GitResult<Oid> {
        let repo = self.open(worktree_path)?;
        let head = repo.head()?.peel_to_commit()?;
        let parent = head.parent(0)?;
        repo.reset(parent.as_object(), ResetType::Mixed, None)?;
        info!("Reset {} from {} to {}", worktree_path.display(), head.id(), parent.id());
        Ok(parent.id())
    }

    /// Rewrite the head commit's message. Returns `(old_head, new_head)`.
    pub fn amend_head_message(&self, worktree_path: &Path, message: &str) -> GitResult<(Oid, Oid)> {
        let repo = self.open(worktree_path)?;
        let head = repo.head()?.peel_to_commit()?;
        if head.message().map(str::trim) == Some(message.trim()) {
            return Ok((head.id(), head.id()));
        }
        let amended = head.amend(Some("HEAD"), None, None, None, Some(message), None)?;
        debug!("Amended {} into {}", head.id(), amended);
        Ok((head.id(), amended))
    }

    /// Abort whatever merge, revert or cherry-pick left the worktree conflicted.
    /// Rebases are handled by `abort_rebase`.
    pub fn abort_merge(&self, worktree_path: &Path) -> GitResult<()> {
        let repo = self.open(worktree_path)?;
        let head = repo.head()?.peel_to_commit()?;
        repo.reset(head.as_object(), ResetType::Hard, None)?;
        repo.cleanup_state()?;
        info!("Aborted in-progress merge in {}", worktree_path.display());
        Ok(())
    }

    // ---- target branch mutations -------------------------------------------

    /// Create a two-parent merge commit of `branch` into local `target` and
    /// move `target` to it. On conflicts nothing is committed; the conflicting
    /// merge is replayed in the workspace worktree so its state shows them.
    pub fn merge_into_target(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        branch: &str,
        target: &str,
        message: &str,
    ) -> GitResult<MergeOutcome> {
        let repo = self.open(repo_path)?;
        let workspace_oid = self.branch_head(&repo, branch)?;
        let target_oid = self.branch_head(&repo, target)?;

        if self.is_ancestor(&repo, workspace_oid, target_oid)? {
            return Ok(MergeOutcome::AlreadyMerged);
        }
        self.ensure_clean_if_checked_out(&repo, target)?;

        let target_commit = repo.find_commit(target_oid)?;
        let workspace_commit = repo.find_commit(workspace_oid)?;
        let mut index = repo.merge_commits(&target_commit, &workspace_commit, None)?;

        if index.has_conflicts() {
            let files = index_conflicts(&index)?;
            warn!("Merging {} into {} conflicts in {:?}", branch, target, files);
            self.replay_conflicting_merge(worktree_path, target_oid)?;
            return Ok(MergeOutcome::Conflicts(files));
        }

        let tree = repo.find_tree(index.write_tree_to(&repo)?)?;
        let signature = self.signature(&repo)?;
        let merge_oid = repo.commit(
            None,
            &signature,
            &signature,
            message,
            &tree,
            &[&target_commit, &workspace_commit],
        )?;
        self.advance_branch(&repo, target, target_oid, merge_oid)?;

        info!("Merged {} into {} as {}", branch, target, merge_oid);
        Ok(MergeOutcome::Merged(merge_oid))
    }

    /// Commit the inverse of `merge_commit` on top of local `target`.
    pub fn revert_on_target(&self, repo_path: &Path, target: &str, merge_commit: &str) -> GitResult<RevertOutcome> {
        let repo = self.open(repo_path)?;
        let target_oid = self.branch_head(&repo, target)?;
        let merge = repo.find_commit(Oid::from_str(merge_commit)?)?;
        let target_commit = repo.find_commit(target_oid)?;
        self.ensure_clean_if_checked_out(&repo, target)?;

        let mainline = if merge.parent_count() > 1 { 1 } else { 0 };
        let mut index = repo.revert_commit(&merge, &target_commit, mainline, None)?;
        if index.has_conflicts() {
            return Ok(RevertOutcome::Conflicts(index_conflicts(&index)?));
        }

        let tree = repo.find_tree(index.write_tree_to(&repo)?)?;
        let signature = self.signature(&repo)?;
        let message = format!(
            "Revert \"{}\"\n\nThis reverts commit {}.",
            merge.summary().unwrap_or("merge"),
            merge.id()
        );
        let revert_oid = repo.commit(None, &signature, &signature, &message, &tree, &[&target_commit])?;
        self.advance_branch(&repo, target, target_oid, revert_oid)?;

        info!("Reverted {} on {} as {}", merge.id(), target, revert_oid);
        Ok(RevertOutcome::Reverted(revert_oid))
    }

    fn is_checked_out(&self, repo: &Repository, branch: &str) -> bool {
        !repo.is_bare()
            && repo
                .head()
                .ok()
                .is_some_and(|head| head.is_branch() && head.shorthand() == Some(branch))
    }

    fn ensure_clean_if_checked_out(&self, repo: &Repository, branch: &str) -> GitResult<()> {
        if !self.is_checked_out(repo, branch) {
            return Ok(());
        }
        let (uncommitted, _) = self.change_counts(repo)?;
        if uncommitted > 0 {
            return Err(GitServiceError::DirtyCheckout {
                branch: branch.to_string(),
                path: repo.workdir().unwrap_or_else(|| repo.path()).to_path_buf(),
            });
        }
        Ok(())
    }

    /// Compare-and-swap `branch` from `expected` to `new_oid`. When the branch
    /// is checked out in `repo`, the checkout follows only after the ref moved,
    /// and only the paths that differ between the two commits are rewritten.
    fn advance_branch(&self, repo: &Repository, branch: &str, expected: Oid, new_oid: Oid) -> GitResult<()> {
        let refname = format!("refs/heads/{branch}");
        let log_message = format!("worktree-sync: advance {branch} to {new_oid}");
        if let Err(e) = repo.reference_matching(&refname, new_oid, true, expected, &log_message) {
            return Err(if e.code() == ErrorCode::Modified {
                GitServiceError::RefMoved(branch.to_string())
            } else {
                e.into()
            });
        }

        if !self.is_checked_out(repo, branch) {
            return Ok(());
        }
        if let Err(e) = self.sync_checkout(repo, expected, new_oid) {
            warn!("Checkout of {} did not follow {}: {}", branch, new_oid, e);
            let rollback = format!("worktree-sync: roll back {branch} to {expected}");
            let restore_to = match repo.reference_matching(&refname, expected, true, new_oid, &rollback) {
                Ok(_) => expected,
                Err(_) => repo.refname_to_id(&refname)?,
            };
            if let Err(restore) = self.sync_checkout(repo, new_oid, restore_to) {
                warn!("Failed to restore checkout of {}: {}", branch, restore);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Rewrite the checked-out files that differ between `from` and `to`.
    fn sync_checkout(&self, repo: &Repository, from: Oid, to: Oid) -> GitResult<()> {
        if from == to {
            return Ok(());
        }
        let from_tree = repo.find_commit(from)?.tree()?;
        let to_commit = repo.find_commit(to)?;
        let diff = repo.diff_tree_to_tree(Some(&from_tree), Some(&to_commit.tree()?), None)?;

        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(false);
        let mut any = false;
        for delta in diff.deltas() {
            for file in [delta.old_file(), delta.new_file()] {
                if let Some(path) = file.path() {
                    checkout.path(path);
                    any = true;
                }
            }
        }
        if any {
            repo.checkout_tree(to_commit.as_object(), Some(&mut checkout))?;
        }

        let Some(workdir) = repo.workdir() else {
            return Ok(());
        };
        let mut index = repo.index()?;
        for delta in diff.deltas().filter(|d| d.status() == git2::Delta::Deleted) {
            let Some(path) = delta.old_file().path() else {
                continue;
            };
            let full = workdir.join(path);
            if full.is_file() {
                std::fs::remove_file(&full)?;
            }
            if index.get_path(path, 0).is_some() {
                index.remove_path(path)?;
            }
        }
        index.write()?;
        Ok(())
    }

    fn replay_conflicting_merge(&self, worktree_path: &Path, target_oid: Oid) -> GitResult<()> {
        let repo = self.open(worktree_path)?;
        let annotated = repo.find_annotated_commit(target_oid)?;
        let mut checkout = CheckoutBuilder::new();
        checkout.safe().allow_conflicts(true).conflict_style_merge(true);
        repo.merge(&[&annotated], None, Some(&mut checkout))?;
        debug!("Replayed conflicting merge in {}", worktree_path.display());
        Ok(())
    }

    // ---- network -----------------------------------------------------------

    /// Push `branch` to the configured remote, bounded by the push timeout.
    pub async fn push_branch(&self, worktree_path: &Path, branch: &str) -> GitResult<()> {
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let mut command = tokio::process::Command::new("git");
        command
            .current_dir(worktree_path)
            .args(["push", "--porcelain", "-u", &self.remote_name, &refspec])
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.push_timeout, command.output())
            .await
            .map_err(|_| GitServiceError::Timeout(self.push_timeout))??;

        if output.status.success() {
            info!("Pushed {} to {}", branch, self.remote_name);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        if PUSH_REJECTED.is_match(&stdout) || PUSH_REJECTED.is_match(&stderr) {
            return Err(GitServiceError::PushRejected(stderr.trim().to_string()));
        }
        Err(GitServiceError::CommandFailed(format!(
            "git push failed: {}",
            stderr.trim()
        )))
    }
}

fn is_missing(e: &git2::Error) -> bool {
    matches!(e.code(), ErrorCode::NotFound | ErrorCode::InvalidSpec)
}

fn local_branch_target(repo: &Repository, name: &str) -> GitResult<Option<Oid>> {
    match repo.find_branch(name, BranchType::Local) {
        Ok(branch) => Ok(branch.get().target()),
        Err(e) if is_missing(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn index_conflicts(index: &Index) -> GitResult<Vec<String>> {
    if !index.has_conflicts() {
        return Ok(Vec::new());
    }

    let mut files = BTreeSet::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let entry = conflict
            .our
            .as_ref()
            .or(conflict.their.as_ref())
            .or(conflict.ancestor.as_ref());
        if let Some(entry) = entry {
            files.insert(String::from_utf8_lossy(&entry.path).to_string());
        }
    }
    Ok(files.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_repo(path: &Path) -> Repository {
        let repo = Repository::init(path).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        repo
    }

    fn commit_file(repo: &Repository, name: &str, content: &str, message: &str) -> Oid {
        let workdir = repo.workdir().unwrap();
        std::fs::write(workdir.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let signature = repo.signature().unwrap();
        let parents = match repo.head() {
            Ok(head) => vec![head.peel_to_commit().unwrap()],
            Err(_) => vec![],
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)
            .unwrap()
    }

    #[test]
    fn test_resolve_branch_prefers_local() {
        let temp_dir = TempDir::new().unwrap();
        let repo = init_repo(temp_dir.path());
        let oid = commit_file(&repo, "a.txt", "a", "initial");
        let current = repo.head().unwrap().shorthand().unwrap().to_string();

        let git = GitService::new("origin", Duration::from_secs(5));
        let resolved = git.resolve_branch(&repo, &current).unwrap().unwrap();
        assert_eq!(resolved.oid, oid);
        assert!(!resolved.is_remote);
        assert!(git.resolve_branch(&repo, "does-not-exist").unwrap().is_none());
    }

    #[test]
    fn test_resolve_branch_falls_back_to_remote() {
        let temp_dir = TempDir::new().unwrap();
        let repo = init_repo(temp_dir.path());
        let oid = commit_file(&repo, "a.txt", "a", "initial");
        repo.reference("refs/remotes/origin/release", oid, false, "test")
            .unwrap();

        let git = GitService::new("origin", Duration::from_secs(5));
        let resolved = git.resolve_branch(&repo, "release").unwrap().unwrap();
        assert!(resolved.is_remote);
        assert_eq!(resolved.name, "origin/release");
        assert_eq!(resolved.oid, oid);
    }

    #[test]
    fn test_commit_worktree_without_changes_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let repo = init_repo(temp_dir.path());
        commit_file(&repo, "a.txt", "a", "initial");

        let git = GitService::new("origin", Duration::from_secs(5));
        assert_eq!(git.commit_worktree(temp_dir.path(), "noop").unwrap(), None);

        std::fs::write(temp_dir.path().join("b.txt"), "b").unwrap();
        let oid = git.commit_worktree(temp_dir.path(), "add b").unwrap().unwrap();
        let commit = repo.find_commit(oid).unwrap();
        assert_eq!(commit.summary(), Some("add b"));
        assert!(commit.tree().unwrap().get_name("b.txt").is_some());
    }

    #[test]
    fn test_change_counts_separates_untracked() {
        let temp_dir = TempDir::new().unwrap();
        let repo = init_repo(temp_dir.path());
        commit_file(&repo, "a.txt", "a", "initial");
        std::fs::write(temp_dir.path().join("a.txt"), "changed").unwrap();
        std::fs::write(temp_dir.path().join("new.txt"), "new").unwrap();

        let git = GitService::new("origin", Duration::from_secs(5));
        assert_eq!(git.change_counts(&repo).unwrap(), (1, 1));
    }

    #[test]
    fn test_undo_keeps_working_tree() {
        let temp_dir = TempDir::new().unwrap();
        let repo = init_repo(temp_dir.path());
        let first = commit_file(&repo, "a.txt", "a", "initial");
        commit_file(&repo, "a.txt", "a2", "second");

        let git = GitService::new("origin", Duration::from_secs(5));
        let head = git.undo_last_commit(temp_dir.path()).unwrap();
        assert_eq!(head, first);
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("a.txt")).unwrap(),
            "a2"
        );
    }

    fn commit_on_top(repo: &Repository, parent: Oid, write: &[(&str, Option<&str>)], message: &str) -> Oid {
        let parent = repo.find_commit(parent).unwrap();
        let mut builder = repo.treebuilder(Some(&parent.tree().unwrap())).unwrap();
        for (name, content) in write {
            match content {
                Some(content) => {
                    let blob = repo.blob(content.as_bytes()).unwrap();
                    builder.insert(name, blob, 0o100644).unwrap();
                }
                None => builder.remove(name).unwrap(),
            }
        }
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        let signature = repo.signature().unwrap();
        repo.commit(None, &signature, &signature, message, &tree, &[&parent])
            .unwrap()
    }

    #[test]
    fn test_advance_checked_out_branch_rewrites_changed_paths() {
        let temp_dir = TempDir::new().unwrap();
        let repo = init_repo(temp_dir.path());
        commit_file(&repo, "a.txt", "a", "initial");
        let base = commit_file(&repo, "b.txt", "b", "second");
        let branch = repo.head().unwrap().shorthand().unwrap().to_string();
        let next = commit_on_top(&repo, base, &[("a.txt", Some("a2")), ("b.txt", None)], "next");

        let git = GitService::new("origin", Duration::from_secs(5));
        git.advance_branch(&repo, &branch, base, next).unwrap();

        assert_eq!(repo.head().unwrap().target(), Some(next));
        assert_eq!(std::fs::read_to_string(temp_dir.path().join("a.txt")).unwrap(), "a2");
        assert!(!temp_dir.path().join("b.txt").exists());
        assert_eq!(git.change_counts(&repo).unwrap(), (0, 0));
    }

    #[test]
    fn test_advance_with_stale_expectation_leaves_checkout_alone() {
        let temp_dir = TempDir::new().unwrap();
        let repo = init_repo(temp_dir.path());
        let base = commit_file(&repo, "a.txt", "a", "initial");
        let branch = repo.head().unwrap().shorthand().unwrap().to_string();
        let git = GitService::new("origin", Duration::from_secs(5));

        let winner = commit_on_top(&repo, base, &[("winner.txt", Some("w"))], "winner");
        git.advance_branch(&repo, &branch, base, winner).unwrap();

        let loser = commit_on_top(&repo, base, &[("loser.txt", Some("l"))], "loser");
        let result = git.advance_branch(&repo, &branch, base, loser);
        assert!(matches!(result, Err(GitServiceError::RefMoved(ref b)) if *b == branch));

        assert_eq!(repo.head().unwrap().target(), Some(winner));
        assert!(temp_dir.path().join("winner.txt").exists());
        assert!(!temp_dir.path().join("loser.txt").exists());
        assert_eq!(git.change_counts(&repo).unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_push_is_bounded_by_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let repo = init_repo(temp_dir.path());
        commit_file(&repo, "a.txt", "a", "initial");
        let branch = repo.head().unwrap().shorthand().unwrap().to_string();
        repo.remote("origin", "ssh://example.invalid/app.git").unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("core.sshCommand", "sh -c 'sleep 5' --").unwrap();
        config.set_str("ssh.variant", "simple").unwrap();

        let git = GitService::new("origin", Duration::from_millis(200));
        let result = git.push_branch(temp_dir.path(), &branch).await;
        assert!(matches!(result, Err(GitServiceError::Timeout(_))), "{result:?}");
    }
}
