// ABOUTME: Builds file-level Diff entries between a base commit and a commit or the live worktree

use super::error::GitServiceError;
use super::repository::GitResult;
use crate::models::{Diff, DiffChangeKind};
use git2::{Delta, DiffDelta, DiffFindOptions, DiffOptions, Oid, Patch, Repository};
use std::path::Path;
use tracing::debug;

/// The "new" side of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffTarget {
    Commit(Oid),
    /// Working tree including staged, unstaged and untracked changes.
    Worktree,
}

#[derive(Debug, Clone)]
pub struct DiffBuilder {
    max_inline_bytes: usize,
}

impl DiffBuilder {
    pub fn new(max_inline_bytes: usize) -> Self {
        Self { max_inline_bytes }
    }

    /// Diff `base` (the empty tree when `None`) against `target`.
    pub fn diff(&self, repo: &Repository, base: Option<Oid>, target: DiffTarget) -> GitResult<Vec<Diff>> {
        let base_tree = match base {
            Some(oid) => Some(repo.find_commit(oid)?.tree()?),
            None => None,
        };

        let mut opts = DiffOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .show_untracked_content(true)
            .include_typechange(true);

        let mut diff = match target {
            DiffTarget::Commit(oid) => {
                let tree = repo.find_commit(oid)?.tree()?;
                repo.diff_tree_to_tree(base_tree.as_ref(), Some(&tree), Some(&mut opts))?
            }
            DiffTarget::Worktree => {
                repo.diff_tree_to_workdir_with_index(base_tree.as_ref(), Some(&mut opts))?
            }
        };

        let mut find = DiffFindOptions::new();
        find.renames(true).copies(false).for_untracked(true);
        diff.find_similar(Some(&mut find))?;

        let workdir = match target {
            DiffTarget::Worktree => repo.workdir(),
            DiffTarget::Commit(_) => None,
        };

        let mut entries = Vec::new();
        for (idx, delta) in diff.deltas().enumerate() {
            let Some(change) = change_kind(delta.status()) else {
                continue;
            };

            let (additions, deletions) = match Patch::from_diff(&diff, idx)? {
                Some(patch) => {
                    let (_, additions, deletions) = patch.line_stats()?;
                    (additions, deletions)
                }
                None => (0, 0),
            };

            let mut entry = Diff {
                old_path: path_of(delta.old_file().path()),
                new_path: path_of(delta.new_file().path()),
                change,
                old_content: None,
                new_content: None,
                additions,
                deletions,
                content_omitted: false,
            };
            if change == DiffChangeKind::Added {
                entry.old_path = None;
            }
            if change == DiffChangeKind::Deleted {
                entry.new_path = None;
            }

            self.attach_content(repo, workdir, &delta, &mut entry)?;
            entries.push(entry);
        }

        debug!("Built diff with {} entries", entries.len());
        Ok(entries)
    }

    /// Diff a commit against its first parent (the empty tree for a root commit).
    pub fn commit_diff(&self, repo: &Repository, commit: Oid) -> GitResult<Vec<Diff>> {
        let commit = repo.find_commit(commit)?;
        let parent = if commit.parent_count() > 0 {
            Some(commit.parent_id(0)?)
        } else {
            None
        };
        self.diff(repo, parent, DiffTarget::Commit(commit.id()))
    }

    fn attach_content(
        &self,
        repo: &Repository,
        workdir: Option<&Path>,
        delta: &DiffDelta<'_>,
        entry: &mut Diff,
    ) -> GitResult<()> {
        let old = match entry.change {
            DiffChangeKind::Added => None,
            _ => blob_content(repo, delta.old_file().id())?,
        };
        let new = match entry.change {
            DiffChangeKind::Deleted => None,
            _ => match (workdir, entry.new_path.as_deref()) {
                (Some(root), Some(path)) => file_content(&root.join(path))?,
                _ => blob_content(repo, delta.new_file().id())?,
            },
        };

        let oversized = [&old, &new]
            .iter()
            .any(|side| side.as_ref().is_some_and(|c| c.len() > self.max_inline_bytes));
        let binary = delta.flags().is_binary()
            || [&old, &new]
                .iter()
                .any(|side| side.as_ref().is_some_and(|c| c.contains(&0)));

        if oversized || binary {
            entry.content_omitted = true;
            return Ok(());
        }

        entry.old_content = old.map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        entry.new_content = new.map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        Ok(())
    }
}

fn change_kind(delta: Delta) -> Option<DiffChangeKind> {
    match delta {
        Delta::Added | Delta::Untracked => Some(DiffChangeKind::Added),
        Delta::Deleted => Some(DiffChangeKind::Deleted),
        Delta::Modified | Delta::Typechange | Delta::Conflicted => Some(DiffChangeKind::Modified),
        Delta::Renamed => Some(DiffChangeKind::Renamed),
        Delta::Copied => Some(DiffChangeKind::Copied),
        Delta::Unmodified | Delta::Ignored | Delta::Unreadable => None,
    }
}

fn path_of(path: Option<&Path>) -> Option<String> {
    path.map(|p| p.to_string_lossy().replace('\\', "/"))
}

fn blob_content(repo: &Repository, oid: Oid) -> GitResult<Option<Vec<u8>>> {
    if oid.is_zero() {
        return Ok(None);
    }
    Ok(Some(repo.find_blob(oid)?.content().to_vec()))
}

fn file_content(path: &Path) -> GitResult<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(GitServiceError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn commit_all(repo: &Repository, message: &str) -> Oid {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.update_all(["*"].iter(), None).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let signature = git2::Signature::now("Test User", "test@example.com").unwrap();
        let parents = match repo.head() {
            Ok(head) => vec![head.peel_to_commit().unwrap()],
            Err(_) => vec![],
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)
            .unwrap()
    }

    #[test]
    fn test_worktree_diff_counts_and_content() {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::init(temp_dir.path()).unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), "one\ntwo\n").unwrap();
        let base = commit_all(&repo, "initial");

        std::fs::write(temp_dir.path().join("a.txt"), "one\nthree\n").unwrap();
        std::fs::write(temp_dir.path().join("b.txt"), "new\n").unwrap();

        let diffs = DiffBuilder::new(1024)
            .diff(&repo, Some(base), DiffTarget::Worktree)
            .unwrap();
        assert_eq!(diffs.len(), 2);

        let modified = diffs.iter().find(|d| d.path() == "a.txt").unwrap();
        assert_eq!(modified.change, DiffChangeKind::Modified);
        assert_eq!((modified.additions, modified.deletions), (1, 1));
        assert_eq!(modified.new_content.as_deref(), Some("one\nthree\n"));

        let added = diffs.iter().find(|d| d.path() == "b.txt").unwrap();
        assert_eq!(added.change, DiffChangeKind::Added);
        assert_eq!(added.old_path, None);
        assert_eq!(added.additions, 1);
    }

    #[test]
    fn test_oversized_file_reports_counts_only() {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::init(temp_dir.path()).unwrap();
        std::fs::write(temp_dir.path().join("small.txt"), "x\n").unwrap();
        let base = commit_all(&repo, "initial");

        let big: String = (0..100).map(|i| format!("line {i}\n")).collect();
        std::fs::write(temp_dir.path().join("big.txt"), &big).unwrap();
        let head = commit_all(&repo, "big");

        let diffs = DiffBuilder::new(64)
            .diff(&repo, Some(base), DiffTarget::Commit(head))
            .unwrap();
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].content_omitted);
        assert_eq!(diffs[0].new_content, None);
        assert_eq!(diffs[0].old_content, None);
        assert_eq!(diffs[0].additions, 100);
    }

    #[test]
    fn test_root_commit_diff_against_empty_tree() {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::init(temp_dir.path()).unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), "a\n").unwrap();
        let root = commit_all(&repo, "root");

        let diffs = DiffBuilder::new(1024).commit_diff(&repo, root).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].change, DiffChangeKind::Added);
    }
}
