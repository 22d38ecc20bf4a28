// ABOUTME: Scenario tests for divergence status, commit listing and commit diffs of a workspace

mod common;

use common::TestEnv;
use pretty_assertions::assert_eq;
use worktree_sync::models::DiffChangeKind;
use worktree_sync::{DiffContext, SyncError};

#[tokio::test]
async fn test_fresh_workspace_has_no_divergence() {
    let env = TestEnv::new("task/fresh").await;

    let status = env.manager.status(env.workspace_id, env.repo_id).await.unwrap();
    assert_eq!(status.commits_ahead, 0);
    assert_eq!(status.commits_behind, 0);
    assert!(status.conflicted_files.is_empty());
    assert!(!status.is_rebase_in_progress);
    assert!(!status.is_target_remote);
    assert!(status.merges.is_empty());
    assert_eq!(status.target_branch_name, env.base_branch);
}

#[tokio::test]
async fn test_ahead_and_behind_counts() {
    let env = TestEnv::new("task/divergence").await;
    env.commit_on_workspace("src/a.rs", "fn a() {}\n", "add a").await;
    env.commit_on_workspace("src/b.rs", "fn b() {}\n", "add b").await;
    env.commit_on_target("CHANGELOG.md", "- release\n", "changelog");

    let status = env.manager.status(env.workspace_id, env.repo_id).await.unwrap();
    assert_eq!(status.commits_ahead, 2);
    assert_eq!(status.commits_behind, 1);
    assert_eq!(status.head_oid, env.workspace_head().await.to_string());
}

#[tokio::test]
async fn test_uncommitted_changes_are_counted() {
    let env = TestEnv::new("task/dirty").await;
    env.write_in_worktree("README.md", "# changed\n").await;
    env.write_in_worktree("notes.txt", "new\n").await;

    let status = env.manager.status(env.workspace_id, env.repo_id).await.unwrap();
    assert!(status.has_uncommitted_changes);
    assert_eq!(status.uncommitted_count, 1);
    assert_eq!(status.untracked_count, 1);
    assert_eq!(status.commits_ahead, 0);
}

#[tokio::test]
async fn test_missing_target_branch_is_reported() {
    let env = TestEnv::new("task/no-target").await;
    env.manager
        .registry()
        .set_target_branch(env.workspace_id, env.repo_id, "does-not-exist")
        .await
        .unwrap();

    let result = env.manager.status(env.workspace_id, env.repo_id).await;
    assert!(matches!(result, Err(SyncError::NoTargetBranch(_))));

    let result = env
        .manager
        .resolve_base(env.workspace_id, env.repo_id, DiffContext::Review)
        .await;
    assert!(matches!(result, Err(SyncError::NoTargetBranch(_))));
}

#[tokio::test]
async fn test_missing_worktree_is_unavailable_not_zero() {
    let env = TestEnv::new("task/gone").await;
    let target = env.target().await;
    std::fs::remove_dir_all(&target.worktree_path).unwrap();

    let result = env.manager.status(env.workspace_id, env.repo_id).await;
    assert!(matches!(result, Err(SyncError::RepositoryUnavailable(_))));
}

#[tokio::test]
async fn test_worktree_commits_newest_first() {
    let env = TestEnv::new("task/commits").await;
    env.commit_on_workspace("one.txt", "1\n", "first change").await;
    env.commit_on_workspace("two.txt", "2\n", "second change").await;

    let commits = env
        .manager
        .worktree_commits(env.workspace_id, env.repo_id)
        .await
        .unwrap();
    let summaries: Vec<&str> = commits.iter().map(|c| c.summary()).collect();
    assert_eq!(summaries, vec!["second change", "first change"]);
}

#[tokio::test]
async fn test_commit_diff_against_first_parent() {
    let env = TestEnv::new("task/commit-diff").await;
    env.commit_on_workspace("one.txt", "1\n", "first change").await;
    let second = env
        .commit_on_workspace("README.md", "# app\nmore\n", "second change")
        .await;

    let diffs = env
        .manager
        .commit_diff(env.workspace_id, env.repo_id, &second.to_string())
        .await
        .unwrap();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].path(), "README.md");
    assert_eq!(diffs[0].change, DiffChangeKind::Modified);
    assert_eq!(diffs[0].additions, 1);
    assert_eq!(diffs[0].deletions, 0);

    let unknown = env
        .manager
        .commit_diff(env.workspace_id, env.repo_id, "0123456789012345678901234567890123456789")
        .await;
    assert!(matches!(unknown, Err(SyncError::NotFound(_))));
}

#[tokio::test]
async fn test_review_diff_uses_merge_base_before_any_merge() {
    let env = TestEnv::new("task/review").await;
    env.commit_on_workspace("feature.txt", "feature\n", "feature").await;
    env.commit_on_target("other.txt", "other\n", "unrelated target work");
    env.write_in_worktree("wip.txt", "wip\n").await;

    let diffs = env
        .manager
        .diff(env.workspace_id, env.repo_id, DiffContext::Review)
        .await
        .unwrap();
    let mut paths: Vec<&str> = diffs.iter().map(|d| d.path()).collect();
    paths.sort_unstable();
    assert_eq!(paths, vec!["feature.txt", "wip.txt"]);
}
