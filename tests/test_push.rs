// ABOUTME: Scenario tests for pushing workspace branches to a local bare remote

mod common;

use common::TestEnv;
use git2::{Oid, Repository, Signature};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use worktree_sync::{OperationOutcome, SyncError};

fn add_bare_remote(env: &TestEnv) -> (TempDir, PathBuf) {
    let remote_dir = TempDir::new().expect("Failed to create remote dir");
    let remote_path = remote_dir.path().join("app.git");
    Repository::init_bare(&remote_path).expect("Failed to init bare remote");
    env.main_repo()
        .remote("origin", remote_path.to_str().unwrap())
        .expect("Failed to add remote");
    (remote_dir, remote_path)
}

fn remote_branch(remote_path: &Path, branch: &str) -> Option<Oid> {
    let bare = Repository::open_bare(remote_path).unwrap();
    bare.refname_to_id(&format!("refs/heads/{branch}")).ok()
}

/// Someone else pushes to the branch, so the local branch no longer fast-forwards.
fn push_foreign_commit(remote_path: &Path, branch: &str) -> Oid {
    let bare = Repository::open_bare(remote_path).unwrap();
    let refname = format!("refs/heads/{branch}");
    let parent = bare.find_commit(bare.refname_to_id(&refname).unwrap()).unwrap();
    let mut builder = bare.treebuilder(Some(&parent.tree().unwrap())).unwrap();
    let blob = bare.blob(b"from elsewhere\n").unwrap();
    builder.insert("foreign.txt", blob, 0o100644).unwrap();
    let tree = bare.find_tree(builder.write().unwrap()).unwrap();
    let signature = Signature::now("Other User", "other@example.com").unwrap();
    bare.commit(Some(&refname), &signature, &signature, "foreign change", &tree, &[&parent])
        .unwrap()
}

#[tokio::test]
async fn test_push_then_rejected_after_remote_diverges() {
    let env = TestEnv::new("task/push").await;
    let (_remote_dir, remote_path) = add_bare_remote(&env);
    let branch = env.target().await.branch;
    let head = env.commit_on_workspace("feature.txt", "feature\n", "feature").await;

    let report = env.manager.push(env.workspace_id, env.repo_id).await;
    assert_eq!(
        report.outcome.unwrap(),
        OperationOutcome::Pushed {
            branch: branch.clone()
        }
    );
    assert_eq!(remote_branch(&remote_path, &branch), Some(head));

    push_foreign_commit(&remote_path, &branch);
    env.commit_on_workspace("feature.txt", "feature v2\n", "feature v2")
        .await;

    let rejected = env.manager.push(env.workspace_id, env.repo_id).await;
    assert!(
        matches!(rejected.outcome, Err(SyncError::PushRejected(_))),
        "{:?}",
        rejected.outcome
    );
    assert_ne!(remote_branch(&remote_path, &branch), Some(env.workspace_head().await));
}

#[tokio::test]
async fn test_remote_divergence_reported_while_pull_request_open() {
    let env = TestEnv::new("task/push-pr").await;
    let (_remote_dir, _remote_path) = add_bare_remote(&env);
    env.commit_on_workspace("feature.txt", "feature\n", "feature").await;
    env.manager
        .push(env.workspace_id, env.repo_id)
        .await
        .into_result()
        .unwrap();

    let status = env.manager.status(env.workspace_id, env.repo_id).await.unwrap();
    assert_eq!(status.remote_commits_ahead, None);
    assert_eq!(status.remote_commits_behind, None);

    env.manager
        .attach_pull_request(env.workspace_id, env.repo_id, 3, "https://example.test/pr/3")
        .await
        .unwrap();
    let status = env.manager.status(env.workspace_id, env.repo_id).await.unwrap();
    assert_eq!((status.remote_commits_ahead, status.remote_commits_behind), (Some(0), Some(0)));

    env.commit_on_workspace("feature.txt", "feature v2\n", "feature v2")
        .await;
    let status = env.manager.status(env.workspace_id, env.repo_id).await.unwrap();
    assert_eq!((status.remote_commits_ahead, status.remote_commits_behind), (Some(1), Some(0)));
}
