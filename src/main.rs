// ABOUTME: Command line entry point for worktree-sync, printing every result as JSON

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;
use worktree_sync::commit_message::BranchCommitRequest;
use worktree_sync::models::MergeStatus;
use worktree_sync::{AppConfig, DiffContext, MergeRequest, OperationReport, SyncError, WorkspaceSyncManager};

#[derive(Parser)]
#[command(name = "worktree-sync", version, about = "Per-task git workspaces kept in sync with their target branches")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Mirror logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a git repository
    AddRepo { name: String, path: PathBuf },
    /// List registered repositories
    Repos,
    /// Create a workspace with one worktree per repository
    CreateWorkspace {
        /// Workspace branch name
        branch: String,
        /// Repository and its target branch as <repo-id>=<branch> (repeatable)
        #[arg(long = "repo", value_parser = parse_repo_target, required = true)]
        repos: Vec<(Uuid, String)>,
    },
    /// List workspaces
    Workspaces,
    /// Remove a workspace and its worktrees
    RemoveWorkspace { workspace: Uuid },
    /// Divergence and conflict status against the target branch
    Status { workspace: Uuid, repo: Uuid },
    /// Changed files since the resolved diff base
    Diff {
        workspace: Uuid,
        repo: Uuid,
        /// Diff only the changes of this execution run
        #[arg(long, conflicts_with = "pre_merge")]
        run: Option<Uuid>,
        #[arg(long)]
        pre_merge: bool,
    },
    /// Commits on the workspace branch not yet on the target
    Commits { workspace: Uuid, repo: Uuid },
    /// One commit against its first parent
    CommitDiff { workspace: Uuid, repo: Uuid, commit: String },
    /// Commit all worktree changes
    Commit {
        workspace: Uuid,
        repo: Uuid,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Move the branch back one commit, keeping its changes
    Undo { workspace: Uuid, repo: Uuid },
    /// Merge the workspace branch into its target branch
    Merge {
        workspace: Uuid,
        repo: Uuid,
        #[arg(short, long)]
        message: Option<String>,
        /// Reword the branch's last commit before merging
        #[arg(long)]
        branch_message: Option<String>,
        /// Task title used to propose a merge message
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Revert the latest direct merge on the target branch
    RevertMerge { workspace: Uuid, repo: Uuid },
    /// Push the workspace branch to the remote
    Push { workspace: Uuid, repo: Uuid },
    /// Replay the branch onto a new base
    Rebase {
        workspace: Uuid,
        repo: Uuid,
        /// New base branch (defaults to the target branch)
        #[arg(long)]
        onto: Option<String>,
        /// Upstream the branch was based on (defaults to the target branch)
        #[arg(long)]
        upstream: Option<String>,
    },
    /// Continue a rebase after resolving its conflicts
    ContinueRebase { workspace: Uuid, repo: Uuid },
    /// Abort an in-progress merge or rebase
    Abort { workspace: Uuid, repo: Uuid },
    /// Change the target branch
    Retarget { workspace: Uuid, repo: Uuid, branch: String },
    /// Record a pull request opened for the workspace branch
    AttachPr {
        workspace: Uuid,
        repo: Uuid,
        number: u64,
        url: String,
    },
    /// Mark a pull request merged or closed
    PrStatus {
        workspace: Uuid,
        repo: Uuid,
        number: u64,
        #[arg(value_enum)]
        status: PrState,
        #[arg(long)]
        merge_commit: Option<String>,
    },
    /// Execution checkpoints of a workspace repository
    Checkpoints { workspace: Uuid, repo: Uuid },
    /// Merge history of a workspace repository
    Merges { workspace: Uuid, repo: Uuid },
    /// Run a command in the worktree as one execution run and commit its changes
    Exec {
        workspace: Uuid,
        repo: Uuid,
        /// Commit message when none can be generated
        #[arg(short, long, default_value = "Apply automated changes")]
        message: String,
        /// Command and arguments (after --)
        #[arg(last = true, required = true)]
        argv: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PrState {
    Merged,
    Closed,
}

impl From<PrState> for MergeStatus {
    fn from(state: PrState) -> Self {
        match state {
            PrState::Merged => Self::Merged,
            PrState::Closed => Self::Closed,
        }
    }
}

fn parse_repo_target(value: &str) -> Result<(Uuid, String), String> {
    let (id, branch) = value
        .split_once('=')
        .ok_or_else(|| format!("expected <repo-id>=<branch>, got {value}"))?;
    let id = Uuid::parse_str(id).map_err(|e| format!("invalid repository id {id}: {e}"))?;
    if branch.trim().is_empty() {
        return Err("target branch must not be empty".to_string());
    }
    Ok((id, branch.to_string()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            print_json(&json!({ "ok": false, "error": { "kind": "fatal", "message": format!("{e:#}") } }));
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    setup_logging(&config, cli.verbose)?;
    let manager = WorkspaceSyncManager::open(config)?;

    match cli.cmd {
        Command::AddRepo { name, path } => {
            let repo = manager.registry().register_repo(&name, &path).await?;
            value_out(&repo)
        }
        Command::Repos => value_out(&manager.registry().list_repos().await),
        Command::CreateWorkspace { branch, repos } => {
            let workspace = manager.registry().create_workspace(&branch, &repos).await?;
            value_out(&workspace)
        }
        Command::Workspaces => value_out(&manager.registry().list_workspaces().await),
        Command::RemoveWorkspace { workspace } => {
            sync_out(manager.remove_workspace(workspace).await.map(|()| json!({ "removed": workspace })))
        }
        Command::Status { workspace, repo } => sync_out(manager.status(workspace, repo).await),
        Command::Diff {
            workspace,
            repo,
            run,
            pre_merge,
        } => {
            let context = match (run, pre_merge) {
                (Some(run_id), _) => DiffContext::PostExecution { run_id },
                (None, true) => DiffContext::PreMerge,
                (None, false) => DiffContext::Review,
            };
            sync_out(manager.diff(workspace, repo, context).await)
        }
        Command::Commits { workspace, repo } => sync_out(manager.worktree_commits(workspace, repo).await),
        Command::CommitDiff { workspace, repo, commit } => {
            sync_out(manager.commit_diff(workspace, repo, &commit).await)
        }
        Command::Commit {
            workspace,
            repo,
            message,
        } => Ok(report_out(manager.commit(workspace, repo, message.as_deref()).await)),
        Command::Undo { workspace, repo } => Ok(report_out(manager.undo_commit(workspace, repo).await)),
        Command::Merge {
            workspace,
            repo,
            message,
            branch_message,
            title,
            description,
        } => {
            let request = MergeRequest {
                message,
                branch_commit_message: branch_message,
                task: title.map(|title| BranchCommitRequest {
                    title,
                    description,
                    target_branch: String::new(),
                }),
            };
            Ok(report_out(manager.merge(workspace, repo, request).await))
        }
        Command::RevertMerge { workspace, repo } => Ok(report_out(manager.revert_merge(workspace, repo).await)),
        Command::Push { workspace, repo } => Ok(report_out(manager.push(workspace, repo).await)),
        Command::Rebase {
            workspace,
            repo,
            onto,
            upstream,
        } => {
            let cancel = cancel_on_ctrl_c();
            Ok(report_out(
                manager.rebase(workspace, repo, onto, upstream, cancel).await,
            ))
        }
        Command::ContinueRebase { workspace, repo } => {
            let cancel = cancel_on_ctrl_c();
            Ok(report_out(manager.continue_rebase(workspace, repo, cancel).await))
        }
        Command::Abort { workspace, repo } => Ok(report_out(manager.abort_conflicts(workspace, repo).await)),
        Command::Retarget {
            workspace,
            repo,
            branch,
        } => Ok(report_out(manager.change_target(workspace, repo, &branch).await)),
        Command::AttachPr {
            workspace,
            repo,
            number,
            url,
        } => sync_out(manager.attach_pull_request(workspace, repo, number, &url).await),
        Command::PrStatus {
            workspace,
            repo,
            number,
            status,
            merge_commit,
        } => sync_out(
            manager
                .update_pull_request_status(workspace, repo, number, status.into(), merge_commit)
                .await,
        ),
        Command::Checkpoints { workspace, repo } => value_out(&manager.checkpoints(workspace, repo).await),
        Command::Merges { workspace, repo } => value_out(&manager.merges(workspace, repo).await),
        Command::Exec {
            workspace,
            repo,
            message,
            argv,
        } => exec_run(&manager, workspace, repo, &message, &argv).await,
    }
}

/// Wrap an external command in an execution run: checkpoint before, commit and close after.
async fn exec_run(
    manager: &WorkspaceSyncManager,
    workspace: Uuid,
    repo: Uuid,
    message: &str,
    argv: &[String],
) -> Result<i32> {
    let (program, args) = argv.split_first().ok_or_else(|| anyhow!("no command given"))?;
    let lease = match manager.runs().start(Uuid::new_v4(), workspace, repo).await {
        Ok(lease) => lease,
        Err(e) => return Ok(error_out(&e, None)),
    };

    info!("Running {} in {}", program, lease.target().worktree_path.display());
    let status = tokio::process::Command::new(program)
        .args(args)
        .current_dir(&lease.target().worktree_path)
        .status()
        .await
        .with_context(|| format!("Failed to run {program}"))?;

    let finished = lease.finish(message).await;
    match finished {
        Ok(run) => {
            print_json(&json!({ "ok": status.success(), "exit_code": status.code(), "run": run }));
            Ok(if status.success() { 0 } else { 1 })
        }
        Err(e) => Ok(error_out(&e, None)),
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current step");
            token.cancel();
        }
    });
    cancel
}

fn value_out<T: Serialize>(value: &T) -> Result<i32> {
    print_json(&json!({ "ok": true, "result": value }));
    Ok(0)
}

fn sync_out<T: Serialize>(result: Result<T, SyncError>) -> Result<i32> {
    match result {
        Ok(value) => value_out(&value),
        Err(e) => Ok(error_out(&e, None)),
    }
}

fn report_out(report: OperationReport) -> i32 {
    let status = serde_json::to_value(&report.status).unwrap_or(Value::Null);
    match report.outcome {
        Ok(outcome) => {
            print_json(&json!({ "ok": true, "result": outcome, "status": status }));
            0
        }
        Err(e) => error_out(&e, Some(status)),
    }
}

/// Preconditions that were not met exit 0; everything else exits 2.
fn error_out(e: &SyncError, status: Option<Value>) -> i32 {
    let mut body = json!({
        "ok": false,
        "error": {
            "kind": e.kind(),
            "message": e.to_string(),
        },
    });
    if let Some(files) = e.conflicted_files() {
        body["error"]["conflicted_files"] = json!(files);
    }
    if let Some(status) = status {
        body["status"] = status;
    }
    print_json(&body);
    if e.is_precondition() {
        0
    } else {
        2
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Failed to render output: {e}"),
    }
}

fn setup_logging(config: &AppConfig, verbose: bool) -> Result<()> {
    use std::fs::OpenOptions;
    use tracing_subscriber::prelude::*;

    let log_dir = config.state_dir.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let log_file = log_dir.join(format!(
        "worktree-sync-{}.log",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to create log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(file)
                .with_ansi(false),
        )
        .with(verbose.then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
        }))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worktree_sync=info".into()),
        )
        .init();
    Ok(())
}
