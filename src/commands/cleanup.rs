//! Cleanup-family commands: `cleanup`, `auto-cleanup`, `cleanup-stats` and
//! the `worktree` subcommands. All of them operate against the main
//! repository, never a worktree checkout.

use std::path::PathBuf;

use crate::context::Context;
use crate::engine::Engine;
use crate::exec::CancelToken;
use crate::output::{self, OutputFormat, Render, StatusChannel};
use crate::reconcile::Reconciler;
use crate::store::StatusFilter;
use crate::worktree::ConsolePrompt;

pub fn run_cleanup(
    format: OutputFormat,
    cancel: CancelToken,
    id: &str,
    force: bool,
) -> anyhow::Result<()> {
    let ctx = Context::resolve(cancel)?;
    let status = StatusChannel::new(format);
    let prompt = ConsolePrompt;
    let main_repo = ctx.main_repo();
    let main_store = ctx.main_store();
    let engine = Engine::new(
        &ctx.config,
        &main_repo,
        &main_store,
        &ctx.main_root,
        &status,
        &prompt,
    );
    let result = engine.cleanup(id, force)?;
    output::emit(format, &result);
    Ok(())
}

pub fn run_auto_cleanup(
    format: OutputFormat,
    cancel: CancelToken,
    dry_run: bool,
) -> anyhow::Result<()> {
    let ctx = Context::resolve(cancel)?;
    let status = StatusChannel::new(format);
    let main_repo = ctx.main_repo();
    let main_store = ctx.main_store();
    let reconciler = Reconciler::new(&ctx.config, &main_repo, &main_store, &status);
    let report = reconciler.auto_cleanup(dry_run)?;
    output::emit(format, &report);
    Ok(())
}

pub fn run_cleanup_stats(format: OutputFormat, cancel: CancelToken) -> anyhow::Result<()> {
    let ctx = Context::resolve(cancel)?;
    let main_repo = ctx.main_repo();
    let main_store = ctx.main_store();
    // stats never mutate; progress would only repeat the report
    let silent = StatusChannel::silent();
    let reconciler = Reconciler::new(&ctx.config, &main_repo, &main_store, &silent);
    let stats = reconciler.stats()?;
    output::emit(format, &stats);
    Ok(())
}

struct WorktreeRow {
    path: PathBuf,
    branch: Option<String>,
    head: String,
    ticket_status: Option<crate::ticket::Status>,
}

struct WorktreeListResult {
    worktrees: Vec<WorktreeRow>,
}

impl Render for WorktreeListResult {
    fn structured(&self) -> serde_json::Value {
        let rows: Vec<_> = self
            .worktrees
            .iter()
            .map(|row| {
                serde_json::json!({
                    "path": row.path,
                    "branch": row.branch,
                    "head": row.head,
                    "ticket_status": row.ticket_status,
                })
            })
            .collect();
        serde_json::json!({ "worktrees": rows })
    }

    fn text(&self) -> String {
        if self.worktrees.is_empty() {
            return "No worktrees".to_string();
        }
        self.worktrees
            .iter()
            .map(|row| {
                let branch = row.branch.as_deref().unwrap_or("(detached)");
                let note = match row.ticket_status {
                    Some(status) => format!(" [{status}]"),
                    None => String::new(),
                };
                format!("{}  {}{}", row.path.display(), branch, note)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn run_worktree_list(format: OutputFormat, cancel: CancelToken) -> anyhow::Result<()> {
    let ctx = Context::resolve(cancel)?;
    let main_repo = ctx.main_repo();
    let main_store = ctx.main_store();

    let known: std::collections::HashMap<String, crate::ticket::Status> = main_store
        .list(StatusFilter::All)?
        .into_iter()
        .map(|t| (t.id.clone(), t.status()))
        .collect();

    let worktrees = main_repo
        .list_worktrees()
        .map_err(crate::errors::from_git)?
        .into_iter()
        .map(|wt| {
            let ticket_status = wt.branch.as_deref().and_then(|b| known.get(b).copied());
            WorktreeRow {
                path: wt.path,
                branch: wt.branch,
                head: wt.head,
                ticket_status,
            }
        })
        .collect();
    output::emit(format, &WorktreeListResult { worktrees });
    Ok(())
}

pub fn run_worktree_clean(format: OutputFormat, cancel: CancelToken) -> anyhow::Result<()> {
    let ctx = Context::resolve(cancel)?;
    let status = StatusChannel::new(format);
    let main_repo = ctx.main_repo();
    let main_store = ctx.main_store();
    let reconciler = Reconciler::new(&ctx.config, &main_repo, &main_store, &status);
    let report = reconciler.clean_worktrees(false)?;
    output::emit(format, &report);
    Ok(())
}
