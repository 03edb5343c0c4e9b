//! Reconciliation: auto-cleanup of orphaned worktrees and stale branches.
//!
//! One invocation runs two passes against the main repository. Pass A
//! removes worktrees whose branch no longer matches any `doing` ticket;
//! Pass B force-deletes branches named after `done` tickets. Per-item
//! failures are collected, never fatal: the report always comes back.

use std::collections::HashSet;

use crate::config::Config;
use crate::errors::{self, FlowError};
use crate::git::Repository;
use crate::output::{Render, StatusChannel};
use crate::store::{StatusFilter, TicketStore};
use crate::ticket::Status;

/// Branch names never considered stale, on top of the configured default.
const DEFAULT_BRANCH_ALIASES: &[&str] = &["main", "master", "develop"];

#[derive(Debug, Default, serde::Serialize)]
pub struct CleanupReport {
    pub orphaned_worktrees: usize,
    pub stale_branches: usize,
    pub errors: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct CleanupStats {
    pub orphaned_worktrees: usize,
    pub stale_branches: usize,
    pub todo: usize,
    pub doing: usize,
    pub done: usize,
}

/// Reconciles git state with ticket state. Must be bound to the main
/// repository root, never a worktree.
pub struct Reconciler<'a> {
    config: &'a Config,
    repo: &'a Repository,
    store: &'a TicketStore,
    status: &'a StatusChannel,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        config: &'a Config,
        repo: &'a Repository,
        store: &'a TicketStore,
        status: &'a StatusChannel,
    ) -> Self {
        Reconciler {
            config,
            repo,
            store,
            status,
        }
    }

    /// Both passes. With `dry_run` everything is counted, nothing mutated.
    pub fn auto_cleanup(&self, dry_run: bool) -> Result<CleanupReport, FlowError> {
        let mut report = CleanupReport {
            dry_run,
            ..CleanupReport::default()
        };
        if self.config.worktree.enabled {
            self.clean_orphaned_worktrees(dry_run, &mut report)?;
        }
        self.clean_stale_branches(dry_run, &mut report)?;
        Ok(report)
    }

    /// Pass A only, as a standalone operation (`worktree clean`).
    pub fn clean_worktrees(&self, dry_run: bool) -> Result<CleanupReport, FlowError> {
        let mut report = CleanupReport {
            dry_run,
            ..CleanupReport::default()
        };
        self.clean_orphaned_worktrees(dry_run, &mut report)?;
        Ok(report)
    }

    /// Dry-run counts plus ticket totals by status.
    pub fn stats(&self) -> Result<CleanupStats, FlowError> {
        let report = self.auto_cleanup(true)?;
        let count = |filter| -> Result<usize, FlowError> { Ok(self.store.list(filter)?.len()) };
        Ok(CleanupStats {
            orphaned_worktrees: report.orphaned_worktrees,
            stale_branches: report.stale_branches,
            todo: count(StatusFilter::Todo)?,
            doing: count(StatusFilter::Doing)?,
            done: count(StatusFilter::Done)?,
        })
    }

    fn clean_orphaned_worktrees(
        &self,
        dry_run: bool,
        report: &mut CleanupReport,
    ) -> Result<(), FlowError> {
        if !dry_run {
            if let Err(e) = self.repo.prune_worktrees() {
                report.errors.push(e.to_string());
            }
        }

        let doing: HashSet<String> = self
            .store
            .list(StatusFilter::Doing)?
            .into_iter()
            .map(|t| t.id)
            .collect();

        let main_root = dunce::canonicalize(self.repo.path()).ok();
        for worktree in self.repo.list_worktrees().map_err(errors::from_git)? {
            let Some(branch) = worktree.branch.as_deref() else {
                continue; // bare or detached entries are not ours
            };
            if branch.is_empty() || branch == self.config.git.default_branch {
                continue;
            }
            // never touch the main working tree, whatever it has checked out
            if main_root.is_some() && dunce::canonicalize(&worktree.path).ok() == main_root {
                continue;
            }
            if doing.contains(branch) {
                continue;
            }
            report.orphaned_worktrees += 1;
            if dry_run {
                self.status
                    .info(format!("Would remove worktree: {}", worktree.path.display()));
                continue;
            }
            self.status
                .info(format!("Removing orphaned worktree: {}", worktree.path.display()));
            if let Err(e) = self.repo.remove_worktree(&worktree.path, true) {
                report.errors.push(format!("{}: {e}", worktree.path.display()));
            }
        }
        Ok(())
    }

    fn clean_stale_branches(
        &self,
        dry_run: bool,
        report: &mut CleanupReport,
    ) -> Result<(), FlowError> {
        for branch in self.repo.list_branches().map_err(errors::from_git)? {
            if branch == self.config.git.default_branch
                || DEFAULT_BRANCH_ALIASES.contains(&branch.as_str())
            {
                continue;
            }
            let Ok(ticket) = self.store.get(&branch) else {
                continue; // branch is not a ticket's
            };
            if ticket.status() != Status::Done {
                continue;
            }
            report.stale_branches += 1;
            if dry_run {
                self.status.info(format!("Would delete branch: {branch}"));
                continue;
            }
            self.status.info(format!("Deleting stale branch: {branch}"));
            if let Err(e) = self.repo.delete_branch(&branch, true) {
                report.errors.push(format!("{branch}: {e}"));
            }
        }
        Ok(())
    }
}

impl Render for CleanupReport {
    fn structured(&self) -> serde_json::Value {
        serde_json::json!({
            "orphaned_worktrees": self.orphaned_worktrees,
            "stale_branches": self.stale_branches,
            "errors": self.errors,
            "dry_run": self.dry_run,
        })
    }

    fn text(&self) -> String {
        let verb = if self.dry_run { "would remove" } else { "removed" };
        let mut lines = vec![
            format!("Orphaned worktrees {verb}: {}", self.orphaned_worktrees),
            format!(
                "Stale branches {}: {}",
                if self.dry_run { "would delete" } else { "deleted" },
                self.stale_branches
            ),
        ];
        if !self.errors.is_empty() {
            lines.push(format!("Errors ({}):", self.errors.len()));
            for error in &self.errors {
                lines.push(format!("  - {error}"));
            }
        }
        lines.join("\n")
    }
}

impl Render for CleanupStats {
    fn structured(&self) -> serde_json::Value {
        serde_json::json!({
            "orphaned_worktrees": self.orphaned_worktrees,
            "stale_branches": self.stale_branches,
            "tickets": { "todo": self.todo, "doing": self.doing, "done": self.done },
        })
    }

    fn text(&self) -> String {
        [
            format!("Tickets: {} todo, {} doing, {} done", self.todo, self.doing, self.done),
            format!("Orphaned worktrees: {}", self.orphaned_worktrees),
            format!("Stale branches: {}", self.stale_branches),
        ]
        .join("\n")
    }
}
