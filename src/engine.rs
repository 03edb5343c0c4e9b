//! Transition engine: the start/close/cleanup state machine.
//!
//! Every transition is a multi-step sequence across three stores (ticket
//! files, the branch graph, the worktree registry) and none of it is
//! atomic. Steps are ordered so any crash point leaves recoverable state,
//! and each mutating step registers an undo in a [`Saga`]; on failure the
//! undos run in reverse and every outcome is logged. Post-commit failures
//! unwind the start commit with `git reset --hard HEAD^` exactly like the
//! manual recovery a user would perform.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::errors::{self, FlowError};
use crate::git::{GitError, Repository};
use crate::output::{Render, StatusChannel};
use crate::relation;
use crate::store::{CurrentTicket, TicketStore};
use crate::ticket::{self, format_duration, Status, Ticket};
use crate::utils::get_now;
use crate::worktree::{DivergenceChoice, InitCommandError, Interaction, WorktreePolicy};

/// Ordered undo actions for one transition. Pushed as steps commit, run in
/// reverse on failure.
pub(crate) struct Saga {
    undos: Vec<(&'static str, Box<dyn FnOnce() -> Result<(), String>>)>,
}

impl Saga {
    pub fn new() -> Self {
        Saga { undos: Vec::new() }
    }

    pub fn push(
        &mut self,
        label: &'static str,
        undo: impl FnOnce() -> Result<(), String> + 'static,
    ) {
        self.undos.push((label, Box::new(undo)));
    }

    /// Run all undos, most recent first. Returns a human-readable outcome
    /// per undo; every outcome is also logged.
    pub fn rollback(&mut self) -> Vec<String> {
        let mut outcomes = Vec::new();
        while let Some((label, undo)) = self.undos.pop() {
            match undo() {
                Ok(()) => {
                    log::info!("rolled back: {label}");
                    outcomes.push(format!("rolled back: {label}"));
                }
                Err(e) => {
                    log::warn!("rollback failed: {label}: {e}");
                    outcomes.push(format!("rollback FAILED: {label}: {e}"));
                }
            }
        }
        outcomes
    }

    /// Forget the undos: the transition committed.
    pub fn disarm(&mut self) {
        self.undos.clear();
    }
}

/// Undo that puts a moved-and-rewritten ticket file back exactly as it was.
fn restore_ticket_file(
    original_path: PathBuf,
    original_content: String,
    moved_path: PathBuf,
) -> impl FnOnce() -> Result<(), String> {
    move || {
        if moved_path != original_path && moved_path.exists() {
            fs::remove_file(&moved_path)
                .map_err(|e| format!("cannot remove {}: {e}", moved_path.display()))?;
        }
        crate::store::write_atomic(&original_path, &original_content).map_err(|e| e.to_string())
    }
}

#[derive(Debug)]
pub struct StartResult {
    pub ticket: Ticket,
    pub worktree_path: Option<PathBuf>,
    pub parent_branch: Option<String>,
    pub init_commands_executed: usize,
    /// Non-fatal failures (init commands); the transition still succeeded.
    pub errors: Vec<InitCommandError>,
}

#[derive(Debug)]
pub struct CloseResult {
    pub ticket: Ticket,
    pub duration: Option<chrono::Duration>,
}

#[derive(Debug)]
pub struct CleanupResult {
    pub ticket_id: String,
    pub removed_worktree: bool,
    pub deleted_branch: bool,
}

pub struct Engine<'a> {
    config: &'a Config,
    /// Bound to the invoking workspace (main repository or a worktree).
    repo: &'a Repository,
    store: &'a TicketStore,
    main_root: &'a Path,
    status: &'a StatusChannel,
    interaction: &'a dyn Interaction,
}

impl<'a> Engine<'a> {
    pub fn new(
        config: &'a Config,
        repo: &'a Repository,
        store: &'a TicketStore,
        main_root: &'a Path,
        status: &'a StatusChannel,
        interaction: &'a dyn Interaction,
    ) -> Self {
        Engine {
            config,
            repo,
            store,
            main_root,
            status,
            interaction,
        }
    }

    fn default_branch(&self) -> &str {
        &self.config.git.default_branch
    }

    fn worktree_mode(&self) -> bool {
        self.config.worktree.enabled
    }

    /// Start a ticket: move it to `doing` on its own branch, and in
    /// worktree mode give it a worktree with an aimed `current-ticket.md`.
    pub fn start(&self, id: &str, force: bool) -> Result<StartResult, FlowError> {
        let mut ticket = self.store.get(id)?;
        match ticket.status() {
            Status::Todo => {}
            Status::Doing if force => {}
            Status::Doing => return Err(FlowError::ticket_already_started(id)),
            Status::Done => return Err(FlowError::ticket_already_closed(id)),
        }

        if !self.worktree_mode() && self.git(self.repo.has_uncommitted_changes())? {
            return Err(FlowError::dirty_workspace(self.store.root()));
        }

        // Step 1: where are we starting from? Anything other than the
        // default branch must itself be a ticket branch, which becomes the
        // parent of this ticket.
        let current_branch = self
            .git(self.repo.current_branch())?
            .ok_or_else(|| FlowError::validation("cannot start a ticket from a detached HEAD"))?;
        let parent_branch = if current_branch == self.default_branch() || current_branch == id {
            // own branch: forced re-start, not a parent relationship
            None
        } else if ticket::is_ticket_id(&current_branch) {
            Some(current_branch.clone())
        } else {
            return Err(FlowError::invalid_start_branch(
                &current_branch,
                self.default_branch(),
            ));
        };

        // Worktree mode: an existing worktree for this ticket blocks the
        // start unless --force recreates it.
        if self.worktree_mode() {
            if let Some(existing) = self.git(self.repo.find_worktree_by_branch(id))? {
                if !force {
                    return Err(FlowError::worktree_exists(id, &existing.path));
                }
                self.status
                    .info(format!("Removing existing worktree: {}", existing.path.display()));
                self.git(self.repo.remove_worktree(&existing.path, true))?;
            }
        }

        let mut saga = Saga::new();
        let result = self.start_transition(&mut saga, &mut ticket, &current_branch, parent_branch, force);
        match result {
            Ok(result) => Ok(result),
            Err(e) => {
                saga.rollback();
                Err(e)
            }
        }
    }

    fn start_transition(
        &self,
        saga: &mut Saga,
        ticket: &mut Ticket,
        current_branch: &str,
        parent_branch: Option<String>,
        force: bool,
    ) -> Result<StartResult, FlowError> {
        let id = ticket.id.clone();
        let original_content = ticket::serialize_content(&ticket.meta, &ticket.body)?;
        let original_path = ticket.path.clone();

        // Branch mode: work happens on the ticket branch in this workspace.
        let mut created_branch = false;
        if !self.worktree_mode() {
            if self.git(self.repo.branch_exists(&id))? {
                if !force {
                    return Err(FlowError::branch_exists(&id));
                }
                self.status.info(format!("Reusing existing branch: {id}"));
                self.git(self.repo.checkout(&id))?;
            } else {
                self.status.info(format!("Creating branch: {id}"));
                self.git(self.repo.checkout_new_branch(&id))?;
                created_branch = true;
            }
            let repo = self.repo.clone();
            let back = current_branch.to_string();
            let branch = id.clone();
            saga.push("switch back and drop created branch", move || {
                repo.checkout(&back).map_err(|e| e.to_string())?;
                if created_branch {
                    repo.delete_branch(&branch, true).map_err(|e| e.to_string())?;
                }
                Ok(())
            });
        }

        // Record the parent edge before the move so one commit carries both.
        if let Some(parent) = &parent_branch {
            if !ticket.has_parent(parent) {
                relation::ensure_no_cycle(self.store, &id, parent)?;
                match self.store.get(parent) {
                    Ok(parent_ticket) if parent_ticket.status() == Status::Done => self
                        .status
                        .warn(format!("parent ticket {parent} is already done")),
                    Ok(_) => {}
                    Err(_) => self
                        .status
                        .warn(format!("parent branch {parent} has no ticket file here")),
                }
                ticket
                    .meta
                    .related
                    .push(format!("{}{parent}", ticket::PARENT_PREFIX));
            }
        }

        // Move todo -> doing and stamp started_at, then commit both
        // directories in one "Start ticket" commit.
        if ticket.status() != Status::Doing {
            ticket.meta.started_at = Some(get_now());
        }
        let doing_path = self.store.path_in(Status::Doing, &id);
        if ticket.path != doing_path {
            self.status.info(format!("Moving ticket to doing: {id}"));
            fs::create_dir_all(doing_path.parent().expect("status dir has a parent"))
                .map_err(|e| FlowError::io("failed to create doing directory", &e))?;
            fs::rename(&ticket.path, &doing_path)
                .map_err(|e| FlowError::io(format!("failed to move {}", ticket.path.display()), &e))?;
            ticket.path = doing_path.clone();
        }
        saga.push(
            "restore ticket file",
            restore_ticket_file(original_path, original_content, doing_path),
        );
        self.store.update(ticket)?;

        let todo_rel = self.store.status_dir_rel(Status::Todo);
        let doing_rel = self.store.status_dir_rel(Status::Doing);
        self.git(self.repo.add_all(&[todo_rel.as_path(), doing_rel.as_path()]))?;
        let committed = if self.git(self.repo.has_staged_changes())? {
            self.git(self.repo.commit(&format!("Start ticket: {id}")))?;
            true
        } else {
            // force re-start of a ticket that is already exactly in place
            self.status.info("No ticket changes to commit");
            false
        };

        // The file move is committed; undoing it now means unwinding the
        // commit, not shuffling files back.
        saga.disarm();

        if !self.worktree_mode() {
            self.store.set_current(Some(ticket))?;
            self.status.info(format!("Started ticket: {id}"));
            return Ok(StartResult {
                ticket: ticket.clone(),
                worktree_path: None,
                parent_branch,
                init_commands_executed: 0,
                errors: Vec::new(),
            });
        }

        // Worktree mode: the commit landed on the invoking branch; make
        // sure we are still on it before growing the worktree.
        if self.git(self.repo.current_branch())?.as_deref() != Some(current_branch) {
            self.git(self.repo.checkout(current_branch))?;
        }

        let mut post = Saga::new();
        if committed {
            let repo = self.repo.clone();
            post.push("unwind start commit (reset --hard HEAD^)", move || {
                repo.reset_hard("HEAD^").map_err(|e| e.to_string())
            });
        }

        let policy = WorktreePolicy::new(self.config, self.main_root);
        let worktree_path = policy.path_for(&id);
        let branch_existed = self.git(self.repo.branch_exists(&id))?;

        self.status
            .info(format!("Creating worktree: {}", worktree_path.display()));
        let add_result = self
            .repo
            .add_worktree(&worktree_path, &id, self.default_branch());
        let adopted_existing = match add_result {
            Ok(()) => branch_existed,
            Err(divergence @ GitError::Divergence { .. }) => {
                match self.interaction.resolve_divergence(&divergence) {
                    DivergenceChoice::Use => {
                        self.status.info(format!("Using existing branch: {id}"));
                        if let Err(e) = self.repo.add_worktree_existing(&worktree_path, &id) {
                            post.rollback();
                            return Err(errors::from_git(e));
                        }
                        true
                    }
                    DivergenceChoice::Recreate => {
                        self.status.info(format!("Recreating branch at HEAD: {id}"));
                        if let Err(e) = self.repo.delete_branch(&id, true).and_then(|_| {
                            self.repo
                                .add_worktree(&worktree_path, &id, self.default_branch())
                        }) {
                            post.rollback();
                            return Err(errors::from_git(e));
                        }
                        false
                    }
                    DivergenceChoice::Cancel => {
                        let outcomes = post.rollback();
                        let mut err = FlowError::cancelled(format!(
                            "start cancelled: branch '{id}' has diverged"
                        ));
                        if !outcomes.is_empty() {
                            err = err.with_details(outcomes.join("; "));
                        }
                        return Err(err);
                    }
                }
            }
            Err(e) => {
                post.rollback();
                return Err(errors::from_git(e));
            }
        };
        {
            let repo = self.repo.clone();
            let path = worktree_path.clone();
            post.push("remove created worktree", move || {
                repo.remove_worktree(&path, true).map_err(|e| e.to_string())
            });
        }
        if !adopted_existing && !branch_existed {
            let repo = self.repo.clone();
            let branch = id.clone();
            post.push("delete created branch", move || {
                repo.delete_branch(&branch, true).map_err(|e| e.to_string())
            });
        }

        // Aim current-ticket.md inside the worktree at its own checkout of
        // the ticket file.
        let wt_store = TicketStore::new(&worktree_path, &self.config.tickets);
        let wt_ticket = Ticket {
            path: wt_store.path_in(Status::Doing, &id),
            ..ticket.clone()
        };
        if wt_ticket.path.exists() {
            if let Err(e) = wt_store.set_current(Some(&wt_ticket)) {
                let outcomes = post.rollback();
                return Err(e.with_details(outcomes.join("; ")));
            }
        } else {
            // Possible after adopting a diverged branch whose checkout
            // predates the start commit.
            self.status.warn(format!(
                "worktree checkout has no {}; run 'ticketflow restore' inside it after syncing",
                wt_ticket.path.display()
            ));
        }

        post.disarm();

        // Init commands run last and never fail the transition.
        let (init_commands_executed, init_errors) =
            policy.run_init_commands(&worktree_path, self.repo.ctx());
        for err in &init_errors {
            self.status.warn(format!("init command failed: {err}"));
        }

        self.status.info(format!("Started ticket: {id}"));
        Ok(StartResult {
            ticket: ticket.clone(),
            worktree_path: Some(worktree_path),
            parent_branch,
            init_commands_executed,
            errors: init_errors,
        })
    }

    /// Close the workspace's current ticket (resolved via the
    /// `current-ticket.md` pointer).
    pub fn close_current(&self, reason: Option<String>, force: bool) -> Result<CloseResult, FlowError> {
        let ticket = match self.store.get_current()? {
            CurrentTicket::Ticket(t) => t,
            CurrentTicket::None => return Err(FlowError::no_current_ticket()),
            CurrentTicket::Broken { target } => return Err(FlowError::broken_current_link(&target)),
        };

        if self.worktree_mode() {
            let worktree = self
                .git(self.repo.find_worktree_by_branch(&ticket.id))?
                .ok_or_else(|| FlowError::worktree_not_found(&ticket.id))?;
            let worktree_repo = self.repo.at_dir(&worktree.path);
            if !force && self.git(worktree_repo.has_uncommitted_changes())? {
                return Err(FlowError::dirty_workspace(&worktree.path));
            }
        } else {
            let current_branch = self.git(self.repo.current_branch())?;
            if current_branch.as_deref() != Some(ticket.id.as_str()) {
                return Err(FlowError::validation(format!(
                    "current branch {} does not match the current ticket {}",
                    current_branch.as_deref().unwrap_or("(detached)"),
                    ticket.id
                ))
                .suggest(format!("git checkout {}", ticket.id)));
            }
            if !force && self.git(self.repo.has_uncommitted_changes())? {
                return Err(FlowError::dirty_workspace(self.store.root()));
            }
        }

        self.close_ticket(ticket, reason, true)
    }

    /// Close an arbitrary ticket by id. An unmerged branch demands an
    /// explicit reason; a merged one does not.
    pub fn close_by_id(
        &self,
        id: &str,
        reason: Option<String>,
        force: bool,
    ) -> Result<CloseResult, FlowError> {
        let ticket = self.store.get(id)?;
        match ticket.status() {
            Status::Doing => {}
            Status::Todo => return Err(FlowError::ticket_not_started(id)),
            Status::Done => return Err(FlowError::ticket_already_closed(id)),
        }

        let merged = self.git(self.repo.is_branch_merged(id, self.default_branch()))?;
        let reason = reason.filter(|r| !r.trim().is_empty());
        if !merged && reason.is_none() {
            return Err(FlowError::reason_required(id));
        }

        if !force && self.git(self.repo.has_uncommitted_changes())? {
            return Err(FlowError::dirty_workspace(self.store.root()));
        }

        let clears_current = match self.store.get_current()? {
            CurrentTicket::Ticket(current) => current.id == id,
            _ => false,
        };
        self.close_ticket(ticket, reason, clears_current)
    }

    fn close_ticket(
        &self,
        mut ticket: Ticket,
        reason: Option<String>,
        clear_current: bool,
    ) -> Result<CloseResult, FlowError> {
        let id = ticket.id.clone();
        let original_content = ticket::serialize_content(&ticket.meta, &ticket.body)?;
        let original_path = ticket.path.clone();

        ticket.meta.closed_at = Some(get_now());
        if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
            ticket.meta.close_reason = Some(reason);
        }

        let done_path = self.store.path_in(Status::Done, &id);
        self.status.info(format!("Closing ticket: {id}"));
        fs::create_dir_all(done_path.parent().expect("status dir has a parent"))
            .map_err(|e| FlowError::io("failed to create done directory", &e))?;
        fs::rename(&ticket.path, &done_path)
            .map_err(|e| FlowError::io(format!("failed to move {}", ticket.path.display()), &e))?;
        ticket.path = done_path.clone();

        let mut saga = Saga::new();
        saga.push(
            "restore ticket file",
            restore_ticket_file(original_path, original_content, done_path),
        );

        if let Err(e) = self.store.update(&ticket) {
            let outcomes = saga.rollback();
            return Err(e.with_details(format!(
                "update failed after the move; {}",
                outcomes.join("; ")
            )));
        }

        let doing_rel = self.store.status_dir_rel(Status::Doing);
        let done_rel = self.store.status_dir_rel(Status::Done);
        let message = match &ticket.meta.close_reason {
            Some(reason) => format!("Close ticket: {id} ({reason})"),
            None => format!("Close ticket: {id}"),
        };
        if let Err(e) = self
            .repo
            .add_all(&[doing_rel.as_path(), done_rel.as_path()])
            .and_then(|_| self.repo.commit(&message))
        {
            let outcomes = saga.rollback();
            return Err(errors::from_git(e).with_details(outcomes.join("; ")));
        }
        saga.disarm();

        if clear_current {
            if let Err(e) = self.store.set_current(None) {
                // The commit is in; a leftover pointer is repairable.
                self.status.warn(format!("could not clear current-ticket.md: {e}"));
            }
        }

        let duration = ticket.duration();
        self.status.info(format!("Closed ticket: {id}"));
        Ok(CloseResult { ticket, duration })
    }

    /// Remove the branch and worktree of a `done` ticket.
    pub fn cleanup(&self, id: &str, force: bool) -> Result<CleanupResult, FlowError> {
        let ticket = self.store.get(id)?;
        if ticket.status() != Status::Done {
            return Err(FlowError::ticket_not_done(id));
        }

        let current_branch = self.git(self.repo.current_branch())?;
        if current_branch.as_deref() != Some(self.default_branch()) {
            if self.git(self.repo.has_uncommitted_changes())? && !force {
                return Err(FlowError::dirty_workspace(self.store.root()));
            }
            self.status
                .info(format!("Switching to {}", self.default_branch()));
            self.git(self.repo.checkout(self.default_branch()))?;
        }

        let worktree = self.git(self.repo.find_worktree_by_branch(id))?;
        let branch_exists = self.git(self.repo.branch_exists(id))?;
        if worktree.is_none() && !branch_exists {
            self.status.warn(format!("nothing to clean up for {id}"));
            return Ok(CleanupResult {
                ticket_id: id.to_string(),
                removed_worktree: false,
                deleted_branch: false,
            });
        }

        if !force && !self.interaction.confirm(&format!("Remove worktree and branch for {id}?")) {
            return Err(FlowError::cancelled(format!("cleanup of {id} cancelled")));
        }

        let mut removed_worktree = false;
        if let Some(worktree) = worktree {
            self.status
                .info(format!("Removing worktree: {}", worktree.path.display()));
            self.git(self.repo.remove_worktree(&worktree.path, true))?;
            removed_worktree = true;
        }

        let mut deleted_branch = false;
        if branch_exists {
            self.status.info(format!("Deleting branch: {id}"));
            self.git(self.repo.delete_branch(id, true))?;
            deleted_branch = true;
        } else {
            self.status.info(format!("Branch already deleted: {id}"));
        }

        Ok(CleanupResult {
            ticket_id: id.to_string(),
            removed_worktree,
            deleted_branch,
        })
    }

    fn git<T>(&self, result: Result<T, GitError>) -> Result<T, FlowError> {
        result.map_err(errors::from_git)
    }
}

// rendering

impl Render for StartResult {
    fn structured(&self) -> serde_json::Value {
        serde_json::json!({
            "ticket_id": self.ticket.id,
            "status": self.ticket.status(),
            "branch": self.ticket.id,
            "worktree_path": self.worktree_path,
            "parent_branch": self.parent_branch,
            "init_commands_executed": self.init_commands_executed,
            "errors": self.errors,
        })
    }

    fn text(&self) -> String {
        let mut lines = vec![format!("Started ticket: {}", self.ticket.id)];
        lines.push(format!("Branch: {}", self.ticket.id));
        if let Some(path) = &self.worktree_path {
            lines.push(format!("Worktree: {}", path.display()));
        }
        if let Some(parent) = &self.parent_branch {
            lines.push(format!("Parent: {parent}"));
        }
        if self.init_commands_executed > 0 {
            lines.push(format!(
                "Init commands: {} executed, {} failed",
                self.init_commands_executed,
                self.errors.len()
            ));
        }
        lines.join("\n")
    }
}

impl Render for CloseResult {
    fn structured(&self) -> serde_json::Value {
        serde_json::json!({
            "ticket_id": self.ticket.id,
            "status": self.ticket.status(),
            "duration": self.duration.map(format_duration),
            "close_reason": self.ticket.meta.close_reason,
        })
    }

    fn text(&self) -> String {
        let mut lines = vec![format!("Closed ticket: {}", self.ticket.id)];
        if let Some(duration) = self.duration {
            lines.push(format!("Duration: {}", format_duration(duration)));
        }
        if let Some(reason) = &self.ticket.meta.close_reason {
            lines.push(format!("Reason: {reason}"));
        }
        lines.join("\n")
    }
}

impl Render for CleanupResult {
    fn structured(&self) -> serde_json::Value {
        serde_json::json!({
            "ticket_id": self.ticket_id,
            "removed_worktree": self.removed_worktree,
            "deleted_branch": self.deleted_branch,
        })
    }

    fn text(&self) -> String {
        if !self.removed_worktree && !self.deleted_branch {
            return format!("Nothing to clean up for {}", self.ticket_id);
        }
        let mut parts = Vec::new();
        if self.removed_worktree {
            parts.push("worktree removed");
        }
        if self.deleted_branch {
            parts.push("branch deleted");
        }
        format!("Cleaned up {}: {}", self.ticket_id, parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_saga_runs_undos_in_reverse() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut saga = Saga::new();
        for label in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            saga.push("step", move || {
                order.borrow_mut().push(label);
                Ok(())
            });
        }
        let outcomes = saga.rollback();
        assert_eq!(*order.borrow(), vec!["third", "second", "first"]);
        assert_eq!(outcomes.len(), 3);
    }

    #[test]
    fn test_saga_disarm_forgets_undos() {
        let fired = Rc::new(RefCell::new(false));
        let mut saga = Saga::new();
        {
            let fired = Rc::clone(&fired);
            saga.push("step", move || {
                *fired.borrow_mut() = true;
                Ok(())
            });
        }
        saga.disarm();
        assert!(saga.rollback().is_empty());
        assert!(!*fired.borrow());
    }

    #[test]
    fn test_saga_reports_failed_undo() {
        let mut saga = Saga::new();
        saga.push("bad", || Err("boom".to_string()));
        let outcomes = saga.rollback();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].contains("FAILED"));
        assert!(outcomes[0].contains("boom"));
    }
}
