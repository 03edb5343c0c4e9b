//! `ticketflow restore`: repair the `current-ticket.md` symlink.
//!
//! The current branch names the ticket; it must exist and be in `doing/`.
//! Useful after a crash or an accidental `rm current-ticket.md`.

use std::path::PathBuf;

use crate::context::Context;
use crate::errors::FlowError;
use crate::exec::CancelToken;
use crate::output::{self, OutputFormat, Render, StatusChannel};
use crate::ticket::{self, Status};

struct RestoreResult {
    ticket_id: String,
    link: PathBuf,
}

impl Render for RestoreResult {
    fn structured(&self) -> serde_json::Value {
        serde_json::json!({
            "ticket_id": self.ticket_id,
            "current_ticket_link": self.link,
        })
    }

    fn text(&self) -> String {
        format!("Restored current-ticket.md -> {}", self.ticket_id)
    }
}

pub fn run(format: OutputFormat, cancel: CancelToken) -> anyhow::Result<()> {
    let ctx = Context::resolve(cancel)?;
    let status = StatusChannel::new(format);

    let branch = ctx
        .repo
        .current_branch()
        .map_err(crate::errors::from_git)?
        .ok_or_else(|| FlowError::validation("cannot restore from a detached HEAD"))?;
    if !ticket::is_ticket_id(&branch) {
        return Err(FlowError::validation(format!(
            "current branch '{branch}' is not a ticket branch"
        ))
        .suggest("Switch to a ticket branch or its worktree, then re-run restore")
        .into());
    }

    let ticket = ctx.store.get(&branch)?;
    if ticket.status() != Status::Doing {
        return Err(FlowError::ticket_not_started(&branch).into());
    }

    ctx.store.set_current(Some(&ticket))?;
    status.info(format!("Linked current-ticket.md to {}", ticket.id));
    output::emit(
        format,
        &RestoreResult {
            ticket_id: ticket.id.clone(),
            link: ctx.store.current_link_path(),
        },
    );
    Ok(())
}
