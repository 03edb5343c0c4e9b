//! `ticketflow new <slug>`: create a ticket in `todo/`.
//!
//! The parent is taken from `--parent` when given, otherwise inferred from
//! the current branch when that branch is itself a ticket branch. The
//! ticket file is written but not committed; committing with
//! `Add ticket: <slug>` is left to the user.

use std::path::PathBuf;

use crate::context::Context;
use crate::errors::FlowError;
use crate::exec::CancelToken;
use crate::output::{self, OutputFormat, Render, StatusChannel};
use crate::relation;
use crate::ticket::{self, Status, Ticket};
use crate::utils::get_now;

struct NewResult {
    ticket: Ticket,
    parent: Option<String>,
}

impl Render for NewResult {
    fn structured(&self) -> serde_json::Value {
        serde_json::json!({
            "ticket_id": self.ticket.id,
            "status": self.ticket.status(),
            "path": self.ticket.path,
            "parent": self.parent,
        })
    }

    fn text(&self) -> String {
        let mut lines = vec![
            format!("Created ticket: {}", self.ticket.id),
            format!("File: {}", self.ticket.path.display()),
        ];
        if let Some(parent) = &self.parent {
            lines.push(format!("Parent: {parent}"));
        }
        lines.push(format!("Start it with: ticketflow start {}", self.ticket.id));
        lines.join("\n")
    }
}

pub fn run(
    format: OutputFormat,
    cancel: CancelToken,
    slug: &str,
    parent_flag: Option<String>,
) -> anyhow::Result<()> {
    let ctx = Context::resolve(cancel)?;
    let status = StatusChannel::new(format);
    ticket::validate_slug(slug)?;

    let parent = resolve_parent(&ctx, parent_flag)?;
    if let Some(parent_id) = &parent {
        if let Ok(parent_ticket) = ctx.store.get(parent_id) {
            if parent_ticket.status() == Status::Done {
                status.warn(format!("parent ticket {parent_id} is already done"));
            }
        }
    }

    let now = get_now();
    if let Some(parent_id) = &parent {
        let id = ticket::new_id(slug, now.with_timezone(&chrono::Utc));
        relation::ensure_no_cycle(&ctx.store, &id, parent_id)?;
    }

    let ticket = ctx.store.create(slug, now, parent.as_deref())?;
    let path = relative_to_root(&ctx, &ticket.path);
    status.info(format!("Created ticket file: {}", path.display()));

    output::emit(format, &NewResult { ticket, parent });
    Ok(())
}

/// Explicit `--parent` must name an existing ticket; otherwise the current
/// branch implies the parent when it is a ticket branch.
fn resolve_parent(ctx: &Context, parent_flag: Option<String>) -> Result<Option<String>, FlowError> {
    if let Some(parent) = parent_flag {
        ctx.store.get(&parent)?;
        return Ok(Some(parent));
    }
    let Some(branch) = ctx.repo.current_branch().map_err(crate::errors::from_git)? else {
        return Ok(None);
    };
    if branch == ctx.config.git.default_branch || !ticket::is_ticket_id(&branch) {
        return Ok(None);
    }
    Ok(ctx.store.get(&branch).ok().map(|t| t.id))
}

fn relative_to_root(ctx: &Context, path: &std::path::Path) -> PathBuf {
    pathdiff::diff_paths(path, &ctx.root).unwrap_or_else(|| path.to_path_buf())
}
