//! `ticketflow close [<id>]`: move a ticket to `done` with a commit.

use crate::context::Context;
use crate::engine::Engine;
use crate::exec::CancelToken;
use crate::output::{self, OutputFormat, StatusChannel};
use crate::worktree::ConsolePrompt;

pub fn run(
    format: OutputFormat,
    cancel: CancelToken,
    id: Option<String>,
    reason: Option<String>,
    force: bool,
) -> anyhow::Result<()> {
    let ctx = Context::resolve(cancel)?;
    let status = StatusChannel::new(format);
    let prompt = ConsolePrompt;
    let engine = Engine::new(
        &ctx.config,
        &ctx.repo,
        &ctx.store,
        &ctx.main_root,
        &status,
        &prompt,
    );
    let result = match id {
        Some(id) => engine.close_by_id(&id, reason, force)?,
        None => engine.close_current(reason, force)?,
    };
    output::emit(format, &result);
    Ok(())
}
