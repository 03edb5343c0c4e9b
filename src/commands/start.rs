//! `ticketflow start <id>`: move a ticket to `doing` on its own branch.

use crate::context::Context;
use crate::engine::Engine;
use crate::exec::CancelToken;
use crate::output::{self, OutputFormat, StatusChannel};
use crate::worktree::ConsolePrompt;

pub fn run(format: OutputFormat, cancel: CancelToken, id: &str, force: bool) -> anyhow::Result<()> {
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
    let result = engine.start(id, force)?;
    output::emit(format, &result);
    Ok(())
}
