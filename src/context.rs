//! Invocation context: where are we, and what are we working with.
//!
//! Resolves the current workspace root (main repository or linked
//! worktree), the main repository root, the configuration, and builds the
//! git port and ticket store bound to the right directories.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::errors::FlowError;
use crate::exec::{CancelToken, Ctx};
use crate::git::Repository;
use crate::store::TicketStore;

/// Timeout for the discovery calls that run before the config is loaded.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Context {
    pub config: Config,
    /// Root of the workspace the command was invoked in. Inside a linked
    /// worktree this is the worktree root.
    pub root: PathBuf,
    /// Root of the main repository (differs from `root` inside a worktree).
    pub main_root: PathBuf,
    /// Git port bound to `root`.
    pub repo: Repository,
    /// Ticket store bound to `root`.
    pub store: TicketStore,
}

impl Context {
    /// Resolve the context for the current directory.
    pub fn resolve(cancel: CancelToken) -> Result<Context, FlowError> {
        let ctx = Ctx::new(cancel);
        let probe = Repository::new(".", DISCOVERY_TIMEOUT, ctx.clone());
        let root = probe.worktree_root().map_err(|_| FlowError::not_git_repo())?;
        let main_root = probe.main_root_or(&root);

        // Config is committed, so the current checkout normally has it; a
        // worktree created before the config existed falls back to the
        // main repository's copy.
        let config = Config::load(&root).or_else(|err| {
            if main_root != root {
                Config::load(&main_root).map_err(|_| err)
            } else {
                Err(err)
            }
        })?;

        let repo = Repository::new(&root, config.git_timeout(), ctx);
        let store = TicketStore::new(&root, &config.tickets);
        Ok(Context {
            config,
            root,
            main_root,
            repo,
            store,
        })
    }

    /// Git port bound to the main repository root (for cleanup and
    /// reconciliation, which must never run against a worktree checkout).
    pub fn main_repo(&self) -> Repository {
        self.repo.at_dir(&self.main_root)
    }

    /// Ticket store bound to the main repository root.
    pub fn main_store(&self) -> TicketStore {
        TicketStore::new(&self.main_root, &self.config.tickets)
    }

    pub fn in_worktree(&self) -> bool {
        self.root != self.main_root
    }
}

impl Repository {
    fn main_root_or(&self, fallback: &std::path::Path) -> PathBuf {
        self.main_repo_root().unwrap_or_else(|e| {
            log::debug!("could not resolve main repository root: {e}");
            fallback.to_path_buf()
        })
    }
}
