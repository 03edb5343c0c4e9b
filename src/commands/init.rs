//! `ticketflow init`: scaffold config, ticket directories and .gitignore.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{Config, CONFIG_FILE};
use crate::errors::FlowError;
use crate::exec::{CancelToken, Ctx};
use crate::git::Repository;
use crate::output::{self, OutputFormat, Render, StatusChannel};
use crate::store::TicketStore;
use crate::ticket::Status;

struct InitResult {
    root: PathBuf,
    created_config: bool,
    gitignore_updated: bool,
}

impl Render for InitResult {
    fn structured(&self) -> serde_json::Value {
        serde_json::json!({
            "root": self.root,
            "created_config": self.created_config,
            "gitignore_updated": self.gitignore_updated,
        })
    }

    fn text(&self) -> String {
        let mut lines = Vec::new();
        if self.created_config {
            lines.push(format!("Created {CONFIG_FILE}"));
        } else {
            lines.push(format!("{CONFIG_FILE} already present"));
        }
        lines.push("Ticket directories ready under tickets/".to_string());
        if self.gitignore_updated {
            lines.push("Updated .gitignore".to_string());
        }
        lines.push("Create your first ticket with: ticketflow new <slug>".to_string());
        lines.join("\n")
    }
}

pub fn run(format: OutputFormat, cancel: CancelToken) -> anyhow::Result<()> {
    let ctx = Ctx::new(cancel);
    let probe = Repository::new(".", Duration::from_secs(10), ctx);
    let root = probe.worktree_root().map_err(|_| FlowError::not_git_repo())?;
    let status = StatusChannel::new(format);

    let config_path = root.join(CONFIG_FILE);
    let created_config = !config_path.exists();
    let config = if created_config {
        let config = Config::default();
        config.save(&root)?;
        status.info(format!("Writing {}", config_path.display()));
        config
    } else {
        Config::load(&root)?
    };

    let store = TicketStore::new(&root, &config.tickets);
    store.ensure_dirs()?;
    for state in [Status::Todo, Status::Doing, Status::Done] {
        let keep = store.status_dir(state).join(".gitkeep");
        if !keep.exists() {
            std::fs::write(&keep, "")
                .map_err(|e| FlowError::io(format!("failed to write {}", keep.display()), &e))?;
        }
    }

    let gitignore_updated = update_gitignore(&root, &config)?;

    output::emit(
        format,
        &InitResult {
            root,
            created_config,
            gitignore_updated,
        },
    );
    Ok(())
}

/// Make sure generated paths are ignored. Returns whether the file changed.
fn update_gitignore(root: &Path, config: &Config) -> Result<bool, FlowError> {
    let path = root.join(".gitignore");
    let existing = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(FlowError::io(format!("failed to read {}", path.display()), &e)),
    };

    let mut wanted = vec![crate::store::CURRENT_TICKET_LINK.to_string()];
    // Only ignore the worktree base when it lives inside the repository.
    let base = config.worktree_base(root);
    if let Ok(rel) = base.strip_prefix(root) {
        if !rel.as_os_str().is_empty() {
            wanted.push(format!("{}/", rel.to_string_lossy()));
        }
    }

    let present: Vec<&str> = existing.lines().map(str::trim).collect();
    let missing: Vec<String> = wanted
        .into_iter()
        .filter(|w| !present.contains(&w.as_str()))
        .collect();
    if missing.is_empty() {
        return Ok(false);
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    for line in missing {
        updated.push_str(&line);
        updated.push('\n');
    }
    std::fs::write(&path, updated)
        .map_err(|e| FlowError::io(format!("failed to write {}", path.display()), &e))?;
    Ok(true)
}
