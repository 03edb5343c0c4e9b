//! `ticketflow migrate-dates`: normalize frontmatter timestamps.
//!
//! Rewrites tickets whose timestamps carry sub-second precision (written by
//! older tooling) to whole-second RFC3339. Files without sub-seconds are
//! left byte-for-byte untouched, whatever their offset formatting.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::context::Context;
use crate::errors::FlowError;
use crate::exec::CancelToken;
use crate::output::{self, OutputFormat, Render, StatusChannel};
use crate::store::write_atomic;
use crate::ticket::{self, Status};

static SUBSECOND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{2}:\d{2}:\d{2}\.\d+").expect("static regex"));

struct MigrateResult {
    migrated: Vec<PathBuf>,
    dry_run: bool,
}

impl Render for MigrateResult {
    fn structured(&self) -> serde_json::Value {
        serde_json::json!({
            "migrated": self.migrated,
            "count": self.migrated.len(),
            "dry_run": self.dry_run,
        })
    }

    fn text(&self) -> String {
        let verb = if self.dry_run { "Would migrate" } else { "Migrated" };
        if self.migrated.is_empty() {
            return "No tickets need migration".to_string();
        }
        let mut lines = vec![format!("{verb} {} ticket(s):", self.migrated.len())];
        for path in &self.migrated {
            lines.push(format!("  {}", path.display()));
        }
        lines.join("\n")
    }
}

pub fn run(format: OutputFormat, cancel: CancelToken, dry_run: bool) -> anyhow::Result<()> {
    let ctx = Context::resolve(cancel)?;
    let status = StatusChannel::new(format);
    let mut migrated = Vec::new();

    for state in [Status::Todo, Status::Doing, Status::Done] {
        let dir = ctx.store.status_dir(state);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(FlowError::io(format!("failed to scan {}", dir.display()), &e).into())
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let content = std::fs::read_to_string(&path)
                .map_err(|e| FlowError::io(format!("failed to read {}", path.display()), &e))?;
            if !needs_migration(&content) {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("ticket")
                .to_string();
            let (meta, body) = ticket::parse_content(&content, &id)?;
            if !dry_run {
                status.info(format!("Rewriting {}", path.display()));
                write_atomic(&path, &ticket::serialize_content(&meta, &body)?)?;
            }
            migrated.push(path);
        }
    }

    output::emit(format, &MigrateResult { migrated, dry_run });
    Ok(())
}

/// Only sub-second timestamps in the frontmatter trigger a rewrite.
fn needs_migration(content: &str) -> bool {
    let frontmatter = content
        .strip_prefix("---\n")
        .and_then(|rest| rest.find("\n---\n").map(|idx| &rest[..idx]))
        .unwrap_or("");
    SUBSECOND_RE.is_match(frontmatter)
}
