//! Ticket storage: status directories and the `current-ticket.md` pointer.
//!
//! A store is bound to one workspace root (the main repository or a single
//! worktree) and resolves the three status directories beneath it. Writes
//! are atomic: serialize to a temp file in the same directory, then rename.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};

use crate::config::TicketsConfig;
use crate::errors::FlowError;
use crate::ticket::{self, Metadata, Status, Ticket};

pub const CURRENT_TICKET_LINK: &str = "current-ticket.md";

/// Default body written into newly created tickets.
const NEW_TICKET_BODY: &str = "\n# Summary\n\n\n## Tasks\n\n- [ ] \n";

/// What `current-ticket.md` resolves to.
#[derive(Debug)]
pub enum CurrentTicket {
    /// No link present: no active ticket in this workspace.
    None,
    Ticket(Ticket),
    /// Link exists but its target is missing or not a `doing` ticket.
    Broken { target: PathBuf },
}

#[derive(Debug, Clone)]
pub struct TicketStore {
    root: PathBuf,
    cfg: TicketsConfig,
}

impl TicketStore {
    pub fn new(workspace_root: impl Into<PathBuf>, cfg: &TicketsConfig) -> Self {
        TicketStore {
            root: workspace_root.into(),
            cfg: cfg.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tickets_dir(&self) -> PathBuf {
        self.root.join(&self.cfg.dir)
    }

    pub fn status_dir(&self, status: Status) -> PathBuf {
        let sub = match status {
            Status::Todo => &self.cfg.todo_dir,
            Status::Doing => &self.cfg.doing_dir,
            Status::Done => &self.cfg.done_dir,
        };
        self.tickets_dir().join(sub)
    }

    /// Status directory path relative to the workspace root, for staging.
    pub fn status_dir_rel(&self, status: Status) -> PathBuf {
        let sub = match status {
            Status::Todo => &self.cfg.todo_dir,
            Status::Doing => &self.cfg.doing_dir,
            Status::Done => &self.cfg.done_dir,
        };
        Path::new(&self.cfg.dir).join(sub)
    }

    pub fn path_in(&self, status: Status, id: &str) -> PathBuf {
        self.status_dir(status).join(format!("{id}.md"))
    }

    pub fn ensure_dirs(&self) -> Result<(), FlowError> {
        for status in [Status::Todo, Status::Doing, Status::Done] {
            let dir = self.status_dir(status);
            fs::create_dir_all(&dir)
                .map_err(|e| FlowError::io(format!("failed to create {}", dir.display()), &e))?;
        }
        Ok(())
    }

    /// Create a new ticket in `todo/`.
    ///
    /// The id is synthesized from `now` and the slug; creation fails with
    /// `TICKET_EXISTS` when a ticket with that id is already present in any
    /// status directory.
    pub fn create(
        &self,
        slug: &str,
        now: DateTime<FixedOffset>,
        parent: Option<&str>,
    ) -> Result<Ticket, FlowError> {
        ticket::validate_slug(slug)?;
        self.ensure_dirs()?;

        let id = ticket::new_id(slug, now.with_timezone(&chrono::Utc));
        if self.find_path(&id).is_some() {
            return Err(FlowError::ticket_exists(&id));
        }

        let mut meta = Metadata::new(now);
        if let Some(parent) = parent {
            meta.related.push(format!("{}{parent}", ticket::PARENT_PREFIX));
        }
        let path = self.path_in(Status::Todo, &id);
        let ticket = Ticket {
            id,
            path,
            meta,
            body: NEW_TICKET_BODY.to_string(),
        };
        self.write(&ticket)?;
        Ok(ticket)
    }

    /// Locate `<id>.md` under any status directory.
    pub fn get(&self, id: &str) -> Result<Ticket, FlowError> {
        let path = self
            .find_path(id)
            .ok_or_else(|| FlowError::ticket_not_found(id))?;
        self.load(&path, id)
    }

    fn find_path(&self, id: &str) -> Option<PathBuf> {
        [Status::Todo, Status::Doing, Status::Done]
            .into_iter()
            .map(|s| self.path_in(s, id))
            .find(|p| p.exists())
    }

    fn load(&self, path: &Path, id: &str) -> Result<Ticket, FlowError> {
        let content = fs::read_to_string(path)
            .map_err(|e| FlowError::io(format!("failed to read {}", path.display()), &e))?;
        let (meta, body) = ticket::parse_content(&content, id)?;
        Ok(Ticket {
            id: id.to_string(),
            path: path.to_path_buf(),
            meta,
            body,
        })
    }

    /// Enumerate tickets by scanning the directories the filter covers.
    /// Order is whatever the filesystem yields; callers sort.
    pub fn list(&self, filter: StatusFilter) -> Result<Vec<Ticket>, FlowError> {
        let mut tickets = Vec::new();
        for status in filter.statuses() {
            let dir = self.status_dir(*status);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(FlowError::io(format!("failed to scan {}", dir.display()), &e))
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(id) = ticket_id_of(&path) else { continue };
                match self.load(&path, &id) {
                    Ok(t) => tickets.push(t),
                    // Skip unreadable tickets rather than failing the scan.
                    Err(e) => log::warn!("skipping {}: {e}", path.display()),
                }
            }
        }
        Ok(tickets)
    }

    /// Re-serialize a ticket to its current path.
    pub fn update(&self, ticket: &Ticket) -> Result<(), FlowError> {
        self.write(ticket)
    }

    /// Body-only read accessor.
    pub fn read_content(&self, id: &str) -> Result<String, FlowError> {
        Ok(self.get(id)?.body)
    }

    /// Body-only write accessor; frontmatter is preserved as stored.
    pub fn write_content(&self, id: &str, body: &str) -> Result<(), FlowError> {
        let mut ticket = self.get(id)?;
        ticket.body = body.to_string();
        self.write(&ticket)
    }

    fn write(&self, ticket: &Ticket) -> Result<(), FlowError> {
        let content = ticket::serialize_content(&ticket.meta, &ticket.body)?;
        write_atomic(&ticket.path, &content)
    }

    // current-ticket pointer

    pub fn current_link_path(&self) -> PathBuf {
        self.root.join(CURRENT_TICKET_LINK)
    }

    /// Replace (or with `None`, remove) the `current-ticket.md` symlink.
    /// Tolerates a missing or broken existing link.
    pub fn set_current(&self, ticket: Option<&Ticket>) -> Result<(), FlowError> {
        let link = self.current_link_path();
        if fs::symlink_metadata(&link).is_ok() {
            fs::remove_file(&link)
                .map_err(|e| FlowError::io(format!("failed to remove {}", link.display()), &e))?;
        }
        let Some(ticket) = ticket else { return Ok(()) };

        let target = pathdiff::diff_paths(&ticket.path, &self.root)
            .unwrap_or_else(|| ticket.path.clone());
        symlink(&target, &link)
            .map_err(|e| FlowError::io(format!("failed to link {}", link.display()), &e))
    }

    /// Resolve the `current-ticket.md` symlink.
    ///
    /// Distinguishes "no link" from "link whose target is gone or not in
    /// `doing/`"; the latter is what `restore` repairs.
    pub fn get_current(&self) -> Result<CurrentTicket, FlowError> {
        let link = self.current_link_path();
        let target = match fs::read_link(&link) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CurrentTicket::None),
            // A regular file where the link should be counts as broken.
            Err(_) => return Ok(CurrentTicket::Broken { target: link }),
        };
        let resolved = if target.is_absolute() {
            target.clone()
        } else {
            self.root.join(&target)
        };
        if !resolved.exists() {
            return Ok(CurrentTicket::Broken { target: resolved });
        }
        let Some(id) = ticket_id_of(&resolved) else {
            return Ok(CurrentTicket::Broken { target: resolved });
        };
        let ticket = self.load(&resolved, &id)?;
        if ticket.status() != Status::Doing || !in_dir(&resolved, &self.status_dir(Status::Doing)) {
            return Ok(CurrentTicket::Broken { target: resolved });
        }
        Ok(CurrentTicket::Ticket(ticket))
    }
}

/// File stem of a `.md` ticket file, if it looks like one.
fn ticket_id_of(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("md") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    ticket::is_ticket_id(stem).then(|| stem.to_string())
}

fn in_dir(path: &Path, dir: &Path) -> bool {
    match (dunce::canonicalize(path.parent().unwrap_or(path)), dunce::canonicalize(dir)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Write-to-temp-then-rename in the target's directory, so readers never
/// observe a half-written ticket.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), FlowError> {
    let dir = path
        .parent()
        .ok_or_else(|| FlowError::validation(format!("no parent directory: {}", path.display())))?;
    fs::create_dir_all(dir)
        .map_err(|e| FlowError::io(format!("failed to create {}", dir.display()), &e))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FlowError::validation(format!("bad file name: {}", path.display())))?;
    let tmp = dir.join(format!(".{file_name}.tmp"));
    fs::write(&tmp, content)
        .map_err(|e| FlowError::io(format!("failed to write {}", tmp.display()), &e))?;
    fs::rename(&tmp, path)
        .map_err(|e| FlowError::io(format!("failed to replace {}", path.display()), &e))
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Filter for [`TicketStore::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Todo,
    Doing,
    Done,
    /// `todo` + `doing`.
    Active,
    All,
}

impl StatusFilter {
    fn statuses(&self) -> &'static [Status] {
        match self {
            StatusFilter::Todo => &[Status::Todo],
            StatusFilter::Doing => &[Status::Doing],
            StatusFilter::Done => &[Status::Done],
            StatusFilter::Active => &[Status::Todo, Status::Doing],
            StatusFilter::All => &[Status::Todo, Status::Doing, Status::Done],
        }
    }
}
