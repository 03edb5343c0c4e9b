//! Structured error taxonomy.
//!
//! Uses anyhow for propagation at the command layer. `FlowError` carries a
//! stable code, a human message, optional details and remediation
//! suggestions; `main` downcasts with `anyhow::Error::downcast_ref` to pick
//! the exit code and the rendering (text block vs `{"error": ...}` JSON).

use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::git::GitError;

/// Stable error codes, grouped by subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // config
    NotGitRepo,
    ConfigNotFound,
    ConfigInvalid,
    // ticket
    TicketNotFound,
    TicketExists,
    TicketInvalid,
    TicketNotStarted,
    TicketAlreadyStarted,
    TicketAlreadyClosed,
    TicketNotDone,
    Validation,
    // git
    GitDirtyWorkspace,
    GitBranchExists,
    GitMergeFailed,
    GitError,
    // worktree
    WorktreeExists,
    WorktreeNotFound,
    WorktreeCreateFailed,
    WorktreeRemoveFailed,
    // permission
    PermissionDenied,
    // user interrupt (SIGINT or an explicit "cancel" answer)
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotGitRepo => "NOT_GIT_REPO",
            ErrorCode::ConfigNotFound => "CONFIG_NOT_FOUND",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::TicketNotFound => "TICKET_NOT_FOUND",
            ErrorCode::TicketExists => "TICKET_EXISTS",
            ErrorCode::TicketInvalid => "TICKET_INVALID",
            ErrorCode::TicketNotStarted => "TICKET_NOT_STARTED",
            ErrorCode::TicketAlreadyStarted => "TICKET_ALREADY_STARTED",
            ErrorCode::TicketAlreadyClosed => "TICKET_ALREADY_CLOSED",
            ErrorCode::TicketNotDone => "TICKET_NOT_DONE",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::GitDirtyWorkspace => "GIT_DIRTY_WORKSPACE",
            ErrorCode::GitBranchExists => "GIT_BRANCH_EXISTS",
            ErrorCode::GitMergeFailed => "GIT_MERGE_FAILED",
            ErrorCode::GitError => "GIT_ERROR",
            ErrorCode::WorktreeExists => "WORKTREE_EXISTS",
            ErrorCode::WorktreeNotFound => "WORKTREE_NOT_FOUND",
            ErrorCode::WorktreeCreateFailed => "WORKTREE_CREATE_FAILED",
            ErrorCode::WorktreeRemoveFailed => "WORKTREE_REMOVE_FAILED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::Cancelled => "CANCELLED",
        }
    }

    /// Process exit code for this class of failure: 1 for precondition and
    /// state errors, 3 for git/worktree/filesystem runtime failures, 130 for
    /// cancellation. Usage errors exit 2 via clap before we get here.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCode::Cancelled => 130,
            ErrorCode::GitError
            | ErrorCode::GitMergeFailed
            | ErrorCode::WorktreeCreateFailed
            | ErrorCode::WorktreeRemoveFailed
            | ErrorCode::PermissionDenied => 3,
            _ => 1,
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A structured, user-facing failure.
#[derive(Debug, Serialize)]
pub struct FlowError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for FlowError {}

impl FlowError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        FlowError {
            code,
            message: message.into(),
            details: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    // config

    pub fn not_git_repo() -> Self {
        FlowError::new(ErrorCode::NotGitRepo, "not inside a git repository")
            .suggest("Run this command from within a git repository")
            .suggest("Initialize one with: git init")
    }

    pub fn config_not_found(root: &Path) -> Self {
        FlowError::new(
            ErrorCode::ConfigNotFound,
            format!("no .ticketflow.yaml found under {}", root.display()),
        )
        .suggest("Run: ticketflow init")
    }

    pub fn config_invalid(err: impl std::fmt::Display) -> Self {
        FlowError::new(ErrorCode::ConfigInvalid, "invalid .ticketflow.yaml")
            .with_details(err.to_string())
            .suggest("Fix the YAML syntax or delete the file and re-run: ticketflow init")
    }

    // ticket

    pub fn ticket_not_found(id: &str) -> Self {
        FlowError::new(ErrorCode::TicketNotFound, format!("ticket not found: {id}"))
            .suggest("Run 'ticketflow list --status all' to see known tickets")
    }

    pub fn ticket_exists(id: &str) -> Self {
        FlowError::new(ErrorCode::TicketExists, format!("ticket already exists: {id}"))
            .suggest("Pick a different slug or wait a second and retry")
    }

    pub fn ticket_invalid(id: &str, why: impl std::fmt::Display) -> Self {
        FlowError::new(ErrorCode::TicketInvalid, format!("invalid ticket {id}"))
            .with_details(why.to_string())
    }

    pub fn no_current_ticket() -> Self {
        FlowError::new(ErrorCode::TicketNotStarted, "no ticket is currently active")
            .suggest("Start one with: ticketflow start <id>")
            .suggest("Or close a specific ticket with: ticketflow close <id>")
    }

    pub fn broken_current_link(target: &Path) -> Self {
        FlowError::new(
            ErrorCode::TicketNotStarted,
            "current-ticket.md points at a missing ticket",
        )
        .with_details(format!("link target: {}", target.display()))
        .suggest("Run 'ticketflow restore' to repair the link")
    }

    pub fn ticket_not_started(id: &str) -> Self {
        FlowError::new(
            ErrorCode::TicketNotStarted,
            format!("ticket has not been started: {id}"),
        )
        .suggest(format!("Start it with: ticketflow start {id}"))
    }

    pub fn ticket_already_started(id: &str) -> Self {
        FlowError::new(
            ErrorCode::TicketAlreadyStarted,
            format!("ticket is already in progress: {id}"),
        )
        .suggest("Use --force to re-initialize its branch/worktree")
    }

    pub fn ticket_already_closed(id: &str) -> Self {
        FlowError::new(
            ErrorCode::TicketAlreadyClosed,
            format!("ticket is already closed: {id}"),
        )
    }

    pub fn ticket_not_done(id: &str) -> Self {
        FlowError::new(
            ErrorCode::TicketNotDone,
            format!("ticket is not done yet: {id}"),
        )
        .suggest(format!("Close it first with: ticketflow close {id}"))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        FlowError::new(ErrorCode::Validation, message)
    }

    pub fn invalid_slug(slug: &str) -> Self {
        FlowError::validation(format!("invalid slug: {slug:?}"))
            .with_details("slugs must be non-empty and contain only a-z, 0-9 and '-'")
    }

    pub fn invalid_start_branch(branch: &str, default_branch: &str) -> Self {
        FlowError::validation(format!(
            "cannot start a ticket from branch '{branch}': not the default branch and not a ticket branch"
        ))
        .suggest(format!("Switch to the default branch first: git checkout {default_branch}"))
    }

    pub fn circular_parent(child: &str, parent: &str) -> Self {
        FlowError::validation(format!(
            "setting parent '{parent}' on '{child}' would create a cycle in the parent graph"
        ))
    }

    pub fn reason_required(id: &str) -> Self {
        FlowError::validation(format!(
            "branch '{id}' is not merged into the default branch; a close reason is required"
        ))
        .suggest(format!("ticketflow close {id} --reason \"why this is being closed\""))
        .suggest("Or merge the branch first, then close without a reason")
    }

    // git / worktree

    pub fn dirty_workspace(path: &Path) -> Self {
        FlowError::new(
            ErrorCode::GitDirtyWorkspace,
            "workspace has uncommitted changes",
        )
        .with_details(format!("workspace: {}", path.display()))
        .suggest("Commit or stash your changes first")
        .suggest("Or pass --force to proceed anyway")
    }

    pub fn branch_exists(branch: &str) -> Self {
        FlowError::new(
            ErrorCode::GitBranchExists,
            format!("branch already exists: {branch}"),
        )
        .suggest("Use --force to reuse the existing branch")
    }

    pub fn worktree_exists(id: &str, path: &Path) -> Self {
        FlowError::new(
            ErrorCode::WorktreeExists,
            format!("a worktree already exists for {id}"),
        )
        .with_details(format!("worktree: {}", path.display()))
        .suggest(format!("Use --force to recreate it: ticketflow start {id} --force"))
    }

    pub fn worktree_not_found(id: &str) -> Self {
        FlowError::new(
            ErrorCode::WorktreeNotFound,
            format!("no worktree found for {id}"),
        )
        .suggest("Run 'ticketflow worktree list' to see existing worktrees")
    }

    pub fn cancelled(what: impl Into<String>) -> Self {
        FlowError::new(ErrorCode::Cancelled, what)
    }

    pub fn io(context: impl std::fmt::Display, err: &std::io::Error) -> Self {
        let code = if err.kind() == std::io::ErrorKind::PermissionDenied {
            ErrorCode::PermissionDenied
        } else {
            ErrorCode::GitError
        };
        FlowError::new(code, format!("{context}: {err}"))
    }
}

/// Promote a low-level git failure into the taxonomy, attaching tailored
/// suggestions for the failure strings git is known to emit.
pub fn from_git(err: GitError) -> FlowError {
    match err {
        GitError::Cancelled { op } => FlowError::cancelled(format!("git {op} was interrupted")),
        GitError::TimedOut { op, timeout } => FlowError::new(
            ErrorCode::GitError,
            format!("git {op} timed out after {}", format_timeout(timeout)),
        )
        .suggest("Raise git.timeout in .ticketflow.yaml if the repository is slow"),
        GitError::Parse { op, message } => {
            FlowError::new(ErrorCode::GitError, format!("unexpected git {op} output"))
                .with_details(message)
        }
        GitError::Divergence { branch, base, ahead, behind } => FlowError::new(
            ErrorCode::GitBranchExists,
            format!("branch '{branch}' already exists and has diverged from {base} (ahead {ahead}, behind {behind})"),
        ),
        GitError::Failed { op, stderr } => classify_failure(&op, stderr),
    }
}

fn classify_failure(op: &str, stderr: String) -> FlowError {
    let lower = stderr.to_lowercase();

    let base = if lower.contains("permission denied") {
        FlowError::new(ErrorCode::PermissionDenied, format!("git {op} failed"))
    } else if op.starts_with("worktree add") {
        FlowError::new(ErrorCode::WorktreeCreateFailed, format!("git {op} failed"))
    } else if op.starts_with("worktree remove") {
        FlowError::new(ErrorCode::WorktreeRemoveFailed, format!("git {op} failed"))
    } else if op.starts_with("merge") {
        FlowError::new(ErrorCode::GitMergeFailed, format!("git {op} failed"))
    } else {
        FlowError::new(ErrorCode::GitError, format!("git {op} failed"))
    };

    let mut err = base.with_details(stderr.trim().to_string());
    if lower.contains("is not a working tree") {
        err = err.suggest("Run 'git worktree prune' to drop stale worktree entries");
    }
    if lower.contains("already exists") && op.starts_with("branch") {
        err.code = ErrorCode::GitBranchExists;
    }
    if lower.contains("contains modified or untracked files") {
        err = err.suggest("Remove the worktree with --force, or clean it up manually");
    }
    err
}

fn format_timeout(d: Duration) -> String {
    format!("{}s", d.as_secs())
}

/// Extract the exit code for an error that bubbled up to `main`.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<FlowError>()
        .map(|e| e.code.exit_code())
        .unwrap_or(3)
}
