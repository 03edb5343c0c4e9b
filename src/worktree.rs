//! Worktree policy: path layout, init commands, divergence resolution.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::exec::{Cmd, Ctx, ExecError};
use crate::git::GitError;

/// Outcome of the "branch already exists and has diverged" dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceChoice {
    /// Adopt the existing branch as-is.
    Use,
    /// Force-delete the branch and recreate it at HEAD.
    Recreate,
    /// Abort the transition.
    Cancel,
}

/// Interactive decisions, abstracted so the engine never touches a TTY.
/// Headless contexts (tests, CI) supply fixed answers.
pub trait Interaction {
    fn resolve_divergence(&self, divergence: &GitError) -> DivergenceChoice;
    fn confirm(&self, prompt: &str) -> bool;
}

/// Whether prompting is disabled for this invocation. CI detection lives
/// here, in the adapter, not in the engine.
pub fn non_interactive() -> bool {
    if std::env::var("TICKETFLOW_NON_INTERACTIVE").map(|v| v == "true" || v == "1") == Ok(true) {
        return true;
    }
    std::env::var_os("CI").is_some()
}

/// Console prompt reading stdin; falls back to the headless defaults when
/// prompting is disabled.
pub struct ConsolePrompt;

impl Interaction for ConsolePrompt {
    fn resolve_divergence(&self, divergence: &GitError) -> DivergenceChoice {
        if non_interactive() {
            return DivergenceChoice::Recreate;
        }
        eprintln!("{divergence}");
        eprint!("[u]se existing branch, [r]ecreate at HEAD, [c]ancel (default: recreate): ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return DivergenceChoice::Recreate;
        }
        match line.trim().to_lowercase().as_str() {
            "u" | "use" => DivergenceChoice::Use,
            "c" | "cancel" => DivergenceChoice::Cancel,
            _ => DivergenceChoice::Recreate,
        }
    }

    fn confirm(&self, prompt: &str) -> bool {
        if non_interactive() {
            return true;
        }
        eprint!("{prompt} [y/N]: ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Fixed answers for tests and embedding.
pub struct Headless {
    pub divergence: DivergenceChoice,
    pub confirm: bool,
}

impl Default for Headless {
    fn default() -> Self {
        Headless {
            divergence: DivergenceChoice::Recreate,
            confirm: true,
        }
    }
}

impl Interaction for Headless {
    fn resolve_divergence(&self, _divergence: &GitError) -> DivergenceChoice {
        self.divergence
    }

    fn confirm(&self, _prompt: &str) -> bool {
        self.confirm
    }
}

/// One failed init command; collected, never fatal.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InitCommandError {
    pub command: String,
    pub error: String,
}

impl std::fmt::Display for InitCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.command, self.error)
    }
}

/// Computes worktree paths and runs configured init commands.
pub struct WorktreePolicy<'a> {
    config: &'a Config,
    main_root: &'a Path,
}

impl<'a> WorktreePolicy<'a> {
    pub fn new(config: &'a Config, main_root: &'a Path) -> Self {
        WorktreePolicy { config, main_root }
    }

    /// `<configured base>/<ticket id>`, always flat.
    pub fn path_for(&self, ticket_id: &str) -> PathBuf {
        self.config.worktree_base(self.main_root).join(ticket_id)
    }

    /// Run `worktree.init_commands` sequentially inside the new worktree.
    ///
    /// Each entry is shell-split into an argv. The whole sequence shares one
    /// wall-clock deadline (inherited from `ctx` when already tighter). A
    /// command that fails to parse, spawn or exit zero is recorded and the
    /// remaining commands still run.
    ///
    /// Returns `(commands_executed, errors)`.
    pub fn run_init_commands(
        &self,
        worktree_path: &Path,
        ctx: &Ctx,
    ) -> (usize, Vec<InitCommandError>) {
        let commands = &self.config.worktree.init_commands;
        if commands.is_empty() {
            return (0, Vec::new());
        }

        let deadline_ctx = ctx.with_deadline(self.config.init_commands_timeout());
        let mut executed = 0;
        let mut errors = Vec::new();

        for command in commands {
            let Some(argv) = shlex::split(command) else {
                errors.push(InitCommandError {
                    command: command.clone(),
                    error: "unparseable shell command".to_string(),
                });
                continue;
            };
            let Some((program, args)) = argv.split_first() else {
                continue; // empty entry
            };

            executed += 1;
            let result = Cmd::new(program)
                .args(args.iter().cloned())
                .current_dir(worktree_path)
                .run(&deadline_ctx);
            match result {
                Ok(output) if output.success() => {}
                Ok(output) => {
                    let code = output.status.code().unwrap_or(-1);
                    errors.push(InitCommandError {
                        command: command.clone(),
                        error: format!("exit status {code}: {}", output.stderr.trim()),
                    });
                }
                Err(ExecError::Cancelled) => {
                    errors.push(InitCommandError {
                        command: command.clone(),
                        error: "interrupted".to_string(),
                    });
                    break;
                }
                Err(e) => {
                    errors.push(InitCommandError {
                        command: command.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        for err in &errors {
            log::warn!("init command failed: {err}");
        }
        (executed, errors)
    }
}
