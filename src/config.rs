//! Project configuration.
//!
//! `.ticketflow.yaml` lives at the repository root and is checked into git,
//! so every worktree sees the same settings. Durations are plain integer
//! seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::FlowError;

pub const CONFIG_FILE: &str = ".ticketflow.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub git: GitConfig,
    pub tickets: TicketsConfig,
    pub worktree: WorktreeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitConfig {
    /// The trunk branch: divergence is measured against it and cleanup
    /// never touches it.
    pub default_branch: String,
    /// Per-subprocess timeout, in seconds.
    pub timeout: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        GitConfig {
            default_branch: "main".to_string(),
            timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TicketsConfig {
    pub dir: String,
    pub todo_dir: String,
    pub doing_dir: String,
    pub done_dir: String,
}

impl Default for TicketsConfig {
    fn default() -> Self {
        TicketsConfig {
            dir: "tickets".to_string(),
            todo_dir: "todo".to_string(),
            doing_dir: "doing".to_string(),
            done_dir: "done".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorktreeConfig {
    pub enabled: bool,
    /// Base directory for worktrees; resolved against the main repository
    /// root when relative.
    pub base_dir: String,
    /// Commands run inside a fresh worktree, each shell-split into an argv.
    pub init_commands: Vec<String>,
    /// Wall-clock budget for the whole init sequence, in seconds.
    pub init_commands_timeout: u64,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        WorktreeConfig {
            enabled: true,
            base_dir: "../ticketflow.worktrees".to_string(),
            init_commands: Vec::new(),
            init_commands_timeout: 60,
        }
    }
}

impl Config {
    /// Load configuration from `<root>/.ticketflow.yaml`.
    pub fn load(root: &Path) -> Result<Config, FlowError> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            return Err(FlowError::config_not_found(root));
        }
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| FlowError::io(format!("failed to read {}", path.display()), &e))?;
        serde_yaml::from_str(&contents).map_err(FlowError::config_invalid)
    }

    /// Write this configuration to `<root>/.ticketflow.yaml`.
    pub fn save(&self, root: &Path) -> Result<PathBuf, FlowError> {
        let path = root.join(CONFIG_FILE);
        let yaml = serde_yaml::to_string(self).map_err(FlowError::config_invalid)?;
        std::fs::write(&path, yaml)
            .map_err(|e| FlowError::io(format!("failed to write {}", path.display()), &e))?;
        Ok(path)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git.timeout)
    }

    pub fn init_commands_timeout(&self) -> Duration {
        Duration::from_secs(self.worktree.init_commands_timeout)
    }

    /// Absolute base directory for worktrees, lexically normalized so the
    /// paths handed to git never carry `..` segments.
    pub fn worktree_base(&self, main_root: &Path) -> PathBuf {
        let base = Path::new(&self.worktree.base_dir);
        if base.is_absolute() {
            normalize(base)
        } else {
            normalize(&main_root.join(base))
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}
