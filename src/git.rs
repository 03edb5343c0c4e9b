//! Typed wrapper over the `git` binary.
//!
//! `Repository` binds a working directory, a per-call timeout and the
//! invocation context (cancellation + deadline); every operation is a named
//! method so callers never assemble raw argv strings. `at_dir` rebinds the
//! same settings to another directory for per-worktree inspection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::exec::{Cmd, Ctx, ExecError};

#[derive(Debug)]
pub enum GitError {
    /// git exited non-zero.
    Failed { op: String, stderr: String },
    TimedOut { op: String, timeout: Duration },
    Cancelled { op: String },
    /// git succeeded but printed something we could not interpret.
    Parse { op: String, message: String },
    /// `worktree add` refused: the branch already exists and has moved
    /// relative to the default branch.
    Divergence {
        branch: String,
        base: String,
        ahead: usize,
        behind: usize,
    },
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitError::Failed { op, stderr } => write!(f, "git {op} failed: {}", stderr.trim()),
            GitError::TimedOut { op, timeout } => {
                write!(f, "git {op} timed out after {}s", timeout.as_secs())
            }
            GitError::Cancelled { op } => write!(f, "git {op} was interrupted"),
            GitError::Parse { op, message } => write!(f, "git {op}: {message}"),
            GitError::Divergence { branch, base, ahead, behind } => write!(
                f,
                "branch '{branch}' has diverged from {base} (ahead {ahead}, behind {behind})"
            ),
        }
    }
}

impl std::error::Error for GitError {}

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub head: String,
    /// `None` for detached or bare entries.
    pub branch: Option<String>,
}

/// Repository context for git operations.
#[derive(Debug, Clone)]
pub struct Repository {
    path: PathBuf,
    timeout: Duration,
    ctx: Ctx,
}

impl Repository {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration, ctx: Ctx) -> Self {
        Repository {
            path: path.into(),
            timeout,
            ctx,
        }
    }

    /// Rebind to another working directory (used to inspect a worktree),
    /// keeping timeout and cancellation.
    pub fn at_dir(&self, path: impl Into<PathBuf>) -> Repository {
        Repository {
            path: path.into(),
            timeout: self.timeout,
            ctx: self.ctx.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ctx(&self) -> &Ctx {
        &self.ctx
    }

    /// Run git with the repository's working directory, returning stdout.
    fn run(&self, op: &str, args: &[&str]) -> Result<String, GitError> {
        let output = Cmd::new("git")
            .args(args.iter().copied())
            .current_dir(&self.path)
            .timeout(self.timeout)
            .run(&self.ctx)
            .map_err(|e| match e {
                ExecError::Cancelled => GitError::Cancelled { op: op.to_string() },
                ExecError::TimedOut(t) => GitError::TimedOut {
                    op: op.to_string(),
                    timeout: t,
                },
                ExecError::Spawn(err) => GitError::Failed {
                    op: op.to_string(),
                    stderr: err.to_string(),
                },
            })?;
        if !output.success() {
            return Err(GitError::Failed {
                op: op.to_string(),
                stderr: if output.stderr.trim().is_empty() {
                    output.stdout
                } else {
                    output.stderr
                },
            });
        }
        Ok(output.stdout)
    }

    /// Escape hatch for reconciliation-only calls.
    pub fn exec(&self, args: &[&str]) -> Result<String, GitError> {
        let op = args.first().copied().unwrap_or("git");
        self.run(op, args)
    }

    // repository discovery

    /// Top-level directory of the current working tree.
    pub fn worktree_root(&self) -> Result<PathBuf, GitError> {
        let stdout = self.run("rev-parse", &["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(stdout.trim()))
    }

    /// Root of the main repository (parent of the common `.git` directory),
    /// which differs from `worktree_root` inside a linked worktree.
    pub fn main_repo_root(&self) -> Result<PathBuf, GitError> {
        let stdout = self.run("rev-parse", &["rev-parse", "--git-common-dir"])?;
        let common = self.path.join(stdout.trim());
        let common = dunce::canonicalize(&common).map_err(|e| GitError::Parse {
            op: "rev-parse".to_string(),
            message: format!("cannot canonicalize {}: {e}", common.display()),
        })?;
        common
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| GitError::Parse {
                op: "rev-parse".to_string(),
                message: "git common dir has no parent".to_string(),
            })
    }

    // branches and commits

    /// Current branch name, or `None` in detached HEAD state.
    pub fn current_branch(&self) -> Result<Option<String>, GitError> {
        let stdout = self.run("branch", &["branch", "--show-current"])?;
        let branch = stdout.trim();
        Ok((!branch.is_empty()).then(|| branch.to_string()))
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        let spec = format!("refs/heads/{branch}");
        Ok(self.run("rev-parse", &["rev-parse", "--verify", "--quiet", &spec]).is_ok())
    }

    pub fn create_branch(&self, name: &str) -> Result<(), GitError> {
        self.run("branch", &["branch", "--", name]).map(drop)
    }

    pub fn checkout(&self, reference: &str) -> Result<(), GitError> {
        self.run("checkout", &["checkout", reference]).map(drop)
    }

    pub fn checkout_new_branch(&self, name: &str) -> Result<(), GitError> {
        self.run("checkout", &["checkout", "-b", name]).map(drop)
    }

    pub fn delete_branch(&self, name: &str, force: bool) -> Result<(), GitError> {
        let flag = if force { "-D" } else { "-d" };
        self.run("branch -D", &["branch", flag, "--", name]).map(drop)
    }

    pub fn list_branches(&self) -> Result<Vec<String>, GitError> {
        let stdout = self.run("branch", &["branch", "--format=%(refname:short)"])?;
        Ok(stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Tracked modifications only: freshly created ticket files are
    /// untracked until their start commit and must not block transitions.
    pub fn has_uncommitted_changes(&self) -> Result<bool, GitError> {
        let stdout = self.run("status", &["status", "--porcelain", "--untracked-files=no"])?;
        Ok(!stdout.trim().is_empty())
    }

    pub fn has_staged_changes(&self) -> Result<bool, GitError> {
        // exit 0 = clean index, 1 = staged changes present
        match self.run("diff", &["diff", "--cached", "--quiet"]) {
            Ok(_) => Ok(false),
            Err(GitError::Failed { stderr, .. }) if stderr.trim().is_empty() => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Stage everything under the given paths (`git add -A -- <paths>`).
    pub fn add_all(&self, paths: &[&Path]) -> Result<(), GitError> {
        let rendered: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut args = vec!["add", "-A", "--"];
        args.extend(rendered.iter().map(String::as_str));
        self.run("add", &args).map(drop)
    }

    pub fn commit(&self, message: &str) -> Result<(), GitError> {
        self.run("commit", &["commit", "-m", message]).map(drop)
    }

    pub fn merge_squash(&self, branch: &str) -> Result<(), GitError> {
        self.run("merge --squash", &["merge", "--squash", branch]).map(drop)
    }

    pub fn reset_hard(&self, reference: &str) -> Result<(), GitError> {
        self.run("reset", &["reset", "--hard", reference]).map(drop)
    }

    /// Whether `branch` is fully contained in `into`.
    pub fn is_branch_merged(&self, branch: &str, into: &str) -> Result<bool, GitError> {
        let spec = format!("refs/heads/{branch}");
        if self.run("rev-parse", &["rev-parse", "--verify", "--quiet", &spec]).is_err() {
            return Ok(false);
        }
        Ok(self
            .run("merge-base", &["merge-base", "--is-ancestor", branch, into])
            .is_ok())
    }

    /// `(ahead, behind)` of `head` relative to `base`.
    pub fn ahead_behind(&self, base: &str, head: &str) -> Result<(usize, usize), GitError> {
        let ahead = self.count_commits(&format!("{base}..{head}"))?;
        let behind = self.count_commits(&format!("{head}..{base}"))?;
        Ok((ahead, behind))
    }

    fn count_commits(&self, range: &str) -> Result<usize, GitError> {
        let stdout = self.run("rev-list", &["rev-list", "--count", range])?;
        stdout.trim().parse().map_err(|e| GitError::Parse {
            op: "rev-list".to_string(),
            message: format!("bad commit count {:?}: {e}", stdout.trim()),
        })
    }

    // worktrees

    pub fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, GitError> {
        let stdout = self.run("worktree list", &["worktree", "list", "--porcelain"])?;
        parse_worktree_list(&stdout)
    }

    pub fn find_worktree_by_branch(&self, branch: &str) -> Result<Option<WorktreeInfo>, GitError> {
        Ok(self
            .list_worktrees()?
            .into_iter()
            .find(|wt| wt.branch.as_deref() == Some(branch)))
    }

    pub fn has_worktree(&self, branch: &str) -> Result<bool, GitError> {
        Ok(self.find_worktree_by_branch(branch)?.is_some())
    }

    /// Create a worktree for `branch` at `path`.
    ///
    /// A missing branch is created from HEAD. An existing branch is only
    /// attached when it still sits exactly on `default_branch`; otherwise a
    /// `Divergence` error reports how far it has moved so the caller can
    /// run the resolution dialog.
    pub fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        default_branch: &str,
    ) -> Result<(), GitError> {
        if self.branch_exists(branch)? {
            let (ahead, behind) = self.ahead_behind(default_branch, branch)?;
            if ahead != 0 || behind != 0 {
                return Err(GitError::Divergence {
                    branch: branch.to_string(),
                    base: default_branch.to_string(),
                    ahead,
                    behind,
                });
            }
            return self.add_worktree_existing(path, branch);
        }
        let path_str = path.to_string_lossy();
        self.run("worktree add", &["worktree", "add", "-b", branch, path_str.as_ref()])
            .map(drop)
    }

    /// Attach an existing branch at `path` without divergence checks.
    pub fn add_worktree_existing(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        let path_str = path.to_string_lossy();
        self.run("worktree add", &["worktree", "add", path_str.as_ref(), branch])
            .map(drop)
    }

    pub fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), GitError> {
        let path_str = path.to_string_lossy();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(path_str.as_ref());
        self.run("worktree remove", &args).map(drop)
    }

    pub fn prune_worktrees(&self) -> Result<(), GitError> {
        self.run("worktree prune", &["worktree", "prune"]).map(drop)
    }
}

fn parse_worktree_list(output: &str) -> Result<Vec<WorktreeInfo>, GitError> {
    let mut worktrees = Vec::new();
    let mut current: Option<WorktreeInfo> = None;

    for line in output.lines() {
        if line.is_empty() {
            worktrees.extend(current.take());
            continue;
        }
        let (key, value) = line
            .split_once(' ')
            .map(|(k, v)| (k, Some(v)))
            .unwrap_or((line, None));
        match key {
            "worktree" => {
                worktrees.extend(current.take());
                let path = value.ok_or_else(|| GitError::Parse {
                    op: "worktree list".to_string(),
                    message: "worktree line missing path".to_string(),
                })?;
                current = Some(WorktreeInfo {
                    path: PathBuf::from(path),
                    head: String::new(),
                    branch: None,
                });
            }
            "HEAD" => {
                if let (Some(wt), Some(sha)) = (current.as_mut(), value) {
                    wt.head = sha.to_string();
                }
            }
            "branch" => {
                if let (Some(wt), Some(branch_ref)) = (current.as_mut(), value) {
                    let branch = branch_ref.strip_prefix("refs/heads/").unwrap_or(branch_ref);
                    wt.branch = Some(branch.to_string());
                }
            }
            // bare/detached/locked/prunable and unknown attributes are
            // irrelevant here; detached entries simply keep branch = None.
            _ => {}
        }
    }
    worktrees.extend(current.take());
    Ok(worktrees)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worktree_list() {
        let output = "worktree /repo/main\nHEAD abcd1234\nbranch refs/heads/main\n\nworktree /wt/240101-100000-x\nHEAD efgh5678\nbranch refs/heads/240101-100000-x\n\n";
        let worktrees = parse_worktree_list(output).unwrap();
        assert_eq!(worktrees.len(), 2);
        assert_eq!(worktrees[0].path, PathBuf::from("/repo/main"));
        assert_eq!(worktrees[0].branch.as_deref(), Some("main"));
        assert_eq!(worktrees[1].branch.as_deref(), Some("240101-100000-x"));
        assert_eq!(worktrees[1].head, "efgh5678");
    }

    #[test]
    fn test_parse_detached_and_bare_entries() {
        let output = "worktree /repo/bare\nHEAD aaaa\nbare\n\nworktree /repo/det\nHEAD bbbb\ndetached\n\n";
        let worktrees = parse_worktree_list(output).unwrap();
        assert_eq!(worktrees.len(), 2);
        assert_eq!(worktrees[0].branch, None);
        assert_eq!(worktrees[1].branch, None);
    }

    #[test]
    fn test_parse_without_trailing_blank_line() {
        let output = "worktree /repo/main\nHEAD abcd\nbranch refs/heads/main";
        let worktrees = parse_worktree_list(output).unwrap();
        assert_eq!(worktrees.len(), 1);
        assert_eq!(worktrees[0].branch.as_deref(), Some("main"));
    }

    #[test]
    fn test_parse_missing_path_is_an_error() {
        assert!(parse_worktree_list("worktree\nHEAD x\n").is_err());
    }
}
