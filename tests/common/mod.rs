//! Test harness: isolated git repositories in temp directories.
//!
//! Each test gets a fresh repository with deterministic configuration. Git
//! environment variables are pinned process-wide so a developer's global
//! config (hooks, commit signing, default branch) cannot leak in.

// Not every test crate uses every helper.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Once;

use tempfile::TempDir;

use ticketflow::config::Config;
use ticketflow::engine::Engine;
use ticketflow::exec::Ctx;
use ticketflow::git::Repository;
use ticketflow::output::StatusChannel;
use ticketflow::store::TicketStore;
use ticketflow::worktree::Headless;

static GIT_ENV: Once = Once::new();

/// Pin git-related environment for every child process this test binary
/// spawns. Values are identical across tests, so concurrent setup is fine.
fn isolate_git_env() {
    GIT_ENV.call_once(|| {
        std::env::set_var("GIT_CONFIG_GLOBAL", "/dev/null");
        std::env::set_var("GIT_CONFIG_SYSTEM", "/dev/null");
        std::env::set_var("GIT_AUTHOR_DATE", "2025-01-01T00:00:00Z");
        std::env::set_var("GIT_COMMITTER_DATE", "2025-01-01T00:00:00Z");
        std::env::set_var("LC_ALL", "C");
        std::env::set_var("TICKETFLOW_NON_INTERACTIVE", "true");
    });
}

pub struct TestRepo {
    // Held so the directory lives as long as the repo
    _temp: TempDir,
    root: PathBuf,
}

impl TestRepo {
    /// A fresh repository on branch `main` with one initial commit.
    pub fn new() -> Self {
        isolate_git_env();
        let temp = TempDir::new().expect("create temp dir");
        // Keep the repo in a subdirectory so worktrees can be siblings.
        let root = temp.path().join("repo");
        std::fs::create_dir(&root).expect("create repo dir");
        let root = root.canonicalize().expect("canonicalize repo dir");

        let repo = TestRepo { _temp: temp, root };
        repo.git(&["init", "-b", "main"]);
        repo.git(&["config", "user.name", "Test User"]);
        repo.git(&["config", "user.email", "test@example.com"]);
        std::fs::write(repo.root.join("README.md"), "# test\n").unwrap();
        repo.git(&["add", "."]);
        repo.git(&["commit", "-m", "Initial commit"]);
        repo
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Project configuration used by the tests: short timeouts, worktrees
    /// kept inside the temp directory.
    pub fn config(worktree_enabled: bool) -> Config {
        let mut config = Config::default();
        config.worktree.enabled = worktree_enabled;
        config.worktree.base_dir = "../worktrees".to_string();
        config
    }

    /// Write the config, scaffold ticket directories and .gitignore, and
    /// commit the lot (mirrors `ticketflow init` + `git commit`).
    pub fn init_project(&self, config: &Config) {
        config.save(&self.root).expect("save config");
        let store = self.store(config);
        store.ensure_dirs().expect("create ticket dirs");
        for sub in ["todo", "doing", "done"] {
            std::fs::write(self.root.join("tickets").join(sub).join(".gitkeep"), "").unwrap();
        }
        std::fs::write(self.root.join(".gitignore"), "current-ticket.md\n").unwrap();
        self.git(&["add", "."]);
        self.git(&["commit", "-m", "Set up ticketflow"]);
    }

    pub fn repo(&self, config: &Config) -> Repository {
        Repository::new(&self.root, config.git_timeout(), Ctx::default())
    }

    pub fn store(&self, config: &Config) -> TicketStore {
        TicketStore::new(&self.root, &config.tickets)
    }

    /// Run git in the repository, asserting success.
    pub fn git(&self, args: &[&str]) -> String {
        self.git_in(&self.root, args)
    }

    /// Run git in an arbitrary directory (e.g. a worktree).
    pub fn git_in(&self, dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    pub fn current_branch(&self) -> String {
        self.git(&["branch", "--show-current"]).trim().to_string()
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        Command::new("git")
            .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{name}")])
            .current_dir(&self.root)
            .output()
            .expect("spawn git")
            .status
            .success()
    }

    pub fn head_subject(&self) -> String {
        self.git(&["log", "-1", "--format=%s"]).trim().to_string()
    }

    /// Commits on `branch` that are not on `main`.
    pub fn commits_ahead_of_main(&self, branch: &str) -> usize {
        self.git(&["rev-list", "--count", &format!("main..{branch}")])
            .trim()
            .parse()
            .unwrap()
    }

    /// Make the working tree dirty with an unrelated tracked-file change.
    pub fn dirty(&self) {
        std::fs::write(self.root.join("README.md"), "# dirty\n").unwrap();
    }
}

/// Owns everything an [`Engine`] borrows, so tests can say
/// `harness.engine()` without wrestling lifetimes.
pub struct EngineHarness {
    pub config: Config,
    pub repo: Repository,
    pub store: TicketStore,
    pub status: StatusChannel,
    pub prompt: Headless,
    main_root: PathBuf,
}

impl EngineHarness {
    /// Harness bound to the main repository root.
    pub fn new(test_repo: &TestRepo, config: Config) -> Self {
        Self::at(test_repo, test_repo.root(), config)
    }

    /// Harness bound to an arbitrary workspace root (e.g. a worktree).
    pub fn at(test_repo: &TestRepo, workspace: &Path, config: Config) -> Self {
        EngineHarness {
            repo: Repository::new(workspace, config.git_timeout(), Ctx::default()),
            store: TicketStore::new(workspace, &config.tickets),
            status: StatusChannel::silent(),
            prompt: Headless::default(),
            main_root: test_repo.root().to_path_buf(),
            config,
        }
    }

    pub fn engine(&self) -> Engine<'_> {
        Engine::new(
            &self.config,
            &self.repo,
            &self.store,
            &self.main_root,
            &self.status,
            &self.prompt,
        )
    }
}
