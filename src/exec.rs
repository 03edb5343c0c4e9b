//! Subprocess execution with timeouts and cooperative cancellation.
//!
//! Every external command (git calls, worktree init commands) goes through
//! [`Cmd`], which enforces a wall-clock timeout and polls a [`CancelToken`]
//! while the child runs. The child is killed on timeout or cancellation so a
//! hung `git` never wedges the CLI.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

/// Shared cancellation flag, usually wired to SIGINT in `main`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The raw flag, for handing to a signal handler.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Invocation context: cancellation plus an optional wall-clock deadline.
///
/// Deadlines compose but never extend: [`Ctx::with_deadline`] keeps an
/// earlier deadline if one is already set.
#[derive(Debug, Clone, Default)]
pub struct Ctx {
    pub cancel: CancelToken,
    deadline: Option<Instant>,
}

impl Ctx {
    pub fn new(cancel: CancelToken) -> Self {
        Ctx { cancel, deadline: None }
    }

    /// Derive a context whose deadline is at most `limit` from now.
    pub fn with_deadline(&self, limit: Duration) -> Ctx {
        let candidate = Instant::now() + limit;
        let deadline = match self.deadline {
            Some(existing) => Some(existing.min(candidate)),
            None => Some(candidate),
        };
        Ctx { cancel: self.cancel.clone(), deadline }
    }

    /// Time left until the deadline, if one is set. `Some(ZERO)` means the
    /// deadline has already passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }
}

#[derive(Debug)]
pub enum ExecError {
    Spawn(std::io::Error),
    TimedOut(Duration),
    Cancelled,
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::Spawn(e) => write!(f, "failed to spawn command: {e}"),
            ExecError::TimedOut(d) => write!(f, "command timed out after {}s", d.as_secs()),
            ExecError::Cancelled => write!(f, "command was interrupted"),
        }
    }
}

impl std::error::Error for ExecError {}

/// Captured output of a finished command.
#[derive(Debug)]
pub struct Output {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// How often the runner checks for cancellation while waiting on a child.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Builder for a single external command.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Cmd {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Run to completion, capturing stdout and stderr.
    ///
    /// The effective limit is the smaller of the per-call timeout and the
    /// context deadline. The child is killed (and reaped) on timeout or
    /// cancellation.
    pub fn run(self, ctx: &Ctx) -> Result<Output, ExecError> {
        if ctx.cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        let effective = match (self.timeout, ctx.remaining()) {
            (Some(t), Some(r)) => Some(t.min(r)),
            (Some(t), None) => Some(t),
            (None, r) => r,
        };
        if effective == Some(Duration::ZERO) {
            return Err(ExecError::TimedOut(Duration::ZERO));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(ExecError::Spawn)?;

        // Drain pipes on threads so a chatty child cannot deadlock against a
        // full pipe while we wait on its exit status.
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let status = wait_with_limits(&mut child, effective, ctx)?;

        let stdout = join_reader(stdout);
        let stderr = join_reader(stderr);

        Ok(Output { status, stdout, stderr })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = source.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    let bytes = handle.and_then(|h| h.join().ok()).unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn wait_with_limits(
    child: &mut Child,
    limit: Option<Duration>,
    ctx: &Ctx,
) -> Result<ExitStatus, ExecError> {
    let started = Instant::now();
    loop {
        if ctx.cancel.is_cancelled() {
            kill_and_reap(child);
            return Err(ExecError::Cancelled);
        }
        if let Some(limit) = limit {
            if started.elapsed() >= limit {
                kill_and_reap(child);
                return Err(ExecError::TimedOut(limit));
            }
        }
        match child.wait_timeout(POLL_INTERVAL) {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => continue,
            Err(e) => {
                kill_and_reap(child);
                return Err(ExecError::Spawn(e));
            }
        }
    }
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
